use tracing::{debug, warn};

use crate::bluesky::{ThreadView, ThreadViewPost};
use crate::data::{ThreadError, ThreadFetcher};
use crate::post_ref::PostRef;

/// Upper bound on "re-fetch from the discovered root" rounds per thread.
const MAX_ROOT_HOPS: usize = 8;

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub root: ThreadViewPost,
    /// True when the walk moved above the node it started from.
    pub climbed: bool,
}

/// Walks `thread` up through its ancestors and returns the highest reachable one,
/// with every level's `replies` patched to hold the more complete subtree.
/// Ancestors arrive with stale `replies`, so each level gets the child it was
/// reached from spliced back in.
///
/// Tombstoned ancestors end the walk; tombstoned replies on the walked levels are dropped.
pub fn merge_ancestors(thread: ThreadViewPost) -> MergeOutcome {
    let mut current = thread;
    current.replies.retain(|reply| !reply.is_tombstone());
    let mut climbed = false;

    while let Some(parent) = current.parent.take() {
        let Some(mut parent) = parent.into_post() else {
            break;
        };
        parent.replies.retain(|reply| !reply.is_tombstone());
        splice_reply(&mut parent.replies, current);
        current = parent;
        climbed = true;
    }

    MergeOutcome {
        root: current,
        climbed,
    }
}

fn splice_reply(replies: &mut Vec<ThreadView>, child: ThreadViewPost) {
    let existing = replies
        .iter()
        .position(|reply| reply.post_uri() == Some(child.post.uri.as_str()));
    let child = ThreadView::Post(Box::new(child));
    match existing {
        Some(idx) => replies[idx] = child,
        None => replies.push(child),
    }
}

/// Fetches a post's thread and anchors it at its true root.
///
/// When the merge walk climbs, the discovered root is fetched again so that
/// reply branches sibling to the requested post are complete. The second
/// result is merged again in case its own ancestor chain reaches higher.
pub fn fetch_full_thread(
    fetcher: &dyn ThreadFetcher,
    post: &PostRef,
) -> Result<ThreadViewPost, ThreadError> {
    let fetched = fetcher
        .fetch_thread(&post.author, &post.rkey)?
        .into_post()
        .ok_or_else(|| ThreadError::Unavailable {
            uri: post.at_uri(),
        })?;

    let mut outcome = merge_ancestors(fetched);
    let mut hops = 0;
    while outcome.climbed {
        if hops == MAX_ROOT_HOPS {
            warn!(uri = %post, "root discovery did not settle; using the last merged view");
            break;
        }
        hops += 1;
        let root_ref = PostRef::from_at_uri(&outcome.root.post.uri)?;
        debug!(hops, root = %root_ref, "re-fetching thread from discovered root");

        let Some(refetched) = fetcher
            .fetch_thread(&root_ref.author, &root_ref.rkey)?
            .into_post()
        else {
            warn!(root = %root_ref, "discovered root is no longer available; keeping merged view");
            break;
        };
        outcome = merge_ancestors(refetched);
    }

    Ok(outcome.root)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::FixtureThreadService;
    use serde_json::{json, Value};

    pub(crate) fn uri(rkey: &str) -> String {
        format!("at://did:plc:alice/app.bsky.feed.post/{rkey}")
    }

    pub(crate) fn post(rkey: &str, created_at: &str) -> Value {
        json!({
            "uri": uri(rkey),
            "cid": format!("cid-{rkey}"),
            "author": {"did": "did:plc:alice", "handle": "alice.test"},
            "record": {"text": format!("post {rkey}"), "createdAt": created_at},
        })
    }

    pub(crate) fn thread(rkey: &str, created_at: &str, replies: Vec<Value>) -> Value {
        json!({
            "$type": "app.bsky.feed.defs#threadViewPost",
            "post": post(rkey, created_at),
            "replies": replies,
        })
    }

    pub(crate) fn with_parent(mut node: Value, parent: Value) -> Value {
        node["parent"] = parent;
        node
    }

    pub(crate) fn not_found(rkey: &str) -> Value {
        json!({"$type": "app.bsky.feed.defs#notFoundPost", "uri": uri(rkey), "notFound": true})
    }

    pub(crate) fn blocked(rkey: &str) -> Value {
        json!({"$type": "app.bsky.feed.defs#blockedPost", "uri": uri(rkey), "blocked": true})
    }

    fn decode(value: Value) -> ThreadViewPost {
        serde_json::from_value::<ThreadView>(value)
            .unwrap()
            .into_post()
            .unwrap()
    }

    fn reply_uris(node: &ThreadViewPost) -> Vec<String> {
        node.replies
            .iter()
            .filter_map(|r| r.post_uri().map(str::to_string))
            .collect()
    }

    #[test]
    fn replaces_stale_entry_in_parent_replies() {
        let fetched = with_parent(
            thread("b", "2024-01-01T00:02:00Z", vec![thread("c", "2024-01-01T00:03:00Z", vec![])]),
            thread(
                "root",
                "2024-01-01T00:00:00Z",
                vec![
                    thread("a", "2024-01-01T00:01:00Z", vec![]),
                    thread("b", "2024-01-01T00:02:00Z", vec![]),
                ],
            ),
        );

        let outcome = merge_ancestors(decode(fetched));
        assert!(outcome.climbed);
        assert_eq!(outcome.root.post.uri, uri("root"));
        assert_eq!(reply_uris(&outcome.root), vec![uri("a"), uri("b")]);
        let b = outcome.root.replies[1].as_post().unwrap();
        assert_eq!(reply_uris(b), vec![uri("c")]);
    }

    #[test]
    fn appends_when_missing_and_climbs_multiple_levels() {
        let grandparent = thread("root", "2024-01-01T00:00:00Z", vec![]);
        let parent = with_parent(thread("p", "2024-01-01T00:01:00Z", vec![]), grandparent);
        let fetched = with_parent(thread("leaf", "2024-01-01T00:02:00Z", vec![]), parent);

        let outcome = merge_ancestors(decode(fetched));
        assert_eq!(outcome.root.post.uri, uri("root"));
        assert_eq!(reply_uris(&outcome.root), vec![uri("p")]);
        let p = outcome.root.replies[0].as_post().unwrap();
        assert_eq!(reply_uris(p), vec![uri("leaf")]);
        assert!(outcome.root.parent.is_none());
    }

    #[test]
    fn stops_at_tombstoned_parent_and_drops_tombstone_replies() {
        let fetched = with_parent(
            thread(
                "orphan",
                "2024-01-01T00:00:00Z",
                vec![not_found("gone"), thread("r", "2024-01-01T00:01:00Z", vec![])],
            ),
            blocked("hidden"),
        );

        let outcome = merge_ancestors(decode(fetched));
        assert!(!outcome.climbed);
        assert_eq!(outcome.root.post.uri, uri("orphan"));
        assert!(outcome.root.parent.is_none());
        assert_eq!(reply_uris(&outcome.root), vec![uri("r")]);
        assert_eq!(outcome.root.replies.len(), 1);
    }

    #[test]
    fn merging_a_merged_thread_changes_nothing() {
        let fetched = with_parent(
            thread("b", "2024-01-01T00:02:00Z", vec![]),
            thread("root", "2024-01-01T00:00:00Z", vec![thread("a", "2024-01-01T00:01:00Z", vec![])]),
        );
        let first = merge_ancestors(decode(fetched));
        let before = reply_uris(&first.root);
        let second = merge_ancestors(first.root);
        assert!(!second.climbed);
        assert_eq!(reply_uris(&second.root), before);
    }

    #[test]
    fn refetches_from_discovered_root() {
        let service = FixtureThreadService::new()
            .with_thread(
                &uri("b"),
                with_parent(
                    thread("b", "2024-01-01T00:02:00Z", vec![]),
                    thread("root", "2024-01-01T00:00:00Z", vec![]),
                ),
            )
            .with_thread(
                &uri("root"),
                thread(
                    "root",
                    "2024-01-01T00:00:00Z",
                    vec![
                        thread("a", "2024-01-01T00:01:00Z", vec![]),
                        thread("b", "2024-01-01T00:02:00Z", vec![]),
                    ],
                ),
            );

        let root = fetch_full_thread(&service, &PostRef::new("did:plc:alice", "b")).unwrap();
        assert_eq!(root.post.uri, uri("root"));
        assert_eq!(reply_uris(&root), vec![uri("a"), uri("b")]);
        assert_eq!(service.fetches(), vec![uri("b"), uri("root")]);
    }

    #[test]
    fn remerges_when_refetched_root_climbs_again() {
        // The first view only reaches b; b's own view reveals the real root.
        let service = FixtureThreadService::new()
            .with_thread(
                &uri("c"),
                with_parent(
                    thread("c", "2024-01-01T00:03:00Z", vec![]),
                    thread("b", "2024-01-01T00:02:00Z", vec![]),
                ),
            )
            .with_thread(
                &uri("b"),
                with_parent(
                    thread("b", "2024-01-01T00:02:00Z", vec![thread("c", "2024-01-01T00:03:00Z", vec![])]),
                    thread("root", "2024-01-01T00:00:00Z", vec![]),
                ),
            )
            .with_thread(
                &uri("root"),
                thread(
                    "root",
                    "2024-01-01T00:00:00Z",
                    vec![
                        thread("a", "2024-01-01T00:01:00Z", vec![]),
                        thread("b", "2024-01-01T00:02:00Z", vec![thread("c", "2024-01-01T00:03:00Z", vec![])]),
                    ],
                ),
            );

        let root = fetch_full_thread(&service, &PostRef::new("did:plc:alice", "c")).unwrap();
        assert_eq!(root.post.uri, uri("root"));
        assert_eq!(reply_uris(&root), vec![uri("a"), uri("b")]);
        let b = root.replies[1].as_post().unwrap();
        assert_eq!(reply_uris(b), vec![uri("c")]);
        assert_eq!(service.fetches(), vec![uri("c"), uri("b"), uri("root")]);
    }

    #[test]
    fn tombstoned_refetch_keeps_merged_view() {
        let service = FixtureThreadService::new()
            .with_thread(
                &uri("c"),
                with_parent(
                    thread("c", "2024-01-01T00:03:00Z", vec![]),
                    thread("root", "2024-01-01T00:00:00Z", vec![thread("a", "2024-01-01T00:01:00Z", vec![])]),
                ),
            )
            .with_thread(&uri("root"), not_found("root"));

        let root = fetch_full_thread(&service, &PostRef::new("did:plc:alice", "c")).unwrap();
        assert_eq!(root.post.uri, uri("root"));
        assert_eq!(reply_uris(&root), vec![uri("a"), uri("c")]);
        assert_eq!(service.fetches(), vec![uri("c"), uri("root")]);
    }

    #[test]
    fn root_discovery_stops_after_hop_limit() {
        // Every view of p{n} only reaches p{n+1}, so discovery never settles.
        let mut service = FixtureThreadService::new();
        for n in 0..=MAX_ROOT_HOPS {
            let rkey = format!("p{n}");
            let parent = format!("p{}", n + 1);
            service = service.with_thread(
                &uri(&rkey),
                with_parent(
                    thread(&rkey, "2024-01-01T00:00:00Z", vec![]),
                    thread(&parent, "2024-01-01T00:00:00Z", vec![]),
                ),
            );
        }

        let root = fetch_full_thread(&service, &PostRef::new("did:plc:alice", "p0")).unwrap();
        let expected: Vec<String> = (0..=MAX_ROOT_HOPS).map(|n| uri(&format!("p{n}"))).collect();
        assert_eq!(service.fetches(), expected);
        assert_eq!(root.post.uri, uri(&format!("p{}", MAX_ROOT_HOPS + 1)));
        assert_eq!(reply_uris(&root), vec![uri(&format!("p{MAX_ROOT_HOPS}"))]);
    }

    #[test]
    fn does_not_refetch_when_already_at_root() {
        let service = FixtureThreadService::new()
            .with_thread(&uri("root"), thread("root", "2024-01-01T00:00:00Z", vec![]));
        fetch_full_thread(&service, &PostRef::new("did:plc:alice", "root")).unwrap();
        assert_eq!(service.fetches(), vec![uri("root")]);
    }

    #[test]
    fn tombstoned_request_is_unavailable() {
        let service = FixtureThreadService::new().with_thread(&uri("x"), not_found("x"));
        let err = fetch_full_thread(&service, &PostRef::new("did:plc:alice", "x")).unwrap_err();
        assert!(matches!(err, ThreadError::Unavailable { .. }));
    }
}
