use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::bluesky::ThreadView;
use crate::builder::{NodeBudget, NodeGeometry, TreeBuilder};
use crate::data::{ThreadError, ThreadFetcher};
use crate::layout::LayoutEngine;
use crate::measure::{apply_dimensions, DimensionProvider};
use crate::merge;
use crate::node::{Forest, NodeId, SatelliteTree};
use crate::post_ref::PostRef;

/// Resolves quote embeds in the main tree into satellite trees, fetching one
/// quote at a time against the session's node budget.
pub struct QuoteResolver<'a> {
    fetcher: &'a dyn ThreadFetcher,
    layout: &'a LayoutEngine,
    measure: &'a dyn DimensionProvider,
    geometry: NodeGeometry,
}

impl<'a> QuoteResolver<'a> {
    pub fn new(
        fetcher: &'a dyn ThreadFetcher,
        layout: &'a LayoutEngine,
        measure: &'a dyn DimensionProvider,
        geometry: NodeGeometry,
    ) -> Self {
        Self {
            fetcher,
            layout,
            measure,
            geometry,
        }
    }

    /// Builds one satellite tree per distinct quoted post under `main_root`, in
    /// traversal order, and places them beside the main tree.
    ///
    /// A quote that cannot be fetched or parsed drops only its own satellite.
    /// The satellite whose build exhausts the budget is discarded along with
    /// every quote after it.
    pub fn resolve(
        &self,
        forest: &mut Forest,
        main_root: NodeId,
        main_visible: &[NodeId],
        budget: &mut NodeBudget,
    ) -> Vec<SatelliteTree> {
        let quotes = quoting_nodes(forest, main_root);
        let main_uris = forest.uris(main_root);
        let mut claimed: HashSet<String> = HashSet::new();
        let mut satellites = Vec::new();

        for (source, quoted_uri) in quotes {
            if main_uris.contains(&quoted_uri) || claimed.contains(&quoted_uri) {
                debug!(uri = %quoted_uri, "quoted post already present");
                continue;
            }
            if budget.is_exhausted() {
                info!(
                    max_nodes = budget.max_nodes(),
                    "node budget exhausted; skipping remaining quoted threads"
                );
                break;
            }

            let known: HashSet<String> = main_uris.union(&claimed).cloned().collect();
            let mark = forest.len();
            match self.build_satellite(forest, budget, source, &quoted_uri, &known) {
                Ok(Some(_)) if budget.is_exhausted() => {
                    forest.truncate(mark);
                    info!(
                        uri = %quoted_uri,
                        max_nodes = budget.max_nodes(),
                        "node budget exhausted; discarding partial quoted thread"
                    );
                    break;
                }
                Ok(Some(satellite)) => {
                    claimed.extend(forest.uris(satellite.root));
                    satellites.push(satellite);
                }
                Ok(None) => {
                    debug!(uri = %quoted_uri, "quoted thread root already known");
                }
                Err(err) => {
                    warn!(uri = %quoted_uri, error = %err, "dropping quoted thread");
                }
            }
        }

        self.layout
            .arrange_satellites(forest, main_visible, &mut satellites);
        satellites
    }

    fn build_satellite(
        &self,
        forest: &mut Forest,
        budget: &mut NodeBudget,
        source: NodeId,
        quoted_uri: &str,
        known: &HashSet<String>,
    ) -> Result<Option<SatelliteTree>, ThreadError> {
        let post = PostRef::from_at_uri(quoted_uri)?;
        let thread = merge::fetch_full_thread(self.fetcher, &post)?;
        if known.contains(&thread.post.uri) {
            return Ok(None);
        }

        let raw = ThreadView::Post(Box::new(thread));
        let outcome = TreeBuilder::new(forest, budget, self.geometry)
            .satellite(true)
            .excluding(known)
            .build_tree(&raw);
        let root = outcome.root.ok_or_else(|| ThreadError::Unavailable {
            uri: quoted_uri.to_string(),
        })?;
        apply_dimensions(forest, root, self.measure, self.geometry.min_height);

        Ok(Some(SatelliteTree {
            source,
            target: forest.find_by_uri(root, quoted_uri),
            root,
            visible: Vec::new(),
            truncated: outcome.truncated,
        }))
    }
}

/// Nodes carrying a quoted post, with the quoted URI, in pre-order.
pub fn quoting_nodes(forest: &Forest, root: NodeId) -> Vec<(NodeId, String)> {
    forest
        .subtree(root)
        .into_iter()
        .filter_map(|id| {
            forest[id]
                .quoted_post
                .as_ref()
                .map(|quote| (id, quote.uri.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FixtureThreadService;
    use crate::measure::MinimumHeight;
    use crate::merge::tests::{thread, uri, with_parent};
    use serde_json::{json, Value};

    fn quoting(mut node: Value, quoted: &str) -> Value {
        node["post"]["embed"] = json!({
            "$type": "app.bsky.embed.record#view",
            "record": {
                "$type": "app.bsky.embed.record#viewRecord",
                "uri": quoted,
                "author": {"did": "did:plc:alice", "handle": "alice.test"},
                "value": {"text": "quoted"}
            }
        });
        node
    }

    struct Harness {
        forest: Forest,
        budget: NodeBudget,
        root: NodeId,
        visible: Vec<NodeId>,
        layout: LayoutEngine,
    }

    impl Harness {
        fn new(main: Value, budget: NodeBudget) -> Self {
            let mut forest = Forest::new();
            let mut budget = budget;
            let raw = serde_json::from_value(main).unwrap();
            let root = TreeBuilder::new(&mut forest, &mut budget, NodeGeometry::default())
                .build_tree(&raw)
                .root
                .unwrap();
            let layout = LayoutEngine::default();
            let visible = layout.layout(&mut forest, root);
            Self {
                forest,
                budget,
                root,
                visible,
                layout,
            }
        }

        fn resolve(&mut self, service: &FixtureThreadService) -> Vec<SatelliteTree> {
            let measure = MinimumHeight(100.0);
            let resolver = QuoteResolver::new(service, &self.layout, &measure, NodeGeometry::default());
            resolver.resolve(&mut self.forest, self.root, &self.visible, &mut self.budget)
        }
    }

    #[test]
    fn builds_satellite_with_target_and_places_it_right() {
        let main = thread(
            "root",
            "2024-01-01T00:00:00Z",
            vec![quoting(thread("a", "2024-01-01T00:01:00Z", vec![]), &uri("q"))],
        );
        let service = FixtureThreadService::new()
            .with_thread(
                &uri("q"),
                with_parent(
                    thread("q", "2024-01-01T00:11:00Z", vec![]),
                    thread("qroot", "2024-01-01T00:10:00Z", vec![]),
                ),
            )
            .with_thread(
                &uri("qroot"),
                thread(
                    "qroot",
                    "2024-01-01T00:10:00Z",
                    vec![thread("q", "2024-01-01T00:11:00Z", vec![thread("qr", "2024-01-01T00:12:00Z", vec![])])],
                ),
            );

        let mut harness = Harness::new(main, NodeBudget::default());
        let satellites = harness.resolve(&service);
        assert_eq!(satellites.len(), 1);

        let satellite = &satellites[0];
        let forest = &harness.forest;
        assert_eq!(forest[satellite.root].uri, uri("qroot"));
        assert_eq!(forest[satellite.source].uri, uri("a"));
        assert_eq!(satellite.target.map(|t| forest[t].uri.clone()), Some(uri("q")));
        assert!(forest[satellite.root].is_satellite);
        assert_eq!(satellite.visible.len(), 3);

        let main_right = harness
            .visible
            .iter()
            .map(|id| forest[*id].right())
            .fold(0.0, f64::max);
        let left = satellite
            .visible
            .iter()
            .map(|id| forest[*id].x)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(left, main_right + 150.0);
        assert_eq!(service.fetches(), vec![uri("q"), uri("qroot")]);
    }

    #[test]
    fn quote_of_post_in_main_tree_is_skipped() {
        let main = thread(
            "root",
            "2024-01-01T00:00:00Z",
            vec![quoting(thread("a", "2024-01-01T00:01:00Z", vec![]), &uri("root"))],
        );
        let service = FixtureThreadService::new();
        let mut harness = Harness::new(main, NodeBudget::default());
        assert!(harness.resolve(&service).is_empty());
        assert!(service.fetches().is_empty());
    }

    #[test]
    fn duplicate_and_already_claimed_quotes_are_resolved_once() {
        // a and b quote q; c quotes x, which lives inside q's thread.
        let main = thread(
            "root",
            "2024-01-01T00:00:00Z",
            vec![
                quoting(thread("a", "2024-01-01T00:01:00Z", vec![]), &uri("q")),
                quoting(thread("b", "2024-01-01T00:02:00Z", vec![]), &uri("q")),
                quoting(thread("c", "2024-01-01T00:03:00Z", vec![]), &uri("x")),
            ],
        );
        let service = FixtureThreadService::new().with_thread(
            &uri("q"),
            thread("q", "2024-01-01T00:10:00Z", vec![thread("x", "2024-01-01T00:11:00Z", vec![])]),
        );
        let mut harness = Harness::new(main, NodeBudget::default());
        let satellites = harness.resolve(&service);
        assert_eq!(satellites.len(), 1);
        assert_eq!(service.fetches(), vec![uri("q")]);

        let mut roots = HashSet::new();
        for satellite in &satellites {
            assert!(roots.insert(harness.forest[satellite.root].uri.clone()));
        }
        let main_uris = harness.forest.uris(harness.root);
        for satellite in &satellites {
            for id in harness.forest.subtree(satellite.root) {
                assert!(!main_uris.contains(&harness.forest[id].uri));
            }
        }
    }

    #[test]
    fn failed_quote_does_not_abort_the_rest() {
        let main = thread(
            "root",
            "2024-01-01T00:00:00Z",
            vec![
                quoting(thread("a", "2024-01-01T00:01:00Z", vec![]), &uri("missing")),
                quoting(thread("b", "2024-01-01T00:02:00Z", vec![]), "at://did:plc:alice/app.bsky.feed.like/1"),
                quoting(thread("c", "2024-01-01T00:03:00Z", vec![]), &uri("ok")),
            ],
        );
        let service = FixtureThreadService::new()
            .with_thread(&uri("ok"), thread("ok", "2024-01-01T00:10:00Z", vec![]));
        let mut harness = Harness::new(main, NodeBudget::default());
        let satellites = harness.resolve(&service);
        assert_eq!(satellites.len(), 1);
        assert_eq!(harness.forest[satellites[0].source].uri, uri("c"));
        assert_eq!(service.fetches(), vec![uri("missing"), uri("ok")]);
    }

    #[test]
    fn satellite_that_exhausts_budget_is_discarded() {
        let main = thread(
            "root",
            "2024-01-01T00:00:00Z",
            vec![
                quoting(thread("a", "2024-01-01T00:01:00Z", vec![]), &uri("q1")),
                quoting(thread("b", "2024-01-01T00:02:00Z", vec![]), &uri("q2")),
            ],
        );
        let service = FixtureThreadService::new()
            .with_thread(
                &uri("q1"),
                thread("q1root", "2024-01-01T00:10:00Z", vec![thread("q1", "2024-01-01T00:11:00Z", vec![])]),
            )
            .with_thread(&uri("q2"), thread("q2", "2024-01-01T00:20:00Z", vec![]));

        // Main tree takes 3 of 4 slots; q1's thread only gets its root in.
        let mut harness = Harness::new(main, NodeBudget::new(4, 50));
        let satellites = harness.resolve(&service);
        assert!(satellites.is_empty());
        assert_eq!(harness.budget.used(), 4);
        assert_eq!(harness.forest.len(), 3);
        assert_eq!(service.fetches(), vec![uri("q1")]);
    }

    #[test]
    fn satellites_fitting_the_budget_are_kept() {
        let main = thread(
            "root",
            "2024-01-01T00:00:00Z",
            vec![
                quoting(thread("a", "2024-01-01T00:01:00Z", vec![]), &uri("q1")),
                quoting(thread("b", "2024-01-01T00:02:00Z", vec![]), &uri("q2")),
            ],
        );
        let service = FixtureThreadService::new()
            .with_thread(&uri("q1"), thread("q1", "2024-01-01T00:10:00Z", vec![]))
            .with_thread(
                &uri("q2"),
                thread("q2", "2024-01-01T00:20:00Z", vec![thread("q2r", "2024-01-01T00:21:00Z", vec![])]),
            );

        // q1 takes the 5th slot; q2's thread fills the last two and exhausts the budget.
        let mut harness = Harness::new(main, NodeBudget::new(6, 50));
        let satellites = harness.resolve(&service);
        assert_eq!(satellites.len(), 1);
        assert_eq!(harness.forest[satellites[0].root].uri, uri("q1"));
        assert!(!satellites[0].truncated);
        assert_eq!(harness.forest.len(), 4);
        assert_eq!(service.fetches(), vec![uri("q1"), uri("q2")]);
    }
}
