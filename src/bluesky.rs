use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

pub const PUBLIC_API_BASE: &str = "https://public.api.bsky.app/";
pub const WEB_BASE: &str = "https://bsky.app";

const RESOLVE_HANDLE: &str = "xrpc/com.atproto.identity.resolveHandle";
const GET_POST_THREAD: &str = "xrpc/app.bsky.feed.getPostThread";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub thread_depth: u32,
    pub parent_height: u32,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    thread_depth: u32,
    parent_height: u32,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("bluesky client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| PUBLIC_API_BASE.to_string());
        let base_url = Url::parse(&base).with_context(|| format!("parse api base url {base}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            thread_depth: config.thread_depth.max(1),
            parent_height: config.parent_height,
        })
    }

    pub fn resolve_handle(&self, handle: &str) -> Result<String> {
        let resp: ResolveHandleResponse = self.get(RESOLVE_HANDLE, &[("handle", handle)])?;
        Ok(resp.did)
    }

    pub fn post_thread(&self, uri: &str) -> Result<ThreadView> {
        let depth = self.thread_depth.to_string();
        let parent_height = self.parent_height.to_string();
        let resp: PostThreadResponse = self.get(
            GET_POST_THREAD,
            &[
                ("uri", uri),
                ("depth", depth.as_str()),
                ("parentHeight", parent_height.as_str()),
            ],
        )?;
        Ok(resp.thread)
    }

    fn get<T>(&self, path: &str, params: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut url = self.base_url.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()?;
        if resp.status().is_success() {
            return resp.json().context("bluesky: decode response");
        }

        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<XrpcError>(&body)
            .ok()
            .and_then(|err| err.message.or(err.error))
            .unwrap_or(body);
        match status.as_u16() {
            400 => Err(anyhow!("bluesky: bad request: {}", message)),
            404 => Err(anyhow!("bluesky: not found: {}", message)),
            429 => Err(anyhow!("bluesky: rate limited: {}", message)),
            _ => Err(anyhow!("bluesky: api error {}: {}", status, message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

#[derive(Debug, Deserialize)]
struct PostThreadResponse {
    thread: ThreadView,
}

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// One node of a `getPostThread` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ThreadView {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post(Box<ThreadViewPost>),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound(Tombstone),
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked(Tombstone),
    #[serde(other)]
    Unknown,
}

impl ThreadView {
    pub fn is_tombstone(&self) -> bool {
        !matches!(self, ThreadView::Post(_))
    }

    pub fn as_post(&self) -> Option<&ThreadViewPost> {
        match self {
            ThreadView::Post(post) => Some(post),
            ThreadView::NotFound(_) | ThreadView::Blocked(_) | ThreadView::Unknown => None,
        }
    }

    pub fn into_post(self) -> Option<ThreadViewPost> {
        match self {
            ThreadView::Post(post) => Some(*post),
            ThreadView::NotFound(_) | ThreadView::Blocked(_) | ThreadView::Unknown => None,
        }
    }

    pub fn post_uri(&self) -> Option<&str> {
        self.as_post().map(|p| p.post.uri.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tombstone {
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadViewPost {
    pub post: PostView,
    #[serde(default)]
    pub parent: Option<Box<ThreadView>>,
    #[serde(default)]
    pub replies: Vec<ThreadView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
    pub author: Author,
    #[serde(default)]
    pub record: PostRecord,
    #[serde(default)]
    pub embed: Option<EmbedView>,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Author {
    pub fn display_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.handle,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub facets: Vec<RawFacet>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFacet {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<RawFacetFeature>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFacetFeature {
    #[serde(rename = "$type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

/// The embed views a post can carry. Anything else (video, starter packs,
/// feed generators) lands in `Unsupported`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbedView {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images(ImagesView),
    #[serde(rename = "app.bsky.embed.external#view")]
    External(ExternalView),
    #[serde(rename = "app.bsky.embed.record#view")]
    Record(RecordView),
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia(RecordWithMediaView),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesView {
    #[serde(default)]
    pub images: Vec<ImageView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    #[serde(default)]
    pub thumb: String,
    #[serde(default)]
    pub fullsize: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalView {
    pub external: ExternalViewData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalViewData {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordView {
    pub record: EmbeddedRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordWithMediaView {
    pub record: RecordView,
    pub media: Box<EmbedView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbeddedRecord {
    #[serde(rename = "app.bsky.embed.record#viewRecord")]
    Post(Box<ViewRecord>),
    #[serde(other)]
    Unavailable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewRecord {
    pub uri: String,
    pub author: Author,
    #[serde(default)]
    pub value: PostRecord,
    #[serde(default)]
    pub embeds: Vec<EmbedView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_thread_with_tombstones() {
        let raw = json!({
            "$type": "app.bsky.feed.defs#threadViewPost",
            "post": {
                "uri": "at://did:plc:a/app.bsky.feed.post/1",
                "cid": "bafy",
                "author": {"did": "did:plc:a", "handle": "a.test"},
                "record": {"$type": "app.bsky.feed.post", "text": "hi", "createdAt": "2024-01-01T00:00:00Z"},
                "likeCount": 3
            },
            "parent": {"$type": "app.bsky.feed.defs#blockedPost", "uri": "at://x", "blocked": true},
            "replies": [
                {"$type": "app.bsky.feed.defs#notFoundPost", "uri": "at://y", "notFound": true},
                {"$type": "app.bsky.feed.defs#somethingNew"}
            ]
        });
        let thread: ThreadView = serde_json::from_value(raw).unwrap();
        let post = thread.as_post().unwrap();
        assert_eq!(post.post.like_count, 3);
        assert_eq!(post.post.author.display_name(), "a.test");
        assert!(post.parent.as_ref().unwrap().is_tombstone());
        assert!(post.replies.iter().all(ThreadView::is_tombstone));
    }

    #[test]
    fn decodes_nested_record_with_media() {
        let raw = json!({
            "$type": "app.bsky.embed.recordWithMedia#view",
            "record": {
                "record": {
                    "$type": "app.bsky.embed.record#viewRecord",
                    "uri": "at://did:plc:q/app.bsky.feed.post/9",
                    "author": {"did": "did:plc:q", "handle": "q.test", "displayName": "Q"},
                    "value": {"text": "quoted"},
                    "embeds": []
                }
            },
            "media": {
                "$type": "app.bsky.embed.images#view",
                "images": [{"thumb": "t", "fullsize": "f", "alt": "a"}]
            }
        });
        let embed: EmbedView = serde_json::from_value(raw).unwrap();
        match embed {
            EmbedView::RecordWithMedia(view) => {
                assert!(matches!(view.record.record, EmbeddedRecord::Post(_)));
                assert!(matches!(*view.media, EmbedView::Images(_)));
            }
            other => panic!("unexpected embed {other:?}"),
        }
    }

    #[test]
    fn client_requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }
}
