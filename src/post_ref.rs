use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::bluesky::WEB_BASE;
use crate::data::ThreadError;

pub const POST_COLLECTION: &str = "app.bsky.feed.post";

static WEB_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bsky\.app/profile/([^/?#]+)/post/([a-zA-Z0-9]+)").expect("valid post url regex")
});
static AT_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^at://([^/]+)/app\.bsky\.feed\.post/([^/?#]+)$").expect("valid at-uri regex")
});
static FRAGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?([^/#\s]+)/([a-zA-Z0-9]+)$").expect("valid fragment regex"));

/// A post addressed by its author (handle or DID) and record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostRef {
    pub author: String,
    pub rkey: String,
}

impl PostRef {
    pub fn new(author: impl Into<String>, rkey: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            rkey: rkey.into(),
        }
    }

    /// Accepts a bsky.app post URL, an AT-URI, or a `handle/rkey` bookmark fragment.
    pub fn parse(input: &str) -> Result<Self, ThreadError> {
        let input = input.trim();
        if input.starts_with("at://") {
            return Self::from_at_uri(input);
        }
        if let Some(caps) = WEB_URL_RE.captures(input) {
            return Ok(Self::new(&caps[1], &caps[2]));
        }
        if let Some(caps) = FRAGMENT_RE.captures(input) {
            return Ok(Self::new(&caps[1], &caps[2]));
        }
        Err(ThreadError::Structural(format!(
            "Invalid Bluesky URL format: {input}"
        )))
    }

    pub fn from_at_uri(uri: &str) -> Result<Self, ThreadError> {
        AT_URI_RE
            .captures(uri)
            .map(|caps| Self::new(&caps[1], &caps[2]))
            .ok_or_else(|| ThreadError::Structural(format!("Malformed post URI: {uri}")))
    }

    pub fn has_did(&self) -> bool {
        is_did(&self.author)
    }

    pub fn at_uri(&self) -> String {
        format!("at://{}/{}/{}", self.author, POST_COLLECTION, self.rkey)
    }

    pub fn web_url(&self) -> String {
        format!("{}/profile/{}/post/{}", WEB_BASE, self.author, self.rkey)
    }

    /// Bookmark fragment without the leading `#`.
    pub fn fragment(&self) -> String {
        format!("{}/{}", self.author, self.rkey)
    }
}

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.at_uri())
    }
}

pub fn is_did(author: &str) -> bool {
    author.starts_with("did:")
}

/// Web URL for a post AT-URI, addressed through the author's handle.
pub fn web_url(uri: &str, handle: &str) -> Option<String> {
    PostRef::from_at_uri(uri)
        .ok()
        .map(|post| PostRef::new(handle, post.rkey).web_url())
}
