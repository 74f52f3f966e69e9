use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bluesky::{self, ThreadView};
use crate::post_ref::PostRef;

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("Could not resolve handle {handle}: {reason}")]
    Resolution { handle: String, reason: String },
    #[error("Could not fetch thread {uri}: {reason}")]
    Fetch { uri: String, reason: String },
    #[error("{0}")]
    Structural(String),
    #[error("Could not build thread tree: {uri} is unavailable")]
    Unavailable { uri: String },
}

pub trait IdentityResolver: Send + Sync {
    fn resolve_handle(&self, handle: &str) -> Result<String, ThreadError>;
}

pub trait ThreadFetcher: Send + Sync {
    fn fetch_thread(&self, did: &str, rkey: &str) -> Result<ThreadView, ThreadError>;
}

pub struct BlueskyThreadService {
    client: Arc<bluesky::Client>,
}

impl BlueskyThreadService {
    pub fn new(client: Arc<bluesky::Client>) -> Self {
        Self { client }
    }
}

impl IdentityResolver for BlueskyThreadService {
    fn resolve_handle(&self, handle: &str) -> Result<String, ThreadError> {
        self.client
            .resolve_handle(handle)
            .map_err(|err| ThreadError::Resolution {
                handle: handle.to_string(),
                reason: format!("{err:#}"),
            })
    }
}

impl ThreadFetcher for BlueskyThreadService {
    fn fetch_thread(&self, did: &str, rkey: &str) -> Result<ThreadView, ThreadError> {
        let uri = PostRef::new(did, rkey).at_uri();
        self.client
            .post_thread(&uri)
            .map_err(|err| ThreadError::Fetch {
                uri,
                reason: format!("{err:#}"),
            })
    }
}

/// In-memory thread source keyed by AT-URI. Records every fetch in call order.
#[derive(Default)]
pub struct FixtureThreadService {
    handles: HashMap<String, String>,
    threads: HashMap<String, serde_json::Value>,
    fetches: Mutex<Vec<String>>,
}

impl FixtureThreadService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(mut self, handle: &str, did: &str) -> Self {
        self.handles.insert(handle.to_string(), did.to_string());
        self
    }

    /// Registers the `getPostThread` payload returned for `uri`.
    pub fn with_thread(mut self, uri: &str, thread: serde_json::Value) -> Self {
        self.threads.insert(uri.to_string(), thread);
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

impl IdentityResolver for FixtureThreadService {
    fn resolve_handle(&self, handle: &str) -> Result<String, ThreadError> {
        self.handles
            .get(handle)
            .cloned()
            .ok_or_else(|| ThreadError::Resolution {
                handle: handle.to_string(),
                reason: "unknown handle".into(),
            })
    }
}

impl ThreadFetcher for FixtureThreadService {
    fn fetch_thread(&self, did: &str, rkey: &str) -> Result<ThreadView, ThreadError> {
        let uri = PostRef::new(did, rkey).at_uri();
        self.fetches.lock().push(uri.clone());
        let raw = self.threads.get(&uri).cloned().ok_or_else(|| ThreadError::Fetch {
            uri: uri.clone(),
            reason: "no fixture".into(),
        })?;
        serde_json::from_value(raw).map_err(|err| ThreadError::Fetch {
            uri,
            reason: err.to_string(),
        })
    }
}
