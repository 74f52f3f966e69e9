use std::collections::HashSet;
use std::ops::{Index, IndexMut};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Handle into a [`Forest`]. Only valid for the forest that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FacetFeature {
    Link { uri: String },
    Mention { did: String },
    Tag { tag: String },
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facet {
    pub byte_start: usize,
    pub byte_end: usize,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRef {
    pub thumbnail: String,
    pub fullsize: String,
    pub alt_text: String,
    pub aspect_ratio: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotedPost {
    pub uri: String,
    pub author_did: String,
    pub handle: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub text: String,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalLink {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
}

impl ExternalLink {
    /// Video id when the link points at a YouTube watch, embed or short URL.
    pub fn youtube_video_id(&self) -> Option<&str> {
        static YOUTUBE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
            [
                r"youtu\.be/([a-zA-Z0-9_-]{11})",
                r"youtube\.com/watch\?v=([a-zA-Z0-9_-]{11})",
                r"youtube\.com/embed/([a-zA-Z0-9_-]{11})",
                r"youtube\.com/v/([a-zA-Z0-9_-]{11})",
            ]
            .iter()
            .map(|pattern| Regex::new(pattern).expect("valid youtube regex"))
            .collect()
        });

        YOUTUBE_RES.iter().find_map(|re| {
            re.captures(&self.uri)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
    }
}

/// One post placed in a reconstructed thread.
#[derive(Debug, Clone)]
pub struct PostNode {
    pub uri: String,
    pub author_did: String,
    pub handle: String,
    pub display_name: String,
    pub avatar: Option<String>,

    pub text: String,
    pub facets: Vec<Facet>,
    pub images: Vec<ImageRef>,
    pub quoted_post: Option<QuotedPost>,
    pub external: Option<ExternalLink>,

    pub like_count: u64,
    pub reply_count: u64,
    pub repost_count: u64,
    pub created_at: Option<DateTime<Utc>>,

    pub depth: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,

    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub subtree_width: f64,
    pub collapsed: bool,
    /// Cleared when this node or a descendant changes collapse state.
    pub layout_valid: bool,

    pub is_satellite: bool,
}

impl PostNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Collapsed and childless nodes both hide nothing below them for layout purposes.
    pub fn shows_children(&self) -> bool {
        !self.collapsed && !self.children.is_empty()
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Arena owning every node of the main tree and all satellite trees of a session.
///
/// Ownership runs parent to children through `children`; `parent` is a plain
/// handle used for upward walks.
#[derive(Debug, Default)]
pub struct Forest {
    nodes: Vec<PostNode>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Drops every node issued at or after position `len`.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    pub fn insert(&mut self, node: PostNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&PostNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut PostNode> {
        self.nodes.get_mut(id.0)
    }

    /// Every node reachable from `root` through `children`, in pre-order.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        self.walk(root, false)
    }

    /// Nodes reachable from `root` without descending into collapsed nodes, in pre-order.
    pub fn visible(&self, root: NodeId) -> Vec<NodeId> {
        self.walk(root, true)
    }

    fn walk(&self, root: NodeId, skip_collapsed: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = &self[id];
            out.push(id);
            if skip_collapsed && node.collapsed {
                continue;
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    pub fn find_by_uri(&self, root: NodeId, uri: &str) -> Option<NodeId> {
        self.subtree(root)
            .into_iter()
            .find(|id| self[*id].uri == uri)
    }

    pub fn uris(&self, root: NodeId) -> HashSet<String> {
        self.subtree(root)
            .into_iter()
            .map(|id| self[id].uri.clone())
            .collect()
    }

    pub fn descendant_count(&self, id: NodeId) -> usize {
        self.subtree(id).len() - 1
    }

    /// `id` followed by each ancestor up to its tree root.
    pub fn ancestors_inclusive(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = self[id].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self[parent].parent;
        }
        chain
    }

    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self[current].parent {
            current = parent;
        }
        current
    }
}

impl Index<NodeId> for Forest {
    type Output = PostNode;

    fn index(&self, id: NodeId) -> &PostNode {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for Forest {
    fn index_mut(&mut self, id: NodeId) -> &mut PostNode {
        &mut self.nodes[id.0]
    }
}

/// A thread reached through a quote embed, placed beside the main tree.
#[derive(Debug, Clone)]
pub struct SatelliteTree {
    /// Node in the main forest whose quote embed triggered the fetch.
    pub source: NodeId,
    /// The quoted post inside this tree, if it was admitted.
    pub target: Option<NodeId>,
    pub root: NodeId,
    pub visible: Vec<NodeId>,
    pub truncated: bool,
}
