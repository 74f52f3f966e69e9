use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bluesky::{PostView, RawFacet, ThreadView};
use crate::embed;
use crate::node::{Facet, FacetFeature, Forest, NodeId, PostNode};

pub const DEFAULT_MAX_NODES: usize = 500;
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Node and depth caps shared by the main tree and every satellite tree of one session.
#[derive(Debug, Clone)]
pub struct NodeBudget {
    max_nodes: usize,
    max_depth: usize,
    used: usize,
}

impl Default for NodeBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODES, DEFAULT_MAX_DEPTH)
    }
}

impl NodeBudget {
    pub fn new(max_nodes: usize, max_depth: usize) -> Self {
        Self {
            max_nodes,
            max_depth,
            used: 0,
        }
    }

    /// Called once per fresh main-tree load, never between satellite builds.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn remaining(&self) -> usize {
        self.max_nodes.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_nodes
    }

    fn admit(&mut self, depth: usize) -> bool {
        if depth > self.max_depth || self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NodeGeometry {
    pub width: f64,
    pub min_height: f64,
}

impl Default for NodeGeometry {
    fn default() -> Self {
        Self {
            width: 320.0,
            min_height: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    pub root: Option<NodeId>,
    /// Set when the node or depth cap refused at least one post.
    pub truncated: bool,
}

/// Converts merged raw threads into [`PostNode`]s inside a [`Forest`].
pub struct TreeBuilder<'a> {
    forest: &'a mut Forest,
    budget: &'a mut NodeBudget,
    geometry: NodeGeometry,
    satellite: bool,
    known: Option<&'a HashSet<String>>,
    truncated: bool,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(forest: &'a mut Forest, budget: &'a mut NodeBudget, geometry: NodeGeometry) -> Self {
        Self {
            forest,
            budget,
            geometry,
            satellite: false,
            known: None,
            truncated: false,
        }
    }

    /// Tags every built node as part of a quote-resolved tree.
    pub fn satellite(mut self, satellite: bool) -> Self {
        self.satellite = satellite;
        self
    }

    /// Posts whose URI is in `known` are treated as absent.
    pub fn excluding(mut self, known: &'a HashSet<String>) -> Self {
        self.known = Some(known);
        self
    }

    pub fn build_tree(mut self, thread: &ThreadView) -> BuildOutcome {
        let root = self.build(thread, None, 0);
        if self.truncated {
            debug!(
                used = self.budget.used(),
                max_nodes = self.budget.max_nodes(),
                "tree construction truncated by node budget"
            );
        }
        BuildOutcome {
            root,
            truncated: self.truncated,
        }
    }

    /// Admits `thread` and its replies depth-first, returning `None` when nothing was admitted.
    pub fn build(
        &mut self,
        thread: &ThreadView,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Option<NodeId> {
        let raw = thread.as_post()?;
        if self
            .known
            .is_some_and(|known| known.contains(&raw.post.uri))
        {
            return None;
        }
        if !self.budget.admit(depth) {
            self.truncated = true;
            return None;
        }

        let node = self.node_from_post(&raw.post, parent, depth);
        let id = self.forest.insert(node);

        let mut children: Vec<NodeId> = raw
            .replies
            .iter()
            .filter_map(|reply| self.build(reply, Some(id), depth + 1))
            .collect();
        children.sort_by_key(|child| self.forest[*child].created_at);
        self.forest[id].children = children;

        Some(id)
    }

    fn node_from_post(&self, post: &PostView, parent: Option<NodeId>, depth: usize) -> PostNode {
        let content = embed::extract(post.embed.as_ref());
        PostNode {
            uri: post.uri.clone(),
            author_did: post.author.did.clone(),
            handle: post.author.handle.clone(),
            display_name: post.author.display_name().to_string(),
            avatar: post.author.avatar.clone(),
            text: post.record.text.clone(),
            facets: post.record.facets.iter().map(facet).collect(),
            images: content.images,
            quoted_post: content.quoted_post,
            external: content.external,
            like_count: post.like_count,
            reply_count: post.reply_count,
            repost_count: post.repost_count,
            created_at: post.record.created_at.as_deref().and_then(parse_timestamp),
            depth,
            parent,
            children: Vec::new(),
            x: 0.0,
            y: 0.0,
            width: self.geometry.width,
            height: self.geometry.min_height,
            subtree_width: self.geometry.width,
            collapsed: false,
            layout_valid: false,
            is_satellite: self.satellite,
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn facet(raw: &RawFacet) -> Facet {
    Facet {
        byte_start: raw.index.byte_start,
        byte_end: raw.index.byte_end,
        features: raw
            .features
            .iter()
            .map(|feature| match feature.kind.as_str() {
                "app.bsky.richtext.facet#link" => FacetFeature::Link {
                    uri: feature.uri.clone().unwrap_or_default(),
                },
                "app.bsky.richtext.facet#mention" => FacetFeature::Mention {
                    did: feature.did.clone().unwrap_or_default(),
                },
                "app.bsky.richtext.facet#tag" => FacetFeature::Tag {
                    tag: feature.tag.clone().unwrap_or_default(),
                },
                other => FacetFeature::Other {
                    kind: other.to_string(),
                },
            })
            .collect(),
    }
}
