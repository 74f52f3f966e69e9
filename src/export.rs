use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::node::{Forest, NodeId};
use crate::post_ref;
use crate::richtext::{self, Segment};
use crate::session::{Bounds, Session};

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    /// 0 for the main tree, 1.. for satellite trees in placement order.
    pub tree: usize,
    pub uri: String,
    pub web_url: Option<String>,
    pub handle: String,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub segments: Vec<Segment>,
    pub image_count: usize,
    pub like_count: u64,
    pub reply_count: u64,
    pub repost_count: u64,
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub collapsed: bool,
    pub hidden_descendants: usize,
    pub is_satellite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteLink {
    pub source: NodeId,
    pub target: Option<NodeId>,
    pub tree: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForestSnapshot {
    pub status: String,
    pub bounds: Option<Bounds>,
    pub nodes: Vec<NodeSnapshot>,
    pub links: Vec<QuoteLink>,
}

/// Positioned view of every visible node plus quote linkage, for renderers.
pub fn snapshot(session: &Session) -> ForestSnapshot {
    let forest = session.forest();
    let mut nodes: Vec<NodeSnapshot> = session
        .main_visible()
        .iter()
        .map(|id| node_snapshot(forest, *id, 0))
        .collect();
    let mut links = Vec::new();
    for (idx, satellite) in session.satellites().iter().enumerate() {
        let tree = idx + 1;
        nodes.extend(
            satellite
                .visible
                .iter()
                .map(|id| node_snapshot(forest, *id, tree)),
        );
        links.push(QuoteLink {
            source: satellite.source,
            target: satellite.target,
            tree,
        });
    }

    ForestSnapshot {
        status: session.report().to_string(),
        bounds: session.bounds(),
        nodes,
        links,
    }
}

fn node_snapshot(forest: &Forest, id: NodeId, tree: usize) -> NodeSnapshot {
    let node = &forest[id];
    NodeSnapshot {
        id,
        tree,
        uri: node.uri.clone(),
        web_url: post_ref::web_url(&node.uri, &node.handle),
        handle: node.handle.clone(),
        display_name: node.display_name.clone(),
        created_at: node.created_at,
        segments: richtext::segments(&node.text, &node.facets),
        image_count: node.images.len(),
        like_count: node.like_count,
        reply_count: node.reply_count,
        repost_count: node.repost_count,
        depth: node.depth,
        parent: node.parent,
        x: node.x,
        y: node.y,
        width: node.width,
        height: node.height,
        collapsed: node.collapsed,
        hidden_descendants: if node.collapsed {
            forest.descendant_count(id)
        } else {
            0
        },
        is_satellite: node.is_satellite,
    }
}

/// Indented text rendering of the main tree followed by each quoted thread.
pub fn outline(session: &Session, now: DateTime<Utc>) -> String {
    let forest = session.forest();
    let mut out = String::new();
    let _ = writeln!(out, "{}", session.report());
    let Some(root) = session.main_root() else {
        return out;
    };

    write_tree(&mut out, forest, session.main_visible(), root, now);
    for satellite in session.satellites() {
        let source = &forest[satellite.source];
        let _ = writeln!(out, "\nquoted by @{}:", source.handle);
        write_tree(&mut out, forest, &satellite.visible, satellite.root, now);
    }
    out
}

fn write_tree(out: &mut String, forest: &Forest, visible: &[NodeId], root: NodeId, now: DateTime<Utc>) {
    let base = forest[root].depth;
    for id in visible {
        let node = &forest[*id];
        let indent = "  ".repeat(node.depth - base);
        let age = node
            .created_at
            .map(|ts| format_age(ts, now))
            .unwrap_or_default();
        let first_line = node.text.lines().next().unwrap_or_default();
        let _ = write!(out, "{indent}@{} {age}: {first_line}", node.handle);
        if node.collapsed && !node.is_leaf() {
            let _ = write!(out, " [+{}]", forest.descendant_count(*id));
        }
        out.push('\n');
    }
}

/// Compact age of a post relative to `now`.
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(created_at);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m")
    } else if hours < 24 {
        format!("{hours}h")
    } else if days < 7 {
        format!("{days}d")
    } else {
        created_at.format("%b %-d").to_string()
    }
}
