use crate::node::{Forest, NodeId, SatelliteTree};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    /// Gap between sibling subtrees.
    pub h_gap: f64,
    /// Gap between a parent's bottom edge and its children's top edge.
    pub v_gap: f64,
    /// Gap between the main tree and each satellite tree.
    pub tree_gap: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            h_gap: 20.0,
            v_gap: 30.0,
            tree_gap: 150.0,
        }
    }
}

/// Centered tidy-tree placement over the visible part of a tree.
///
/// The width pass (post-order) gives each node a `subtree_width` floored at its
/// own width. The position pass (pre-order) packs children left to right inside
/// the parent's allotment and centers the parent over its children's span.
#[derive(Debug, Clone, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Lays out the tree under `root` with its top-left allotment at the origin.
    /// Returns the visible nodes in pre-order.
    pub fn layout(&self, forest: &mut Forest, root: NodeId) -> Vec<NodeId> {
        self.layout_at(forest, root, 0.0, 0.0)
    }

    pub fn layout_at(&self, forest: &mut Forest, root: NodeId, x: f64, y: f64) -> Vec<NodeId> {
        self.measure(forest, root);
        let mut visible = Vec::new();
        self.place(forest, root, x, y, &mut visible);
        visible
    }

    fn measure(&self, forest: &mut Forest, id: NodeId) -> f64 {
        let node = &forest[id];
        let own = node.width;
        if !node.shows_children() {
            forest[id].subtree_width = own;
            return own;
        }

        let children = node.children.clone();
        for child in &children {
            self.measure(forest, *child);
        }
        let width = own.max(self.span(forest, &children));
        forest[id].subtree_width = width;
        width
    }

    /// Children's subtree widths with one gap between each pair.
    fn span(&self, forest: &Forest, children: &[NodeId]) -> f64 {
        let mut span = 0.0;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                span += self.config.h_gap;
            }
            span += forest[*child].subtree_width;
        }
        span
    }

    fn place(&self, forest: &mut Forest, id: NodeId, x: f64, y: f64, visible: &mut Vec<NodeId>) {
        visible.push(id);
        let node = &mut forest[id];
        node.y = y;
        node.layout_valid = true;

        if !node.shows_children() {
            node.x = x + (node.subtree_width - node.width) / 2.0;
            return;
        }

        let children = node.children.clone();
        let child_y = y + node.height + self.config.v_gap;
        let allotment = node.subtree_width;
        let span = self.span(forest, &children);
        // A parent wider than its children keeps them centered inside its allotment.
        let mut child_x = x + (allotment - span) / 2.0;
        for child in &children {
            self.place(forest, *child, child_x, child_y, visible);
            child_x += forest[*child].subtree_width + self.config.h_gap;
        }

        let (Some(first), Some(last)) = (children.first(), children.last()) else {
            return;
        };
        let left = forest[*first].x;
        let right = forest[*last].right();
        let node = &mut forest[id];
        node.x = (left + right) / 2.0 - node.width / 2.0;
    }

    /// Lays out each satellite tree and lines them up left to right,
    /// starting one tree gap right of the main tree's rightmost edge.
    pub fn arrange_satellites(
        &self,
        forest: &mut Forest,
        main_visible: &[NodeId],
        satellites: &mut [SatelliteTree],
    ) {
        let main_right = main_visible
            .iter()
            .map(|id| forest[*id].right())
            .fold(0.0, f64::max);
        let mut cursor = main_right + self.config.tree_gap;

        for satellite in satellites.iter_mut() {
            satellite.visible = self.layout(forest, satellite.root);
            let left = satellite
                .visible
                .iter()
                .map(|id| forest[*id].x)
                .fold(f64::INFINITY, f64::min);
            let offset = cursor - left;
            for id in &satellite.visible {
                forest[*id].x += offset;
            }
            let right = satellite
                .visible
                .iter()
                .map(|id| forest[*id].right())
                .fold(0.0, f64::max);
            cursor = right + self.config.tree_gap;
        }
    }
}

/// Sets the collapse state of `id`, marking it and its ancestors as needing layout.
/// Returns false when the state did not change.
pub fn set_collapsed(forest: &mut Forest, id: NodeId, collapsed: bool) -> bool {
    if forest[id].collapsed == collapsed {
        return false;
    }
    forest[id].collapsed = collapsed;
    for ancestor in forest.ancestors_inclusive(id) {
        forest[ancestor].layout_valid = false;
    }
    true
}

/// True when any visible node under `root` lacks a current layout.
pub fn needs_layout(forest: &Forest, root: NodeId) -> bool {
    forest
        .visible(root)
        .into_iter()
        .any(|id| !forest[id].layout_valid)
}
