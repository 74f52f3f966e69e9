use crate::node::{Forest, NodeId, PostNode};

/// Supplies the rendered height of a node before layout runs.
pub trait DimensionProvider {
    fn height(&self, node: &PostNode) -> f64;
}

/// Every node gets the same height.
#[derive(Debug, Clone, Copy)]
pub struct MinimumHeight(pub f64);

impl DimensionProvider for MinimumHeight {
    fn height(&self, _node: &PostNode) -> f64 {
        self.0
    }
}

/// Estimates card height from wrapped text plus fixed allowances for
/// the header, engagement row, image grid and quote box.
#[derive(Debug, Clone)]
pub struct TextMetrics {
    pub columns: usize,
    pub line_height: f64,
    pub chrome: f64,
    pub image_grid: f64,
    pub external_card: f64,
    pub quote_chrome: f64,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self {
            columns: 42,
            line_height: 18.0,
            chrome: 64.0,
            image_grid: 150.0,
            external_card: 70.0,
            quote_chrome: 44.0,
        }
    }
}

impl TextMetrics {
    fn text_height(&self, text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }
        let lines = textwrap::wrap(text, self.columns.max(1)).len();
        lines as f64 * self.line_height
    }
}

impl DimensionProvider for TextMetrics {
    fn height(&self, node: &PostNode) -> f64 {
        let mut height = self.chrome + self.text_height(&node.text);
        if !node.images.is_empty() {
            height += self.image_grid;
        }
        if node.external.is_some() {
            height += self.external_card;
        }
        if let Some(quote) = &node.quoted_post {
            height += self.quote_chrome + self.text_height(&quote.text);
            if !quote.images.is_empty() {
                height += self.image_grid / 2.0;
            }
        }
        height
    }
}

/// Stores measured heights for every node under `root`, floored at `min_height`.
pub fn apply_dimensions(
    forest: &mut Forest,
    root: NodeId,
    provider: &dyn DimensionProvider,
    min_height: f64,
) {
    for id in forest.subtree(root) {
        let measured = provider.height(&forest[id]);
        let node = &mut forest[id];
        node.height = measured.max(min_height);
        node.layout_valid = false;
    }
}
