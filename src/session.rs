use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::bluesky::{ThreadView, ThreadViewPost};
use crate::builder::{NodeBudget, NodeGeometry, TreeBuilder};
use crate::data::{IdentityResolver, ThreadError, ThreadFetcher};
use crate::layout::{self, LayoutConfig, LayoutEngine};
use crate::measure::{apply_dimensions, DimensionProvider, MinimumHeight};
use crate::merge;
use crate::node::{Forest, NodeId, SatelliteTree};
use crate::post_ref::PostRef;
use crate::quotes::QuoteResolver;

#[derive(Debug, Clone)]
pub struct Settings {
    pub max_nodes: usize,
    pub max_depth: usize,
    pub geometry: NodeGeometry,
    pub layout: LayoutConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_nodes: crate::builder::DEFAULT_MAX_NODES,
            max_depth: crate::builder::DEFAULT_MAX_DEPTH,
            geometry: NodeGeometry::default(),
            layout: LayoutConfig::default(),
        }
    }
}

/// Summary of one load, rendered as the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub main_posts: usize,
    pub satellite_trees: usize,
    pub satellite_posts: usize,
    pub limit_reached: bool,
    pub max_nodes: usize,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loaded {} posts", self.main_posts)?;
        if self.satellite_trees > 0 {
            let plural = if self.satellite_trees > 1 { "s" } else { "" };
            write!(
                f,
                " + {} quoted thread{} ({} posts)",
                self.satellite_trees, plural, self.satellite_posts
            )?;
        }
        if self.limit_reached {
            write!(f, " (limited to {} nodes)", self.max_nodes)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Drives one user-initiated load at a time and owns the resulting forest.
pub struct Session {
    resolver: Arc<dyn IdentityResolver>,
    fetcher: Arc<dyn ThreadFetcher>,
    measure: Box<dyn DimensionProvider>,
    settings: Settings,
    engine: LayoutEngine,
    forest: Forest,
    budget: NodeBudget,
    main_root: Option<NodeId>,
    main_visible: Vec<NodeId>,
    satellites: Vec<SatelliteTree>,
    selected: Option<NodeId>,
    truncated: bool,
}

impl Session {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        fetcher: Arc<dyn ThreadFetcher>,
        settings: Settings,
    ) -> Self {
        let measure = Box::new(MinimumHeight(settings.geometry.min_height));
        Self {
            resolver,
            fetcher,
            measure,
            engine: LayoutEngine::new(settings.layout),
            budget: NodeBudget::new(settings.max_nodes, settings.max_depth),
            settings,
            forest: Forest::new(),
            main_root: None,
            main_visible: Vec::new(),
            satellites: Vec::new(),
            selected: None,
            truncated: false,
        }
    }

    pub fn with_measure(mut self, measure: Box<dyn DimensionProvider>) -> Self {
        self.measure = measure;
        self
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn main_root(&self) -> Option<NodeId> {
        self.main_root
    }

    pub fn main_visible(&self) -> &[NodeId] {
        &self.main_visible
    }

    pub fn satellites(&self) -> &[SatelliteTree] {
        &self.satellites
    }

    pub fn budget(&self) -> &NodeBudget {
        &self.budget
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    /// Loads the thread containing the post referenced by `input`, then every
    /// thread it quotes. Errors before the main tree exists abort the load and
    /// leave the session empty.
    pub fn load(&mut self, input: &str) -> Result<LoadReport, ThreadError> {
        self.clear();

        let post = PostRef::parse(input)?;
        let did = if post.has_did() {
            post.author.clone()
        } else {
            self.resolver.resolve_handle(&post.author)?
        };
        let post = PostRef::new(did, post.rkey);

        let thread = merge::fetch_full_thread(self.fetcher.as_ref(), &post)?;
        let root = self.merge_and_build_main_tree(thread)?;
        self.main_visible = self.engine.layout(&mut self.forest, root);
        self.selected = Some(root);

        let resolver = QuoteResolver::new(
            self.fetcher.as_ref(),
            &self.engine,
            self.measure.as_ref(),
            self.settings.geometry,
        );
        self.satellites =
            resolver.resolve(&mut self.forest, root, &self.main_visible, &mut self.budget);
        self.truncated |= self.satellites.iter().any(|s| s.truncated);

        let report = self.report();
        info!(%report, "thread loaded");
        Ok(report)
    }

    /// Builds the main tree from an already merged thread, resetting the
    /// session budget first.
    pub fn merge_and_build_main_tree(
        &mut self,
        thread: ThreadViewPost,
    ) -> Result<NodeId, ThreadError> {
        let thread = merge::merge_ancestors(thread).root;
        let uri = thread.post.uri.clone();
        self.forest.clear();
        self.budget.reset();

        let raw = ThreadView::Post(Box::new(thread));
        let outcome =
            TreeBuilder::new(&mut self.forest, &mut self.budget, self.settings.geometry)
                .build_tree(&raw);
        let root = outcome.root.ok_or(ThreadError::Unavailable { uri })?;
        self.truncated = outcome.truncated;

        apply_dimensions(
            &mut self.forest,
            root,
            self.measure.as_ref(),
            self.settings.geometry.min_height,
        );
        self.main_root = Some(root);
        Ok(root)
    }

    pub fn report(&self) -> LoadReport {
        LoadReport {
            main_posts: self.main_visible.len(),
            satellite_trees: self.satellites.len(),
            satellite_posts: self.satellites.iter().map(|s| s.visible.len()).sum(),
            limit_reached: self.truncated || self.budget.is_exhausted(),
            max_nodes: self.budget.max_nodes(),
        }
    }

    pub fn clear(&mut self) {
        self.forest.clear();
        self.budget.reset();
        self.main_root = None;
        self.main_visible.clear();
        self.satellites.clear();
        self.selected = None;
        self.truncated = false;
    }

    /// Re-runs layout for the main tree and every satellite.
    pub fn relayout(&mut self) {
        let Some(root) = self.main_root else {
            return;
        };
        self.main_visible = self.engine.layout(&mut self.forest, root);
        self.engine
            .arrange_satellites(&mut self.forest, &self.main_visible, &mut self.satellites);
    }

    pub fn set_collapsed(&mut self, id: NodeId, collapsed: bool) {
        if layout::set_collapsed(&mut self.forest, id, collapsed) {
            self.relayout();
            if let Some(selected) = self.selected {
                if !self.is_visible(selected) {
                    self.selected = Some(id);
                }
            }
        }
    }

    pub fn toggle_collapsed(&mut self, id: NodeId) {
        let collapsed = self.forest[id].collapsed;
        self.set_collapsed(id, !collapsed);
    }

    fn is_visible(&self, id: NodeId) -> bool {
        self.main_visible.contains(&id) || self.satellites.iter().any(|s| s.visible.contains(&id))
    }

    /// Every visible node of the main tree followed by each satellite's.
    pub fn all_visible(&self) -> Vec<NodeId> {
        let mut all = self.main_visible.clone();
        for satellite in &self.satellites {
            all.extend_from_slice(&satellite.visible);
        }
        all
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let all = self.all_visible();
        if all.is_empty() {
            return None;
        }
        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for id in all {
            let node = &self.forest[id];
            bounds.min_x = bounds.min_x.min(node.x);
            bounds.min_y = bounds.min_y.min(node.y);
            bounds.max_x = bounds.max_x.max(node.right());
            bounds.max_y = bounds.max_y.max(node.bottom());
        }
        Some(bounds)
    }

    pub fn select(&mut self, id: NodeId) {
        self.selected = Some(id);
    }

    pub fn select_root(&mut self) -> Option<NodeId> {
        let root = self.main_root?;
        self.selected = Some(root);
        Some(root)
    }

    pub fn select_parent(&mut self) -> Option<NodeId> {
        let parent = self.forest[self.selected?].parent?;
        self.selected = Some(parent);
        Some(parent)
    }

    pub fn select_previous_sibling(&mut self) -> Option<NodeId> {
        self.select_sibling(-1)
    }

    pub fn select_next_sibling(&mut self) -> Option<NodeId> {
        self.select_sibling(1)
    }

    fn select_sibling(&mut self, step: isize) -> Option<NodeId> {
        let current = self.selected?;
        let parent = self.forest[current].parent?;
        let siblings = &self.forest[parent].children;
        let idx = siblings.iter().position(|id| *id == current)?;
        let next = *siblings.get(idx.checked_add_signed(step)?)?;
        self.selected = Some(next);
        Some(next)
    }

    /// Moves to the middle child of an expanded selection.
    pub fn select_middle_child(&mut self) -> Option<NodeId> {
        let node = &self.forest[self.selected?];
        if node.collapsed {
            return None;
        }
        let child = *node.children.get(node.children.len() / 2)?;
        self.selected = Some(child);
        Some(child)
    }
}
