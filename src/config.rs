use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::builder::{NodeGeometry, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES};
use crate::layout::LayoutConfig;
use crate::session::Settings;

const DEFAULT_ENV_PREFIX: &str = "BSKYTREE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub layout: LayoutSettings,
}

impl Config {
    pub fn session_settings(&self) -> Settings {
        Settings {
            max_nodes: self.limits.max_nodes,
            max_depth: self.limits.max_depth,
            geometry: NodeGeometry {
                width: self.layout.node_width,
                min_height: self.layout.min_height,
            },
            layout: LayoutConfig {
                h_gap: self.layout.h_gap,
                v_gap: self.layout.v_gap,
                tree_gap: self.layout.tree_gap,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_thread_depth")]
    pub thread_depth: u32,
    #[serde(default = "default_parent_height")]
    pub parent_height: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            thread_depth: default_thread_depth(),
            parent_height: default_parent_height(),
        }
    }
}

fn default_base_url() -> String {
    crate::bluesky::PUBLIC_API_BASE.to_string()
}

fn default_user_agent() -> String {
    format!("bskytree/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_thread_depth() -> u32 {
    100
}

fn default_parent_height() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_nodes() -> usize {
    DEFAULT_MAX_NODES
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutSettings {
    #[serde(default = "default_node_width")]
    pub node_width: f64,
    #[serde(default = "default_min_height")]
    pub min_height: f64,
    #[serde(default = "default_h_gap")]
    pub h_gap: f64,
    #[serde(default = "default_v_gap")]
    pub v_gap: f64,
    #[serde(default = "default_tree_gap")]
    pub tree_gap: f64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            node_width: default_node_width(),
            min_height: default_min_height(),
            h_gap: default_h_gap(),
            v_gap: default_v_gap(),
            tree_gap: default_tree_gap(),
        }
    }
}

fn default_node_width() -> f64 {
    320.0
}

fn default_min_height() -> f64 {
    100.0
}

fn default_h_gap() -> f64 {
    20.0
}

fn default_v_gap() -> f64 {
    30.0
}

fn default_tree_gap() -> f64 {
    150.0
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        let from_file = read_config_file(path)?;
        cfg = merge_config(cfg, from_file);
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix));

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.api.base_url.is_empty() && other.api.base_url != defaults.api.base_url {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() && other.api.user_agent != defaults.api.user_agent {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.timeout.is_zero() && other.api.timeout != defaults.api.timeout {
        base.api.timeout = other.api.timeout;
    }
    if other.api.thread_depth != 0 && other.api.thread_depth != defaults.api.thread_depth {
        base.api.thread_depth = other.api.thread_depth;
    }
    if other.api.parent_height != 0 && other.api.parent_height != defaults.api.parent_height {
        base.api.parent_height = other.api.parent_height;
    }

    if other.limits.max_nodes != 0 && other.limits.max_nodes != defaults.limits.max_nodes {
        base.limits.max_nodes = other.limits.max_nodes;
    }
    if other.limits.max_depth != 0 && other.limits.max_depth != defaults.limits.max_depth {
        base.limits.max_depth = other.limits.max_depth;
    }

    let layout = &defaults.layout;
    if other.layout.node_width > 0.0 && other.layout.node_width != layout.node_width {
        base.layout.node_width = other.layout.node_width;
    }
    if other.layout.min_height > 0.0 && other.layout.min_height != layout.min_height {
        base.layout.min_height = other.layout.min_height;
    }
    if other.layout.h_gap > 0.0 && other.layout.h_gap != layout.h_gap {
        base.layout.h_gap = other.layout.h_gap;
    }
    if other.layout.v_gap > 0.0 && other.layout.v_gap != layout.v_gap {
        base.layout.v_gap = other.layout.v_gap;
    }
    if other.layout.tree_gap > 0.0 && other.layout.tree_gap != layout.tree_gap {
        base.layout.tree_gap = other.layout.tree_gap;
    }

    base
}

fn load_env(prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    let mut cfg = Config::default();
    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "api.thread_depth" => {
            if let Ok(parsed) = value.parse() {
                cfg.api.thread_depth = parsed;
            }
        }
        "api.parent_height" => {
            if let Ok(parsed) = value.parse() {
                cfg.api.parent_height = parsed;
            }
        }
        "limits.max_nodes" => {
            if let Ok(parsed) = value.parse() {
                cfg.limits.max_nodes = parsed;
            }
        }
        "limits.max_depth" => {
            if let Ok(parsed) = value.parse() {
                cfg.limits.max_depth = parsed;
            }
        }
        "layout.node_width" => {
            if let Ok(parsed) = value.parse() {
                cfg.layout.node_width = parsed;
            }
        }
        "layout.min_height" => {
            if let Ok(parsed) = value.parse() {
                cfg.layout.min_height = parsed;
            }
        }
        "layout.h_gap" => {
            if let Ok(parsed) = value.parse() {
                cfg.layout.h_gap = parsed;
            }
        }
        "layout.v_gap" => {
            if let Ok(parsed) = value.parse() {
                cfg.layout.v_gap = parsed;
            }
        }
        "layout.tree_gap" => {
            if let Ok(parsed) = value.parse() {
                cfg.layout.tree_gap = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bskytree").join("config.yaml"))
}
