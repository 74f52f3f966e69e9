use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::bluesky;
use crate::config::{self, Config};
use crate::data::BlueskyThreadService;
use crate::export;
use crate::measure::TextMetrics;
use crate::session::Session;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: String,
    pub config_file: Option<PathBuf>,
    pub json: bool,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    debug!(path = ?friendly_path(config::default_path()), "configuration loaded");

    let client = bluesky::Client::new(client_config(&cfg)).context("create bluesky client")?;
    let service = Arc::new(BlueskyThreadService::new(Arc::new(client)));

    let mut session = Session::new(service.clone(), service, cfg.session_settings())
        .with_measure(Box::new(TextMetrics::default()));
    session.load(&options.input)?;

    if options.json {
        let encoded = serde_json::to_string_pretty(&export::snapshot(&session))
            .context("encode thread snapshot")?;
        println!("{encoded}");
    } else {
        print!("{}", export::outline(&session, Utc::now()));
    }
    Ok(())
}

fn client_config(cfg: &Config) -> bluesky::ClientConfig {
    let user_agent = if cfg.api.user_agent.trim().is_empty() {
        format!("bskytree/{}", crate::VERSION)
    } else {
        cfg.api.user_agent.clone()
    };
    bluesky::ClientConfig {
        user_agent,
        base_url: Some(cfg.api.base_url.clone()),
        timeout: Some(cfg.api.timeout),
        thread_depth: cfg.api.thread_depth,
        parent_height: cfg.api.parent_height,
        http_client: None,
    }
}

fn friendly_path(path: Option<PathBuf>) -> String {
    let Some(path) = path else {
        return "(unavailable)".to_string();
    };
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
