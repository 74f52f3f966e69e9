#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod bluesky;
pub mod builder;
pub mod config;
pub mod data;
pub mod embed;
pub mod export;
pub mod layout;
pub mod measure;
pub mod merge;
pub mod node;
pub mod post_ref;
pub mod quotes;
pub mod richtext;
pub mod session;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
