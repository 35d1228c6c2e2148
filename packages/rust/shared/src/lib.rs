//! Shared types, error model, and configuration for feedlinks.
//!
//! This crate is the foundation depended on by all other feedlinks crates.
//! It provides:
//! - [`FeedLinksError`]: the unified error type
//! - Domain types ([`FeedEntry`], [`Query`], [`FeedConfig`])
//! - Configuration ([`AppConfig`], config loading, feed config parsing)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FEED_CONFIG_FILE_NAME, PathsConfig, ProxyConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, load_feed_config_from,
    parse_feed_config,
};
pub use error::{FeedLinksError, Result};
pub use types::{FeedConfig, FeedConfigDocument, FeedEntry, Query, RegexCaching};
