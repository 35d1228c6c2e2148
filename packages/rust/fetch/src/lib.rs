//! Feed fetching: proxy resolution, bounded-concurrency fetching, and parsing.
//!
//! This crate provides:
//! - [`proxy`]: Per-source proxy resolution from global settings and routing rules
//! - [`parse`]: RSS/Atom parsing into [`feedlinks_shared::FeedEntry`] values
//! - [`engine`]: Concurrent fetch pool with per-source failure isolation

pub mod engine;
pub mod parse;
pub mod proxy;

pub use engine::{DEFAULT_FETCH_WORKERS, FeedFetcher, FetchConfig, ParsedFeed};
pub use parse::parse_feed;
pub use proxy::{
    ProxyOrigin, ProxyOverrides, ProxyRules, ProxySpec, ResolvedProxy, SourceOption,
    resolve_sources,
};
