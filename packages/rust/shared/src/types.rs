//! Core domain types for feedlinks runs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FeedEntry
// ---------------------------------------------------------------------------

/// One item from a parsed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Entry title, used for query matching and as the link label.
    pub title: String,
    /// Target URI of the entry.
    pub link: String,
    /// Publication time (falls back to the entry's update time when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedEntry {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            published_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A keyword/regex matching rule bound to one or more target documents.
///
/// `regexes` is kept as raw JSON so that a malformed spec only disables that
/// spec (reported by the matcher) instead of failing the whole config load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Target documents that receive this query's matches.
    #[serde(rename = "pages", alias = "target_documents", default)]
    pub pages: Vec<String>,

    /// Case-insensitive whole-word keywords.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Regex specs: a pattern string or `{"pattern": ..., "flags": ...}`.
    #[serde(default)]
    pub regexes: Vec<serde_json::Value>,
}

impl Query {
    /// Target documents in declared order with repeats removed.
    pub fn target_documents(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.pages
            .iter()
            .map(String::as_str)
            .filter(|page| seen.insert(*page))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FeedConfig
// ---------------------------------------------------------------------------

/// The `{sources, queries}` feed configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed URLs or local file paths.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Queries, indexed by position.
    #[serde(default)]
    pub queries: Vec<Query>,
}

impl FeedConfig {
    /// Concatenate several configs into one, keeping source and query order.
    pub fn merge(configs: impl IntoIterator<Item = FeedConfig>) -> Self {
        let mut merged = FeedConfig::default();
        for config in configs {
            merged.sources.extend(config.sources);
            merged.queries.extend(config.queries);
        }
        merged
    }

    /// Sources in declared order with repeats removed.
    pub fn unique_sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.sources
            .iter()
            .filter(|source| seen.insert(source.as_str()))
            .cloned()
            .collect()
    }
}

/// On-disk shape of a feed config: a single object or a list of objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedConfigDocument {
    Single(FeedConfig),
    Many(Vec<FeedConfig>),
}

impl From<FeedConfigDocument> for FeedConfig {
    fn from(doc: FeedConfigDocument) -> Self {
        match doc {
            FeedConfigDocument::Single(config) => config,
            FeedConfigDocument::Many(configs) => FeedConfig::merge(configs),
        }
    }
}

// ---------------------------------------------------------------------------
// RegexCaching
// ---------------------------------------------------------------------------

/// How regex-spec patterns are compiled during matching.
///
/// Keyword patterns are always cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegexCaching {
    /// Compile each distinct pattern once per run.
    #[default]
    Cached,
    /// Compile the pattern on every evaluation.
    PerEvaluation,
}
