//! Error types for feedlinks.
//!
//! Library crates use [`FeedLinksError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all feedlinks operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedLinksError {
    /// Configuration loading or validation error (feed config, proxy rules, history).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a feed.
    #[error("network error: {0}")]
    Network(String),

    /// Feed or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A malformed keyword or regex spec inside a query.
    #[error("query spec error in query #{query}: {message}")]
    QuerySpec { query: usize, message: String },

    /// Document store read/write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad option values, invalid names, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FeedLinksError>;

impl FeedLinksError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a query spec error for the query at index `query`.
    pub fn query_spec(query: usize, msg: impl Into<String>) -> Self {
        Self::QuerySpec {
            query,
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = FeedLinksError::config("missing sources");
        assert_eq!(err.to_string(), "config error: missing sources");

        let err = FeedLinksError::query_spec(3, "regex must have a pattern");
        assert_eq!(
            err.to_string(),
            "query spec error in query #3: regex must have a pattern"
        );

        let err = FeedLinksError::validation("max_add must be >= 0");
        assert!(err.to_string().contains("max_add"));
    }
}
