//! Cross-run record of how many times each link was added to each document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use feedlinks_shared::{FeedLinksError, Result};

use crate::atomic::write_atomic;

/// `document -> link -> times added`, serialized as that nested JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkHistory {
    documents: BTreeMap<String, BTreeMap<String, u32>>,
}

impl LinkHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Times `link` has been added to `document`; 0 when never seen.
    pub fn times_added(&self, document: &str, link: &str) -> u32 {
        self.recorded(document, link).unwrap_or(0)
    }

    /// The counter for `link` in `document`, or `None` when the pair has no
    /// entry at all.
    pub fn recorded(&self, document: &str, link: &str) -> Option<u32> {
        self.documents
            .get(document)
            .and_then(|links| links.get(link))
            .copied()
    }

    /// Count one more addition of `link` to `document`.
    pub fn record(&mut self, document: &str, link: &str) {
        let counter = self
            .documents
            .entry(document.to_string())
            .or_default()
            .entry(link.to_string())
            .or_insert(0);
        *counter = counter.saturating_add(1);
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Load from `path`. A missing file is an empty history; unreadable or
    /// malformed content is a config error.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no link history yet, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(FeedLinksError::io(path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(Self::new());
        }

        let history: Self = serde_json::from_str(&raw).map_err(|e| {
            FeedLinksError::config(format!(
                "corrupt link history at {}: {e}",
                path.display()
            ))
        })?;
        debug!(
            path = %path.display(),
            documents = history.document_count(),
            "link history loaded"
        );
        Ok(history)
    }

    /// Persist the whole history atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FeedLinksError::Storage(format!("serialize link history: {e}")))?;
        write_atomic(path, json.as_bytes()).await?;
        info!(
            path = %path.display(),
            documents = self.document_count(),
            "link history saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("feedlinks-history-{}", Uuid::now_v7()))
            .join(name)
    }

    #[test]
    fn counters_start_at_zero_and_increase() {
        let mut history = LinkHistory::new();
        assert_eq!(history.times_added("Doc", "https://a"), 0);
        history.record("Doc", "https://a");
        history.record("Doc", "https://a");
        history.record("Other", "https://a");
        assert_eq!(history.times_added("Doc", "https://a"), 2);
        assert_eq!(history.times_added("Other", "https://a"), 1);
        assert_eq!(history.times_added("Doc", "https://b"), 0);
        assert_eq!(history.document_count(), 2);
    }

    #[test]
    fn recorded_distinguishes_absent_links() {
        let mut history = LinkHistory::new();
        assert_eq!(history.recorded("Doc", "https://a"), None);
        history.record("Doc", "https://a");
        assert_eq!(history.recorded("Doc", "https://a"), Some(1));
        assert_eq!(history.recorded("Doc", "https://b"), None);
        assert_eq!(history.recorded("Other", "https://a"), None);
    }

    #[tokio::test]
    async fn missing_file_is_empty_history() {
        let history = LinkHistory::load(&temp_path("history.json"))
            .await
            .expect("load missing");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_keeps_counters() {
        let path = temp_path("history.json");
        let mut history = LinkHistory::new();
        history.record("Space", "https://news.example.com/1");
        history.save(&path).await.expect("save");

        let raw = tokio::fs::read_to_string(&path).await.expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["Space"]["https://news.example.com/1"], 1);

        let loaded = LinkHistory::load(&path).await.expect("load");
        assert_eq!(loaded, history);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_config_error() {
        let path = temp_path("history.json");
        write_atomic(&path, b"{\"Doc\": [1, 2]}").await.expect("write");
        let err = LinkHistory::load(&path).await.unwrap_err();
        assert!(matches!(err, FeedLinksError::Config { .. }));
    }
}
