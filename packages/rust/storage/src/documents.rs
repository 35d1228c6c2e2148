//! Document transport: read text and existence, write text with a change
//! summary.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use feedlinks_shared::{FeedLinksError, Result};

use crate::atomic::write_atomic;

/// Backend holding the documents that receive links.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current text of `name`, or `None` if it does not exist.
    async fn load(&self, name: &str) -> Result<Option<String>>;

    /// Replace the text of `name`, creating it if needed.
    async fn save(&self, name: &str, text: &str, summary: &str) -> Result<()>;

    /// Load several documents; one failure does not affect the others.
    async fn load_batch(&self, names: &[String]) -> Vec<(String, Result<Option<String>>)> {
        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            loaded.push((name.clone(), self.load(name).await));
        }
        loaded
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

const DOCUMENT_EXTENSION: &str = "wiki";
const JOURNAL_FILE_NAME: &str = ".changes.jsonl";

/// One `<name>.wiki` file per document under a root directory. Every save
/// appends a line to `.changes.jsonl` with its summary.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

#[derive(Serialize)]
struct JournalLine<'a> {
    at: String,
    document: &'a str,
    summary: &'a str,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for document `name`. Characters that are unsafe in file
    /// names are percent-encoded.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
            return Err(FeedLinksError::validation(format!(
                "invalid document name: {name:?}"
            )));
        }
        Ok(self
            .root
            .join(format!("{}.{DOCUMENT_EXTENSION}", encode_file_name(trimmed))))
    }

    async fn append_journal(&self, name: &str, summary: &str) -> Result<()> {
        let line = serde_json::to_string(&JournalLine {
            at: Utc::now().to_rfc3339(),
            document: name,
            summary,
        })
        .map_err(|e| FeedLinksError::Storage(format!("serialize journal line: {e}")))?;

        let path = self.root.join(JOURNAL_FILE_NAME);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| FeedLinksError::io(&path, e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| FeedLinksError::io(&path, e))?;
        Ok(())
    }
}

fn encode_file_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {
                encoded.push_str(&format!("%{:02X}", c as u32));
            }
            c if c.is_control() => encoded.push_str(&format!("%{:02X}", c as u32)),
            c => encoded.push(c),
        }
    }
    encoded
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                debug!(document = name, path = %path.display(), bytes = text.len(), "document loaded");
                Ok(Some(text))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FeedLinksError::io(path, e)),
        }
    }

    async fn save(&self, name: &str, text: &str, summary: &str) -> Result<()> {
        let path = self.path_for(name)?;
        write_atomic(&path, text.as_bytes()).await?;
        // The text is already replaced; a lost journal line does not undo that.
        if let Err(e) = self.append_journal(name, summary).await {
            warn!(document = name, error = %e, "document saved but journal append failed");
        }
        info!(document = name, path = %path.display(), summary, "document saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A save recorded by [`MemoryDocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRevision {
    pub document: String,
    pub summary: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: BTreeMap<String, String>,
    revisions: Vec<SavedRevision>,
    unreadable: HashSet<String>,
    read_only: HashSet<String>,
}

/// Documents held in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.documents = documents
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect();
        }
        store
    }

    /// Make every load of `name` fail.
    pub fn fail_loads_for(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.unreadable.insert(name.to_string());
        }
    }

    /// Make every save of `name` fail.
    pub fn fail_saves_for(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.read_only.insert(name.to_string());
        }
    }

    /// Current text of `name`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.documents.get(name).cloned())
    }

    /// Saves performed so far, in order.
    pub fn revisions(&self) -> Vec<SavedRevision> {
        self.state
            .lock()
            .map(|state| state.revisions.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| FeedLinksError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self, name: &str) -> Result<Option<String>> {
        let state = self.lock()?;
        if state.unreadable.contains(name) {
            return Err(FeedLinksError::Storage(format!("cannot read {name:?}")));
        }
        Ok(state.documents.get(name).cloned())
    }

    async fn save(&self, name: &str, text: &str, summary: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.read_only.contains(name) {
            return Err(FeedLinksError::Storage(format!("cannot save {name:?}")));
        }
        state.documents.insert(name.to_string(), text.to_string());
        state.revisions.push(SavedRevision {
            document: name.to_string(),
            summary: summary.to_string(),
        });
        Ok(())
    }
}
