//! Persistence for feedlinks: the documents that receive links and the
//! cross-run [`LinkHistory`].
//!
//! [`DocumentStore`] is the seam the run pipeline talks to.
//! [`FileDocumentStore`] keeps one file per document under a directory;
//! [`MemoryDocumentStore`] backs tests. All file writes go through a temp
//! file and a rename.

mod atomic;
mod documents;
mod history;

pub use atomic::write_atomic;
pub use documents::{DocumentStore, FileDocumentStore, MemoryDocumentStore, SavedRevision};
pub use history::LinkHistory;
