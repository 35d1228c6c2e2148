//! Merging a document's target entry list into its text.

use tracing::debug;

use feedlinks_shared::FeedEntry;
use feedlinks_storage::LinkHistory;
use feedlinks_wikitext::{ExternalLinksLayout, format_link_list};

use crate::aggregate::{Classified, Deduplicator, accepted};

/// Revised text and what went into it.
#[derive(Debug, Clone)]
pub struct MergeResult<'a> {
    /// Equal to the input text when nothing was added.
    pub revised_text: String,
    /// Entries rendered into the text, in order.
    pub added: Vec<&'a FeedEntry>,
    /// Verdict for every candidate against the links already in the text.
    pub verdicts: Vec<Classified<'a>>,
}

impl MergeResult<'_> {
    pub fn entries_added(&self) -> usize {
        self.added.len()
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }
}

/// Merge `candidates` into the "External links" section of `text`.
///
/// Candidates are checked again against the links already in the section
/// lead (and against `history`) before rendering, so merging the same list
/// twice adds nothing the second time.
pub fn merge_entries<'a>(
    document: &str,
    text: &str,
    candidates: &[&'a FeedEntry],
    history: &LinkHistory,
    max_add: u32,
) -> MergeResult<'a> {
    let layout = ExternalLinksLayout::analyze(text);

    let mut dedup = Deduplicator::new(document, history, max_add);
    dedup.seed(
        layout
            .existing_links()
            .iter()
            .map(|link| (link.url.as_str(), link.title.as_deref())),
    );
    let verdicts = dedup.classify_all(candidates);
    let added = accepted(&verdicts);

    if added.is_empty() {
        debug!(document, "nothing to merge");
        return MergeResult {
            revised_text: text.to_string(),
            added,
            verdicts,
        };
    }

    let list = format_link_list(added.iter().map(|e| (e.link.as_str(), e.title.as_str())));
    let plan = layout.plan(text, &list);
    debug!(
        document,
        added = added.len(),
        existing = layout.existing_links().len(),
        new_section = !layout.has_section(),
        "insertion planned"
    );

    MergeResult {
        revised_text: plan.apply(text),
        added,
        verdicts,
    }
}

/// Change summary for a save that adds `n` links.
pub fn save_summary(n: usize) -> String {
    format!("Add {n} external link{}.", if n == 1 { "" } else { "s" })
}
