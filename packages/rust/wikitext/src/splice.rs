//! Locating the insertion point inside the "External links" section.
//!
//! Splicing is two steps: [`ExternalLinksLayout::analyze`] reads the text
//! once, and [`ExternalLinksLayout::plan`] turns rendered list markup into an
//! [`InsertionPlan`], a byte range plus its replacement. Nothing is mutated
//! until [`InsertionPlan::apply`].

use std::ops::Range;

use tracing::debug;

use crate::nodes::{NodeKind, tokenize};
use crate::sections::find_last_section;

/// Title of the level-2 section that receives links.
pub const EXTERNAL_LINKS_HEADING: &str = "External links";

const SECTION_LEVEL: usize = 2;

/// An external link already present in the section lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingLink {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Insert right after this node (or the whole lead when it has none).
    Anchor(Range<usize>),
    /// No section; append a new one at the end of the document.
    Append,
}

/// Where new links go in a document, and which links are already there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLinksLayout {
    target: Target,
    existing: Vec<ExistingLink>,
}

impl ExternalLinksLayout {
    pub fn analyze(text: &str) -> Self {
        let Some(section) = find_last_section(text, SECTION_LEVEL, EXTERNAL_LINKS_HEADING) else {
            debug!("no external links section");
            return Self {
                target: Target::Append,
                existing: Vec::new(),
            };
        };

        let nodes = tokenize(text, section.lead.clone());

        let last_link = nodes.iter().rposition(|n| n.is_external_link());
        let last_text = nodes.iter().rposition(|n| n.is_text());
        let anchor = match (last_link, last_text) {
            (Some(link), Some(line)) if line > link => nodes[line].range.clone(),
            (Some(link), _) => nodes[link].range.clone(),
            (None, Some(line)) => nodes[line].range.clone(),
            (None, None) => section.lead.clone(),
        };

        let existing: Vec<ExistingLink> = nodes
            .into_iter()
            .filter_map(|n| match n.kind {
                NodeKind::ExternalLink { url, title } => Some(ExistingLink { url, title }),
                _ => None,
            })
            .collect();

        debug!(
            existing = existing.len(),
            anchor_start = anchor.start,
            "external links section found"
        );

        Self {
            target: Target::Anchor(anchor),
            existing,
        }
    }

    pub fn has_section(&self) -> bool {
        matches!(self.target, Target::Anchor(_))
    }

    /// Top-level links of the section lead, in document order.
    pub fn existing_links(&self) -> &[ExistingLink] {
        &self.existing
    }

    /// Plan the insertion of `list_markup` (rendered bullets, no trailing
    /// newline) into `text`, the same text this layout was analyzed from.
    pub fn plan(&self, text: &str, list_markup: &str) -> InsertionPlan {
        match &self.target {
            Target::Anchor(anchor) => InsertionPlan {
                range: anchor.clone(),
                replacement: format!("{}\n{list_markup}\n\n", text[anchor.clone()].trim_end()),
            },
            Target::Append => {
                let kept = text.trim_end().len();
                let separator = if kept == 0 { "" } else { "\n\n" };
                InsertionPlan {
                    range: kept..text.len(),
                    replacement: format!(
                        "{separator}== {EXTERNAL_LINKS_HEADING} ==\n{list_markup}\n"
                    ),
                }
            }
        }
    }
}

/// A single replacement computed against an unchanged source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionPlan {
    pub range: Range<usize>,
    pub replacement: String,
}

impl InsertionPlan {
    /// Apply the plan to `text` and trim trailing whitespace from the result.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + self.replacement.len());
        out.push_str(&text[..self.range.start]);
        out.push_str(&self.replacement);
        out.push_str(&text[self.range.end..]);
        out.truncate(out.trim_end().len());
        out
    }
}
