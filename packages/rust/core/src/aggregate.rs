//! From fetched feeds to per-document candidate lists.
//!
//! 1. [`collect_matches`] runs the matcher over every usable feed.
//! 2. [`fan_out`] assigns each query's matches to its target documents.
//! 3. [`sort_by_published`] and a [`Deduplicator`] turn each document's
//!    candidates into its target entry list.
//!
//! Dedup verdicts are plain values; [`log_verdicts`] is the only place they
//! are logged.

use std::collections::{HashMap, HashSet};

use tracing::{error, info, warn};

use feedlinks_fetch::ParsedFeed;
use feedlinks_shared::{FeedEntry, Query};
use feedlinks_storage::LinkHistory;
use feedlinks_wikitext::escape_link_url;

use crate::matcher::QueryMatcher;

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Entries matched by each query, indexed like the queries.
#[derive(Debug, Default)]
pub struct MatchSet<'a> {
    pub by_query: Vec<Vec<&'a FeedEntry>>,
    pub feeds_used: usize,
    pub feeds_failed: usize,
}

/// Match every entry of every non-bozo feed against all queries.
///
/// Feeds are visited in the order given. Bozo feeds are logged with their
/// HTTP status and skipped.
pub fn collect_matches<'a>(feeds: &'a [ParsedFeed], matcher: &mut QueryMatcher) -> MatchSet<'a> {
    let mut set = MatchSet {
        by_query: vec![Vec::new(); matcher.query_count()],
        ..MatchSet::default()
    };

    for feed in feeds {
        info!(source = %feed.source, "parsing feed");
        if feed.proxy.has_proxy() {
            info!(
                source = %feed.source,
                proxy = %feed.proxy,
                origin = %feed.proxy.describe_origin(),
                "using proxy"
            );
        }

        if let Some(reason) = &feed.bozo {
            set.feeds_failed += 1;
            if let Some(status) = feed.status {
                error!(status, href = %feed.href, "received HTTP status code");
            }
            error!(source = %feed.source, reason = %reason, "feed skipped");
            continue;
        }
        set.feeds_used += 1;

        let mut keyword_matches = 0;
        let mut regex_matches = 0;
        for entry in &feed.entries {
            for (index, hit) in matcher.evaluate(&entry.title).into_iter().enumerate() {
                keyword_matches += hit.keyword_matches;
                regex_matches += hit.regex_matches;
                if hit.is_match() {
                    set.by_query[index].push(entry);
                }
            }
        }

        info!(
            source = %feed.source,
            "Found {keyword_matches} {} and {regex_matches} {}.",
            plural(keyword_matches, "keyword match", "keyword matches"),
            plural(regex_matches, "regex match", "regex matches"),
        );
    }

    set
}

/// Group query matches by target document. Documents keep the order in
/// which they are first named by a query with matches; duplicates are kept.
pub fn fan_out<'a>(queries: &[Query], matches: &MatchSet<'a>) -> Vec<(String, Vec<&'a FeedEntry>)> {
    let mut documents: Vec<(String, Vec<&'a FeedEntry>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (query, entries) in queries.iter().zip(&matches.by_query) {
        if entries.is_empty() {
            continue;
        }
        for document in query.target_documents() {
            let slot = *index.entry(document.to_string()).or_insert_with(|| {
                documents.push((document.to_string(), Vec::new()));
                documents.len() - 1
            });
            documents[slot].1.extend(entries.iter().copied());
        }
    }

    documents
}

/// Stable sort, oldest first; undated entries sort before dated ones.
pub fn sort_by_published(entries: &mut [&FeedEntry]) {
    entries.sort_by_key(|entry| entry.published_at);
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

/// Outcome of checking one candidate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Accepted, but another accepted entry has the same title.
    AcceptDuplicateTitle,
    /// The link was already added `times_added` times, reaching the cap.
    RejectExhausted { times_added: u32 },
    /// The link is already present.
    RejectDuplicateLink,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accept | Self::AcceptDuplicateTitle)
    }

    pub fn is_warning(self) -> bool {
        !matches!(self, Self::Accept)
    }
}

/// A candidate and its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified<'a> {
    pub entry: &'a FeedEntry,
    pub verdict: Verdict,
}

/// Seen-link and seen-title bookkeeping for one document.
#[derive(Debug)]
pub struct Deduplicator<'h> {
    document: String,
    history: &'h LinkHistory,
    max_add: u32,
    seen_links: HashSet<String>,
    seen_titles: HashSet<String>,
}

impl<'h> Deduplicator<'h> {
    pub fn new(document: &str, history: &'h LinkHistory, max_add: u32) -> Self {
        Self {
            document: document.to_string(),
            history,
            max_add,
            seen_links: HashSet::new(),
            seen_titles: HashSet::new(),
        }
    }

    /// Treat these `(link, title)` pairs as already present. Links are
    /// compared in their rendered (escaped) form.
    pub fn seed<'s, I>(&mut self, existing: I)
    where
        I: IntoIterator<Item = (&'s str, Option<&'s str>)>,
    {
        for (link, title) in existing {
            self.seen_links.insert(escape_link_url(link).into_owned());
            if let Some(title) = title {
                self.seen_titles.insert(title.to_string());
            }
        }
    }

    /// Classify `entry`; accepted entries are remembered.
    pub fn classify(&mut self, entry: &FeedEntry) -> Verdict {
        // Only links with a history entry can be exhausted.
        let exhausted = self
            .history
            .recorded(&self.document, &entry.link)
            .filter(|&times_added| times_added >= self.max_add);
        if let Some(times_added) = exhausted {
            return Verdict::RejectExhausted { times_added };
        }

        let link = escape_link_url(&entry.link);
        if self.seen_links.contains(link.as_ref()) {
            return Verdict::RejectDuplicateLink;
        }

        self.seen_links.insert(link.into_owned());
        if self.seen_titles.insert(entry.title.clone()) {
            Verdict::Accept
        } else {
            Verdict::AcceptDuplicateTitle
        }
    }

    pub fn classify_all<'a>(&mut self, entries: &[&'a FeedEntry]) -> Vec<Classified<'a>> {
        entries
            .iter()
            .map(|&entry| Classified {
                entry,
                verdict: self.classify(entry),
            })
            .collect()
    }
}

/// The accepted entries, in order.
pub fn accepted<'a>(classified: &[Classified<'a>]) -> Vec<&'a FeedEntry> {
    classified
        .iter()
        .filter(|c| c.verdict.is_accepted())
        .map(|c| c.entry)
        .collect()
}

/// Log every non-plain verdict for `document`; returns how many warnings
/// were emitted.
pub fn log_verdicts(document: &str, classified: &[Classified<'_>]) -> usize {
    let mut warnings = 0;
    for c in classified {
        match c.verdict {
            Verdict::Accept => continue,
            Verdict::AcceptDuplicateTitle => warn!(
                document,
                title = %c.entry.title,
                link = %c.entry.link,
                "entry has the same title as another entry"
            ),
            Verdict::RejectExhausted { times_added } => warn!(
                document,
                link = %c.entry.link,
                times_added,
                "entry discarded, link already added the maximum number of times"
            ),
            Verdict::RejectDuplicateLink => warn!(
                document,
                link = %c.entry.link,
                "entry discarded, duplicate link"
            ),
        }
        warnings += 1;
    }
    warnings
}

/// A document and its deduplicated, date-ordered entries.
#[derive(Debug, Clone)]
pub struct TargetEntryList<'a> {
    pub document: String,
    pub entries: Vec<&'a FeedEntry>,
}

/// Sort and deduplicate each document's candidates against `history`.
/// Returns the lists and the number of warnings logged.
pub fn build_target_lists<'a>(
    candidates: Vec<(String, Vec<&'a FeedEntry>)>,
    history: &LinkHistory,
    max_add: u32,
) -> (Vec<TargetEntryList<'a>>, usize) {
    let mut warnings = 0;
    let lists = candidates
        .into_iter()
        .map(|(document, mut entries)| {
            sort_by_published(&mut entries);
            let classified = Deduplicator::new(&document, history, max_add).classify_all(&entries);
            warnings += log_verdicts(&document, &classified);
            TargetEntryList {
                entries: accepted(&classified),
                document,
            }
        })
        .collect();
    (lists, warnings)
}

fn plural(n: usize, one: &'static str, many: &'static str) -> &'static str {
    if n == 1 { one } else { many }
}
