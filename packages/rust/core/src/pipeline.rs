//! End-to-end run: fetch → match → aggregate → merge → save → history.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{Span, debug, error, info, instrument, warn};
use uuid::Uuid;

use feedlinks_fetch::{FeedFetcher, FetchConfig, SourceOption};
use feedlinks_shared::{FeedConfig, FeedLinksError, RegexCaching, Result};
use feedlinks_storage::{DocumentStore, LinkHistory};

use crate::aggregate::{TargetEntryList, build_target_lists, collect_matches, fan_out, log_verdicts};
use crate::matcher::QueryMatcher;
use crate::merge::{merge_entries, save_summary};

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// How many times one link may be added to one document across runs.
    pub max_add: u32,
    /// How many documents are preloaded at once.
    pub group: usize,
    /// Render revised text without saving or recording history.
    pub dry_run: bool,
    /// Skip documents that do not exist instead of creating them.
    pub skip_missing: bool,
    pub regex_caching: RegexCaching,
    pub fetch: FetchConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_add: 1,
            group: 50,
            dry_run: false,
            skip_missing: false,
            regex_caching: RegexCaching::default(),
            fetch: FetchConfig::default(),
        }
    }
}

/// What happened to one target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Updated { added: usize },
    Unchanged,
    SkippedRedirect,
    SkippedMissing,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: String,
    pub status: DocumentStatus,
    /// Set when links were added.
    pub revised_text: Option<String>,
}

impl DocumentOutcome {
    fn new(document: &str, status: DocumentStatus) -> Self {
        Self {
            document: document.to_string(),
            status,
            revised_text: None,
        }
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub documents_processed: usize,
    pub documents_updated: usize,
    pub entries_added: usize,
    pub feeds_fetched: usize,
    pub feeds_failed: usize,
    pub warnings: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub outcomes: Vec<DocumentOutcome>,
}

impl RunSummary {
    fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            dry_run,
            documents_processed: 0,
            documents_updated: 0,
            entries_added: 0,
            feeds_fetched: 0,
            feeds_failed: 0,
            warnings: 0,
            errors: 0,
            elapsed: Duration::ZERO,
            outcomes: Vec::new(),
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each feed finishes fetching.
    fn feed_fetched(&self, source: &str, current: usize, total: usize);
    /// Called after each target document is handled.
    fn document_done(&self, outcome: &DocumentOutcome, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn feed_fetched(&self, _source: &str, _current: usize, _total: usize) {}
    fn document_done(&self, _outcome: &DocumentOutcome, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Run the whole batch.
///
/// 1. Fetch every source on the bounded pool
/// 2. Match entries against the queries (sequential, in source order)
/// 3. Build each document's deduplicated, date-ordered entry list
/// 4. Per document, in preload batches of `group`: merge, save, record history
///
/// A failure on one document is logged and counted; the other documents
/// still run. `history` is only updated for documents that were saved.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, dry_run = options.dry_run))]
pub async fn run(
    feed_config: &FeedConfig,
    sources: &[SourceOption],
    store: &dyn DocumentStore,
    history: &mut LinkHistory,
    options: &RunOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    if options.group == 0 {
        return Err(FeedLinksError::validation("group must be at least 1"));
    }

    let start = Instant::now();
    let run_id = Uuid::now_v7();
    Span::current().record("run_id", tracing::field::display(run_id));
    let mut summary = RunSummary::new(run_id, options.dry_run);

    info!(
        %run_id,
        sources = sources.len(),
        queries = feed_config.queries.len(),
        "starting run"
    );

    // --- Phase 1: Fetch ---
    progress.phase("Fetching feeds");
    let fetcher = FeedFetcher::new(options.fetch.clone());
    let mut feeds = fetcher
        .fetch_all(sources, |feed, current, total| {
            progress.feed_fetched(&feed.source, current, total)
        })
        .await;

    let order: HashMap<&str, usize> = sources
        .iter()
        .enumerate()
        .map(|(i, option)| (option.source.as_str(), i))
        .collect();
    feeds.sort_by_key(|feed| order.get(feed.source.as_str()).copied().unwrap_or(usize::MAX));

    // --- Phase 2: Match ---
    progress.phase("Matching entries");
    let mut matcher = QueryMatcher::new(&feed_config.queries, options.regex_caching);
    let matches = collect_matches(&feeds, &mut matcher);
    summary.feeds_fetched = matches.feeds_used;
    summary.feeds_failed = matches.feeds_failed;
    summary.errors += matcher.spec_errors().len();

    // --- Phase 3: Aggregate ---
    let candidates = fan_out(&feed_config.queries, &matches);
    let (lists, warnings) = build_target_lists(candidates, history, options.max_add);
    summary.warnings += warnings;

    // --- Phase 4: Merge & save ---
    progress.phase("Updating documents");
    let total = lists.len();
    let mut current = 0;

    for batch in lists.chunks(options.group) {
        let to_load: Vec<String> = batch
            .iter()
            .filter(|list| !list.entries.is_empty())
            .map(|list| list.document.clone())
            .collect();
        let mut loaded: HashMap<String, Result<Option<String>>> =
            store.load_batch(&to_load).await.into_iter().collect();
        debug!(batch = batch.len(), loaded = to_load.len(), "documents preloaded");

        for list in batch {
            current += 1;
            let outcome = if list.entries.is_empty() {
                info!(document = %list.document, "no new entries");
                DocumentOutcome::new(&list.document, DocumentStatus::Unchanged)
            } else {
                let text = loaded.remove(&list.document).unwrap_or(Ok(None));
                update_document(list, text, store, history, options, &mut summary).await
            };
            summary.documents_processed += 1;
            progress.document_done(&outcome, current, total);
            summary.outcomes.push(outcome);
        }
    }

    summary.elapsed = start.elapsed();
    info!(
        documents_processed = summary.documents_processed,
        documents_updated = summary.documents_updated,
        entries_added = summary.entries_added,
        feeds_fetched = summary.feeds_fetched,
        feeds_failed = summary.feeds_failed,
        warnings = summary.warnings,
        errors = summary.errors,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    progress.done(&summary);

    Ok(summary)
}

async fn update_document(
    list: &TargetEntryList<'_>,
    loaded: Result<Option<String>>,
    store: &dyn DocumentStore,
    history: &mut LinkHistory,
    options: &RunOptions,
    summary: &mut RunSummary,
) -> DocumentOutcome {
    let document = list.document.as_str();

    let text = match loaded {
        Err(e) => {
            error!(document, error = %e, "could not load document");
            summary.errors += 1;
            return DocumentOutcome::new(
                document,
                DocumentStatus::Failed {
                    reason: e.to_string(),
                },
            );
        }
        Ok(None) if options.skip_missing => {
            warn!(document, "document does not exist, skipping");
            summary.warnings += 1;
            return DocumentOutcome::new(document, DocumentStatus::SkippedMissing);
        }
        Ok(None) => {
            info!(document, "document does not exist, creating it");
            String::new()
        }
        Ok(Some(text)) if is_redirect(&text) => {
            warn!(document, "document is a redirect, skipping");
            summary.warnings += 1;
            return DocumentOutcome::new(document, DocumentStatus::SkippedRedirect);
        }
        Ok(Some(text)) => text,
    };

    let merged = merge_entries(document, &text, &list.entries, history, options.max_add);
    summary.warnings += log_verdicts(document, &merged.verdicts);

    if merged.is_noop() {
        info!(document, "no external links added");
        return DocumentOutcome::new(document, DocumentStatus::Unchanged);
    }

    let added = merged.entries_added();
    let change_summary = save_summary(added);
    info!(document, added, summary = %change_summary, "external links merged");

    if !options.dry_run {
        if let Err(e) = store.save(document, &merged.revised_text, &change_summary).await {
            error!(document, error = %e, "could not save document");
            summary.errors += 1;
            return DocumentOutcome::new(
                document,
                DocumentStatus::Failed {
                    reason: e.to_string(),
                },
            );
        }
        for entry in &merged.added {
            history.record(document, &entry.link);
        }
    }

    summary.documents_updated += 1;
    summary.entries_added += added;
    DocumentOutcome {
        document: document.to_string(),
        status: DocumentStatus::Updated { added },
        revised_text: Some(merged.revised_text),
    }
}

fn is_redirect(text: &str) -> bool {
    text.trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("#redirect"))
}

/// Write `history` to `path` unless this is a dry run or no path is set.
/// Returns whether anything was written.
pub async fn persist_history(history: &LinkHistory, path: Option<&Path>, dry_run: bool) -> Result<bool> {
    match path {
        Some(path) if !dry_run => {
            history.save(path).await?;
            Ok(true)
        }
        Some(path) => {
            info!(path = %path.display(), "dry run, link history not written");
            Ok(false)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedlinks_fetch::ResolvedProxy;
    use feedlinks_shared::{Query, parse_feed_config};
    use feedlinks_storage::MemoryDocumentStore;
    use std::path::PathBuf;

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link, date)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link><pubDate>{date}</pubDate></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://feed.example/</link><description>d</description>{items}</channel></rss>"#
        )
    }

    struct Fixture {
        dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("feedlinks-run-{}", Uuid::now_v7()));
            std::fs::create_dir_all(&dir).expect("create fixture dir");
            Self { dir }
        }

        fn feed(&self, name: &str, body: &str) -> SourceOption {
            let path = self.dir.join(name);
            std::fs::write(&path, body).expect("write feed");
            SourceOption {
                source: path.display().to_string(),
                proxy: ResolvedProxy::none(),
            }
        }

        fn missing(&self, name: &str) -> SourceOption {
            SourceOption {
                source: self.dir.join(name).display().to_string(),
                proxy: ResolvedProxy::none(),
            }
        }
    }

    fn space_config() -> FeedConfig {
        FeedConfig {
            sources: Vec::new(),
            queries: vec![Query {
                pages: vec!["Space".into()],
                keywords: vec!["launch".into()],
                regexes: Vec::new(),
            }],
        }
    }

    fn two_launch_feeds(fx: &Fixture) -> Vec<SourceOption> {
        vec![
            fx.feed(
                "a.xml",
                &rss(&[
                    ("Launch day", "https://news.example.com/1", "Fri, 01 Jan 2021 00:00:00 GMT"),
                    ("Weather report", "https://news.example.com/w", "Fri, 01 Jan 2021 00:00:00 GMT"),
                ]),
            ),
            fx.feed(
                "b.xml",
                &rss(&[("Launch day", "https://news.example.com/1", "Fri, 01 Jan 2021 00:00:00 GMT")]),
            ),
        ]
    }

    #[tokio::test]
    async fn same_link_in_two_feeds_is_added_once() {
        let fx = Fixture::new();
        let sources = two_launch_feeds(&fx);
        let store = MemoryDocumentStore::with_documents([("Space", "Intro.")]);
        let mut history = LinkHistory::new();

        let summary = run(
            &space_config(),
            &sources,
            &store,
            &mut history,
            &RunOptions::default(),
            &SilentProgress,
        )
        .await
        .expect("run");

        assert_eq!(summary.feeds_fetched, 2);
        assert_eq!(summary.entries_added, 1);
        assert_eq!(summary.documents_updated, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(
            store.text("Space").as_deref(),
            Some("Intro.\n\n== External links ==\n* [https://news.example.com/1 Launch day]")
        );
        assert_eq!(store.revisions()[0].summary, "Add 1 external link.");
        assert_eq!(history.times_added("Space", "https://news.example.com/1"), 1);
    }

    #[tokio::test]
    async fn second_run_adds_nothing() {
        let fx = Fixture::new();
        let sources = two_launch_feeds(&fx);
        let store = MemoryDocumentStore::with_documents([("Space", "Intro.")]);
        let mut history = LinkHistory::new();
        let options = RunOptions::default();

        run(&space_config(), &sources, &store, &mut history, &options, &SilentProgress)
            .await
            .expect("first run");
        let after_first = store.text("Space");

        let summary = run(&space_config(), &sources, &store, &mut history, &options, &SilentProgress)
            .await
            .expect("second run");
        assert_eq!(summary.entries_added, 0);
        assert_eq!(store.text("Space"), after_first);
        assert_eq!(store.revisions().len(), 1);
        assert_eq!(history.times_added("Space", "https://news.example.com/1"), 1);
    }

    #[tokio::test]
    async fn failing_sources_do_not_affect_the_others() {
        let fx = Fixture::new();
        let mut sources = vec![fx.missing("gone.xml"), fx.feed("junk.xml", "not a feed")];
        sources.extend(two_launch_feeds(&fx));
        let store = MemoryDocumentStore::new();
        let mut history = LinkHistory::new();

        let summary = run(
            &space_config(),
            &sources,
            &store,
            &mut history,
            &RunOptions::default(),
            &SilentProgress,
        )
        .await
        .expect("run");

        assert_eq!(summary.feeds_failed, 2);
        assert_eq!(summary.feeds_fetched, 2);
        assert_eq!(summary.entries_added, 1);
        assert_eq!(
            store.text("Space").as_deref(),
            Some("== External links ==\n* [https://news.example.com/1 Launch day]")
        );
    }

    #[tokio::test]
    async fn failed_save_leaves_history_untouched() {
        let fx = Fixture::new();
        let sources = two_launch_feeds(&fx);
        let config = parse_feed_config(
            r#"{"sources": [], "queries": [{"pages": ["Space", "Rockets"], "keywords": ["launch"]}]}"#,
        )
        .expect("config");
        let store = MemoryDocumentStore::with_documents([("Space", "x"), ("Rockets", "y")]);
        store.fail_saves_for("Space");
        let mut history = LinkHistory::new();

        let summary = run(&config, &sources, &store, &mut history, &RunOptions::default(), &SilentProgress)
            .await
            .expect("run");

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.documents_processed, 2);
        assert_eq!(summary.documents_updated, 1);
        assert_eq!(history.times_added("Space", "https://news.example.com/1"), 0);
        assert_eq!(history.times_added("Rockets", "https://news.example.com/1"), 1);
        assert!(matches!(
            summary.outcomes[0].status,
            DocumentStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn redirects_and_missing_documents_can_be_skipped() {
        let fx = Fixture::new();
        let sources = two_launch_feeds(&fx);
        let config = parse_feed_config(
            r#"{"sources": [], "queries": [{"pages": ["Redirected", "Absent"], "keywords": ["launch"]}]}"#,
        )
        .expect("config");
        let store = MemoryDocumentStore::with_documents([("Redirected", "#REDIRECT [[Space]]")]);
        let mut history = LinkHistory::new();
        let options = RunOptions {
            skip_missing: true,
            group: 1,
            ..RunOptions::default()
        };

        let summary = run(&config, &sources, &store, &mut history, &options, &SilentProgress)
            .await
            .expect("run");

        let statuses: Vec<&DocumentStatus> = summary.outcomes.iter().map(|o| &o.status).collect();
        assert_eq!(
            statuses,
            vec![&DocumentStatus::SkippedRedirect, &DocumentStatus::SkippedMissing]
        );
        assert!(store.revisions().is_empty());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn dry_run_neither_saves_nor_records() {
        let fx = Fixture::new();
        let sources = two_launch_feeds(&fx);
        let store = MemoryDocumentStore::with_documents([("Space", "Intro.")]);
        let mut history = LinkHistory::new();
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        let summary = run(&space_config(), &sources, &store, &mut history, &options, &SilentProgress)
            .await
            .expect("run");

        assert_eq!(summary.entries_added, 1);
        assert!(summary.outcomes[0].revised_text.is_some());
        assert_eq!(store.text("Space").as_deref(), Some("Intro."));
        assert!(history.is_empty());

        let path = fx.dir.join("history.json");
        assert!(!persist_history(&history, Some(path.as_path()), true).await.expect("persist"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn max_add_zero_adds_unseen_links_once() {
        let fx = Fixture::new();
        let sources = two_launch_feeds(&fx);
        let store = MemoryDocumentStore::with_documents([("Space", "Intro.")]);
        let mut history = LinkHistory::new();
        let options = RunOptions {
            max_add: 0,
            ..RunOptions::default()
        };

        let first = run(&space_config(), &sources, &store, &mut history, &options, &SilentProgress)
            .await
            .expect("first run");
        assert_eq!(first.entries_added, 1);
        assert_eq!(history.recorded("Space", "https://news.example.com/1"), Some(1));

        // Fresh text, so only the history can keep the link out.
        let store = MemoryDocumentStore::with_documents([("Space", "Intro.")]);
        let second = run(&space_config(), &sources, &store, &mut history, &options, &SilentProgress)
            .await
            .expect("second run");
        assert_eq!(second.entries_added, 0);
        assert!(store.revisions().is_empty());
        assert_eq!(history.recorded("Space", "https://news.example.com/1"), Some(1));
    }

    #[test]
    fn redirect_detection() {
        assert!(is_redirect("  #redirect [[A]]"));
        assert!(is_redirect("#REDIRECT[[A]]"));
        assert!(!is_redirect("Text #REDIRECT"));
        assert!(!is_redirect("#redir"));
    }

    #[tokio::test]
    async fn zero_group_is_rejected() {
        let options = RunOptions {
            group: 0,
            ..RunOptions::default()
        };
        let err = run(
            &space_config(),
            &[],
            &MemoryDocumentStore::new(),
            &mut LinkHistory::new(),
            &options,
            &SilentProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FeedLinksError::Validation { .. }));
    }
}
