//! Concurrent feed fetch engine.
//!
//! One fetch-and-parse task per source runs on a bounded pool. A failing
//! source never aborts its siblings: it yields a [`ParsedFeed`] flagged as
//! bozo, which callers log and leave out of matching.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Proxy};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use feedlinks_shared::{FeedEntry, FeedLinksError, Result};

use crate::parse::parse_feed;
use crate::proxy::{ResolvedProxy, SourceOption};

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("feedlinks/", env!("CARGO_PKG_VERSION"));

/// Default width of the fetch pool.
pub const DEFAULT_FETCH_WORKERS: usize = 5;

// ---------------------------------------------------------------------------
// Config & results
// ---------------------------------------------------------------------------

/// Fetch pool settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum concurrent fetch tasks.
    pub workers: usize,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_FETCH_WORKERS,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of fetching and parsing one source.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// The configured source identifier.
    pub source: String,
    /// Proxy option the source was fetched with.
    pub proxy: ResolvedProxy,
    /// Final location after redirects (the source itself for local files).
    pub href: String,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Parsed entries; empty for bozo feeds.
    pub entries: Vec<FeedEntry>,
    /// Why the feed could not be used, if it could not.
    pub bozo: Option<String>,
}

impl ParsedFeed {
    pub fn is_bozo(&self) -> bool {
        self.bozo.is_some()
    }

    fn failed(option: &SourceOption, href: String, status: Option<u16>, reason: String) -> Self {
        Self {
            source: option.source.clone(),
            proxy: option.proxy.clone(),
            href,
            status,
            entries: Vec::new(),
            bozo: Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// FeedFetcher
// ---------------------------------------------------------------------------

/// Bounded-concurrency feed fetcher.
pub struct FeedFetcher {
    config: FetchConfig,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// Fetch and parse every source, waiting for all of them.
    ///
    /// Results are returned in completion order. `on_complete` is called once
    /// per result with the number of finished sources and the total.
    #[instrument(skip_all, fields(sources = sources.len(), workers = self.config.workers))]
    pub async fn fetch_all<F>(&self, sources: &[SourceOption], mut on_complete: F) -> Vec<ParsedFeed>
    where
        F: FnMut(&ParsedFeed, usize, usize),
    {
        let total = sources.len();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        info!(total, workers = self.config.workers, "fetching feeds");

        for (index, option) in sources.iter().cloned().enumerate() {
            let sem = semaphore.clone();
            let timeout = self.config.timeout;

            tasks.spawn(async move {
                let feed = match sem.acquire_owned().await {
                    Ok(_permit) => fetch_source(&option, timeout).await,
                    Err(e) => ParsedFeed::failed(
                        &option,
                        option.source.clone(),
                        None,
                        format!("fetch pool closed: {e}"),
                    ),
                };
                (index, feed)
            });
        }

        let mut finished = vec![false; total];
        let mut feeds = Vec::with_capacity(total);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, feed)) => {
                    finished[index] = true;
                    on_complete(&feed, feeds.len() + 1, total);
                    feeds.push(feed);
                }
                Err(e) => {
                    error!(error = %e, "fetch task failed");
                }
            }
        }

        // A task that panicked still owes its source a result.
        for (index, option) in sources.iter().enumerate() {
            if !finished[index] {
                let feed = ParsedFeed::failed(
                    option,
                    option.source.clone(),
                    None,
                    "fetch task aborted".to_string(),
                );
                on_complete(&feed, feeds.len() + 1, total);
                feeds.push(feed);
            }
        }

        let failed = feeds.iter().filter(|f| f.is_bozo()).count();
        info!(total, failed, "feed fetch completed");

        feeds
    }
}

// ---------------------------------------------------------------------------
// Single-source fetching
// ---------------------------------------------------------------------------

enum SourceLocation {
    Remote(Url),
    Local(PathBuf),
}

fn locate(source: &str) -> Result<SourceLocation> {
    match Url::parse(source) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            Ok(SourceLocation::Remote(url))
        }
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(SourceLocation::Local)
            .map_err(|()| FeedLinksError::validation(format!("invalid file URL '{source}'"))),
        // Windows drive letters parse as one-letter schemes.
        Ok(url) if url.scheme().len() == 1 => Ok(SourceLocation::Local(PathBuf::from(source))),
        Ok(url) => Err(FeedLinksError::validation(format!(
            "unsupported source scheme '{}' in '{source}'",
            url.scheme()
        ))),
        Err(_) => Ok(SourceLocation::Local(PathBuf::from(source))),
    }
}

async fn fetch_source(option: &SourceOption, timeout: Duration) -> ParsedFeed {
    debug!(source = %option.source, "fetching feed");

    let location = match locate(&option.source) {
        Ok(location) => location,
        Err(e) => return ParsedFeed::failed(option, option.source.clone(), None, e.to_string()),
    };

    match location {
        SourceLocation::Remote(url) => fetch_remote(option, &url, timeout).await,
        SourceLocation::Local(path) => fetch_local(option, &path).await,
    }
}

async fn fetch_remote(option: &SourceOption, url: &Url, timeout: Duration) -> ParsedFeed {
    let client = match build_client(&option.proxy, timeout) {
        Ok(client) => client,
        Err(e) => return ParsedFeed::failed(option, url.to_string(), None, e.to_string()),
    };

    let response = match client.get(url.as_str()).send().await {
        Ok(response) => response,
        Err(e) => {
            let reason = FeedLinksError::Network(format!("{url}: {e}")).to_string();
            return ParsedFeed::failed(option, url.to_string(), None, reason);
        }
    };

    let status = response.status();
    let final_url = response.url().clone();
    let href = final_url.to_string();

    if !status.is_success() {
        let reason = FeedLinksError::Network(format!("{href}: HTTP {status}")).to_string();
        return ParsedFeed::failed(option, href, Some(status.as_u16()), reason);
    }

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            let reason =
                FeedLinksError::Network(format!("{href}: body read failed: {e}")).to_string();
            return ParsedFeed::failed(option, href, Some(status.as_u16()), reason);
        }
    };

    finish(option, href, Some(&final_url), Some(status.as_u16()), &body)
}

async fn fetch_local(option: &SourceOption, path: &Path) -> ParsedFeed {
    let href = path.display().to_string();
    match tokio::fs::read(path).await {
        Ok(body) => finish(option, href, None, None, &body),
        Err(e) => {
            let reason = FeedLinksError::io(path, e).to_string();
            ParsedFeed::failed(option, href, None, reason)
        }
    }
}

fn finish(
    option: &SourceOption,
    href: String,
    base: Option<&Url>,
    status: Option<u16>,
    body: &[u8],
) -> ParsedFeed {
    match parse_feed(body, base) {
        Ok(entries) => {
            debug!(source = %option.source, entries = entries.len(), "feed parsed");
            ParsedFeed {
                source: option.source.clone(),
                proxy: option.proxy.clone(),
                href,
                status,
                entries,
                bozo: None,
            }
        }
        Err(e) => {
            warn!(source = %option.source, error = %e, "feed could not be parsed");
            ParsedFeed::failed(option, href, status, e.to_string())
        }
    }
}

/// Build an HTTP client honouring the source's proxy option.
fn build_client(proxy: &ResolvedProxy, timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout);

    if let Some(http) = &proxy.http {
        let proxy = Proxy::http(http)
            .map_err(|e| FeedLinksError::config(format!("invalid HTTP proxy '{http}': {e}")))?;
        builder = builder.proxy(proxy);
    }
    if let Some(https) = &proxy.https {
        let proxy = Proxy::https(https)
            .map_err(|e| FeedLinksError::config(format!("invalid HTTPS proxy '{https}': {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FeedLinksError::Network(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod fetcher_tests {
    use super::*;
    use uuid::Uuid;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title><link>https://x/</link><description>d</description>
<item><title>Rocket launch</title><link>https://x/1</link><pubDate>Fri, 01 Jan 2021 00:00:00 GMT</pubDate></item>
<item><title>Weather</title><link>https://x/2</link><pubDate>Sat, 02 Jan 2021 00:00:00 GMT</pubDate></item>
</channel></rss>"#;

    fn option(source: impl Into<String>) -> SourceOption {
        SourceOption {
            source: source.into(),
            proxy: ResolvedProxy::none(),
        }
    }

    #[test]
    fn locate_distinguishes_remote_and_local() {
        assert!(matches!(
            locate("https://example.com/feed").unwrap(),
            SourceLocation::Remote(_)
        ));
        assert!(matches!(
            locate("./feeds/local.xml").unwrap(),
            SourceLocation::Local(_)
        ));
        assert!(matches!(
            locate("file:///tmp/feed.xml").unwrap(),
            SourceLocation::Local(_)
        ));
        assert!(locate("ftp://example.com/feed").is_err());
    }

    #[tokio::test]
    async fn failing_source_does_not_affect_siblings() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/good.xml"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(RSS),
            )
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/missing.xml"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/garbage.xml"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("not xml at all"))
            .mount(&server)
            .await;

        let sources = vec![
            option(format!("{}/good.xml", server.uri())),
            option(format!("{}/missing.xml", server.uri())),
            option(format!("{}/garbage.xml", server.uri())),
        ];

        let fetcher = FeedFetcher::new(FetchConfig {
            workers: 2,
            timeout: Duration::from_secs(5),
        });
        let mut progress = Vec::new();
        let feeds = fetcher
            .fetch_all(&sources, |feed, done, total| {
                progress.push((feed.source.clone(), done, total));
            })
            .await;

        assert_eq!(feeds.len(), 3);
        assert_eq!(progress.len(), 3);
        assert!(progress.iter().all(|(_, _, total)| *total == 3));

        let by_source = |suffix: &str| {
            feeds
                .iter()
                .find(|f| f.source.ends_with(suffix))
                .expect("result for every source")
        };

        let good = by_source("/good.xml");
        assert!(!good.is_bozo());
        assert_eq!(good.status, Some(200));
        assert_eq!(good.entries.len(), 2);
        assert_eq!(good.entries[0].title, "Rocket launch");

        let missing = by_source("/missing.xml");
        assert!(missing.is_bozo());
        assert_eq!(missing.status, Some(404));
        assert!(missing.entries.is_empty());

        let garbage = by_source("/garbage.xml");
        assert!(garbage.is_bozo());
        assert_eq!(garbage.status, Some(200));
    }

    #[tokio::test]
    async fn pool_runs_at_most_workers_fetches_at_once() {
        let server = wiremock::MockServer::start().await;
        let delay = Duration::from_millis(300);

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string(RSS)
                    .set_delay(delay),
            )
            .mount(&server)
            .await;

        let sources: Vec<SourceOption> = (0..4)
            .map(|i| option(format!("{}/feed-{i}.xml", server.uri())))
            .collect();
        let fetcher = FeedFetcher::new(FetchConfig {
            workers: 2,
            timeout: Duration::from_secs(10),
        });

        let start = std::time::Instant::now();
        let feeds = fetcher.fetch_all(&sources, |_, _, _| {}).await;
        let elapsed = start.elapsed();

        assert_eq!(feeds.len(), 4);
        assert!(feeds.iter().all(|f| !f.is_bozo()));
        let requests = server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 4);
        // Four delayed responses through two slots need two rounds.
        assert!(elapsed >= delay * 2, "finished in {elapsed:?}");
    }

    #[tokio::test]
    async fn local_file_sources_are_read_from_disk() {
        let dir = std::env::temp_dir().join(format!("feedlinks-fetch-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feed.xml");
        std::fs::write(&path, RSS).unwrap();

        let fetcher = FeedFetcher::new(FetchConfig::default());
        let sources = vec![
            option(path.display().to_string()),
            option(dir.join("absent.xml").display().to_string()),
        ];
        let feeds = fetcher.fetch_all(&sources, |_, _, _| {}).await;

        let local = feeds
            .iter()
            .find(|f| f.source.ends_with("feed.xml"))
            .unwrap();
        assert!(!local.is_bozo());
        assert_eq!(local.entries.len(), 2);
        assert_eq!(local.status, None);

        let absent = feeds
            .iter()
            .find(|f| f.source.ends_with("absent.xml"))
            .unwrap();
        assert!(absent.is_bozo());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
