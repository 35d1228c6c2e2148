//! RSS/Atom parsing into [`FeedEntry`] values using the `feed-rs` crate.

use feed_rs::model::{Entry, Link};
use tracing::debug;
use url::Url;

use feedlinks_shared::{FeedEntry, FeedLinksError, Result};

/// Parse a feed document and return its usable entries in document order.
///
/// Relative entry links are resolved against `base`, the location the feed
/// was fetched from. Entries without a title, or whose link is not an
/// absolute `http(s)` URL after resolution, are dropped.
pub fn parse_feed(body: &[u8], base: Option<&Url>) -> Result<Vec<FeedEntry>> {
    let feed = feed_rs::parser::Builder::new()
        .base_uri(base.map(Url::as_str))
        .build()
        .parse(body)
        .map_err(|e| FeedLinksError::parse(format!("feed parse failed: {e}")))?;

    let total = feed.entries.len();
    let entries: Vec<FeedEntry> = feed
        .entries
        .iter()
        .filter_map(|entry| to_feed_entry(entry, base))
        .collect();

    if entries.len() < total {
        debug!(
            total,
            kept = entries.len(),
            "dropped entries without title or usable link"
        );
    }

    Ok(entries)
}

fn to_feed_entry(entry: &Entry, base: Option<&Url>) -> Option<FeedEntry> {
    let title = entry
        .title
        .as_ref()
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty())?;
    let href = pick_link(&entry.links)?;
    let link = absolute_link(&href, base)?;

    Some(FeedEntry {
        title,
        link,
        published_at: entry.published.or(entry.updated),
    })
}

/// Prefer the `alternate` (or rel-less) link, as RSS `<link>` and Atom
/// `rel="alternate"` both denote the entry's page.
fn pick_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

/// `href` as given when it is already absolute, otherwise joined onto
/// `base`. Only `http` and `https` links are kept.
fn absolute_link(href: &str, base: Option<&Url>) -> Option<String> {
    let (link, url) = match Url::parse(href) {
        Ok(url) => (href.to_string(), url),
        Err(_) => {
            let url = base.and_then(|base| base.join(href).ok());
            let Some(url) = url else {
                debug!(link = href, "dropping entry with a relative link and no base URL");
                return None;
            };
            (url.to_string(), url)
        }
    };

    if matches!(url.scheme(), "http" | "https") {
        Some(link)
    } else {
        debug!(link = href, scheme = url.scheme(), "dropping entry with a non-web link");
        None
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Space news</title>
    <link>https://news.example.com/</link>
    <description>Launches</description>
    <item>
      <title>Rocket launch
        scheduled</title>
      <link>https://news.example.com/1</link>
      <pubDate>Fri, 01 Jan 2021 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
    </item>
    <item>
      <link>https://news.example.com/untitled</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom feed</title>
  <id>urn:example:feed</id>
  <updated>2021-01-02T00:00:00Z</updated>
  <entry>
    <title>launch day</title>
    <id>urn:example:1</id>
    <link rel="self" href="https://atom.example.com/self/1"/>
    <link rel="alternate" href="https://atom.example.com/1"/>
    <updated>2021-01-02T00:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items_and_drops_unusable_ones() {
        let entries = parse_feed(RSS.as_bytes(), None).expect("parse rss");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Rocket launch scheduled");
        assert_eq!(entries[0].link, "https://news.example.com/1");
        assert_eq!(
            entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn parses_atom_with_alternate_link_and_updated_fallback() {
        let entries = parse_feed(ATOM.as_bytes(), None).expect("parse atom");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://atom.example.com/1");
        assert_eq!(
            entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed(b"<html><body>not a feed</body></html>", None).unwrap_err();
        assert!(matches!(err, FeedLinksError::Parse { .. }));
    }

    const RELATIVE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title><link>https://news.example.com/</link><description>d</description>
<item><title>Relative</title><link>/news/1</link></item>
<item><title>Absolute</title><link>https://other.example.com/2</link></item>
<item><title>Mail</title><link>mailto:desk@news.example.com</link></item>
</channel></rss>"#;

    #[test]
    fn relative_links_resolve_against_the_feed_location() {
        let base = Url::parse("https://news.example.com/feeds/rss.xml").expect("base");
        let entries = parse_feed(RELATIVE.as_bytes(), Some(&base)).expect("parse");
        let links: Vec<&str> = entries.iter().map(|e| e.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://news.example.com/news/1", "https://other.example.com/2"]
        );
    }

    #[test]
    fn relative_links_without_a_base_are_dropped() {
        let entries = parse_feed(RELATIVE.as_bytes(), None).expect("parse");
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Absolute"]);
    }

    #[test]
    fn absolute_links_are_kept_verbatim() {
        assert_eq!(
            absolute_link("https://x.example", None).as_deref(),
            Some("https://x.example")
        );
        assert_eq!(absolute_link("news/1", None), None);
    }
}
