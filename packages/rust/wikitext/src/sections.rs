//! Heading and section detection.
//!
//! A heading is a whole line of the form `== Title ==`. Its level is the
//! smaller of the opening and closing `=` runs (capped at 6); surplus `=` on
//! either side is part of the title, as MediaWiki renders it. Lines inside
//! `<!-- ... -->` comments are never headings.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// A heading line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    /// Title with surrounding whitespace removed.
    pub title: String,
    /// Byte range of the heading line, excluding its line terminator.
    pub line: Range<usize>,
}

/// A section opened by a heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: Heading,
    /// From the end of the heading line up to the next heading of the same or
    /// a higher level (or the end of the text).
    pub body: Range<usize>,
    /// The part of `body` before the first nested heading.
    pub lead: Range<usize>,
}

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(=+)(.+?)(=+)[ \t]*$").expect("valid regex")
});

/// All headings in document order.
pub fn headings(text: &str) -> Vec<Heading> {
    let comments = comment_ranges(text);
    let mut found = Vec::new();
    let mut offset = 0;

    for raw in text.split_inclusive('\n') {
        let start = offset;
        offset += raw.len();

        let line = raw.trim_end_matches(['\n', '\r']);
        if !line.starts_with('=') || comments.iter().any(|c| c.contains(&start)) {
            continue;
        }
        if let Some(heading) = parse_heading(line, start) {
            found.push(heading);
        }
    }

    found
}

fn parse_heading(line: &str, start: usize) -> Option<Heading> {
    let caps = HEADING_RE.captures(line)?;
    let open = caps[1].len();
    let close = caps[3].len();
    let level = open.min(close).min(6);

    let title = format!(
        "{}{}{}",
        "=".repeat(open - level),
        &caps[2],
        "=".repeat(close - level)
    );
    let title = title.trim();
    if title.is_empty() {
        return None;
    }

    Some(Heading {
        level,
        title: title.to_string(),
        line: start..start + line.len(),
    })
}

/// Byte ranges of `<!-- ... -->` comments; an unterminated comment runs to
/// the end of the text.
pub(crate) fn comment_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut cursor = 0;

    while let Some(open) = text[cursor..].find("<!--") {
        let start = cursor + open;
        let body = start + 4;
        let end = match text[body..].find("-->") {
            Some(close) => body + close + 3,
            None => text.len(),
        };
        ranges.push(start..end);
        cursor = end;
    }

    ranges
}

/// The last section at `level` whose title is exactly `title`.
pub fn find_last_section(text: &str, level: usize, title: &str) -> Option<Section> {
    let all = headings(text);
    let index = all
        .iter()
        .rposition(|h| h.level == level && h.title == title)?;

    let heading = all[index].clone();
    let after = &all[index + 1..];

    let body_end = after
        .iter()
        .find(|h| h.level <= level)
        .map(|h| h.line.start)
        .unwrap_or(text.len());
    let lead_end = after
        .first()
        .map(|h| h.line.start)
        .filter(|start| *start < body_end)
        .unwrap_or(body_end);

    let body_start = heading.line.end;
    Some(Section {
        heading,
        body: body_start..body_end,
        lead: body_start..lead_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Intro text.\n\
== History ==\n\
Old times.\n\
=== Early ===\n\
Very old.\n\
== External links ==\n\
* [https://a.example A]\n\
=== Official ===\n\
* [https://b.example B]\n\
== See also ==\n\
More.";

    #[test]
    fn detects_levels_and_titles() {
        let hs = headings(DOC);
        let summary: Vec<(usize, &str)> = hs.iter().map(|h| (h.level, h.title.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (2, "History"),
                (3, "Early"),
                (2, "External links"),
                (3, "Official"),
                (2, "See also"),
            ]
        );
        assert_eq!(&DOC[hs[0].line.clone()], "== History ==");
    }

    #[test]
    fn unbalanced_equals_become_part_of_the_title() {
        let hs = headings("=== Title ==\n");
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].level, 2);
        assert_eq!(hs[0].title, "= Title");
    }

    #[test]
    fn headings_inside_comments_are_ignored() {
        let hs = headings("<!--\n== Hidden ==\n-->\n== Shown ==\n");
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].title, "Shown");
    }

    #[test]
    fn section_lead_stops_at_nested_heading() {
        let section = find_last_section(DOC, 2, "External links").expect("section");
        assert_eq!(&DOC[section.lead.clone()], "\n* [https://a.example A]\n");
        assert!(DOC[section.body.clone()].contains("* [https://b.example B]"));
        assert!(!DOC[section.body.clone()].contains("See also"));
    }

    #[test]
    fn last_matching_section_wins() {
        let doc = "== External links ==\nfirst\n== Other ==\n== External links ==\nsecond";
        let section = find_last_section(doc, 2, "External links").expect("section");
        assert_eq!(&doc[section.lead.clone()], "\nsecond");
    }

    #[test]
    fn heading_match_is_exact() {
        assert!(find_last_section("== External links and more ==\n", 2, "External links").is_none());
        assert!(find_last_section("=== External links ===\n", 2, "External links").is_none());
        assert!(find_last_section("== external links ==\n", 2, "External links").is_none());
    }

    #[test]
    fn heading_at_end_of_text_has_empty_lead() {
        let doc = "Body\n== External links ==";
        let section = find_last_section(doc, 2, "External links").expect("section");
        assert!(section.lead.is_empty());
        assert_eq!(section.lead.start, doc.len());
    }
}
