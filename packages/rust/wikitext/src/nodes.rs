//! Flat tokenizer for a slice of wikitext.
//!
//! Only top-level structure is produced: anything inside a template,
//! comment, or wikilink is part of that opaque node, so links nested there
//! are never reported as external links.

use std::ops::Range;

/// Kind of a top-level node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A run of plain text.
    Text,
    /// `[url title]` or a bare URL.
    ExternalLink { url: String, title: Option<String> },
    /// `{{ ... }}`, nesting-aware.
    Template,
    /// `<!-- ... -->`.
    Comment,
    /// `[[ ... ]]`, nesting-aware.
    WikiLink,
}

/// A node and its absolute byte range in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub range: Range<usize>,
}

impl Node {
    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text)
    }

    pub fn is_external_link(&self) -> bool {
        matches!(self.kind, NodeKind::ExternalLink { .. })
    }
}

const URL_SCHEMES: &[&str] = &["https://", "http://", "ftp://", "ftps://", "//"];
const FREE_URL_SCHEMES: &[&str] = &["https://", "http://", "ftp://", "ftps://"];

/// Tokenize `text[range]` into top-level nodes. Ranges in the result are
/// absolute offsets into `text`. Consecutive plain text is merged into one
/// [`NodeKind::Text`] node.
pub fn tokenize(text: &str, range: Range<usize>) -> Vec<Node> {
    let end = range.end;
    let mut nodes = Vec::new();
    let mut text_start: Option<usize> = None;
    let mut i = range.start;

    while i < end {
        let rest = &text[i..end];

        let structured = if rest.starts_with("<!--") {
            let close = rest[4..].find("-->").map(|p| 4 + p + 3);
            Some((NodeKind::Comment, close.unwrap_or(rest.len())))
        } else if rest.starts_with("{{") {
            Some((NodeKind::Template, balanced(rest, "{{", "}}")))
        } else if rest.starts_with("[[") {
            Some((NodeKind::WikiLink, balanced(rest, "[[", "]]")))
        } else if rest.starts_with('[') {
            bracketed_link(rest)
        } else if at_word_boundary(text, i) {
            free_link(rest)
        } else {
            None
        };

        match structured {
            Some((kind, len)) => {
                if let Some(start) = text_start.take() {
                    nodes.push(Node {
                        kind: NodeKind::Text,
                        range: start..i,
                    });
                }
                nodes.push(Node {
                    kind,
                    range: i..i + len,
                });
                i += len;
            }
            None => {
                text_start.get_or_insert(i);
                i += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    if let Some(start) = text_start {
        nodes.push(Node {
            kind: NodeKind::Text,
            range: start..end,
        });
    }

    nodes
}

/// Length of a nesting-aware `open ... close` span; unterminated spans run to
/// the end of `rest`.
fn balanced(rest: &str, open: &str, close: &str) -> usize {
    let mut depth = 0usize;
    let mut i = 0;

    while i < rest.len() {
        let tail = &rest[i..];
        if tail.starts_with(open) {
            depth += 1;
            i += open.len();
        } else if tail.starts_with(close) {
            depth -= 1;
            i += close.len();
            if depth == 0 {
                return i;
            }
        } else {
            i += tail.chars().next().map_or(1, char::len_utf8);
        }
    }

    rest.len()
}

/// `[url]` or `[url title]` on a single line.
fn bracketed_link(rest: &str) -> Option<(NodeKind, usize)> {
    let inner = &rest[1..];
    if !URL_SCHEMES.iter().any(|s| starts_with_ignore_case(inner, s)) {
        return None;
    }

    let close = inner.find(|c: char| c == ']' || c == '\n')?;
    if !inner[close..].starts_with(']') {
        return None;
    }

    let content = &inner[..close];
    let (url, title) = match content.find([' ', '\t']) {
        Some(split) => (&content[..split], content[split..].trim()),
        None => (content, ""),
    };
    if url.len() <= scheme_len(url) {
        return None;
    }

    let title = (!title.is_empty()).then(|| title.to_string());
    Some((
        NodeKind::ExternalLink {
            url: url.to_string(),
            title,
        },
        close + 2,
    ))
}

/// A bare URL. Trailing punctuation is left out, and a closing parenthesis
/// only belongs to the URL when the URL opened one.
fn free_link(rest: &str) -> Option<(NodeKind, usize)> {
    if !FREE_URL_SCHEMES
        .iter()
        .any(|s| starts_with_ignore_case(rest, s))
    {
        return None;
    }

    let raw_end = rest
        .find(|c: char| c.is_whitespace() || "[]<>\"{}|".contains(c))
        .unwrap_or(rest.len());
    let mut url = &rest[..raw_end];

    loop {
        let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'']);
        let trimmed = if trimmed.ends_with(')') && !trimmed.contains('(') {
            &trimmed[..trimmed.len() - 1]
        } else {
            trimmed
        };
        if trimmed.len() == url.len() {
            break;
        }
        url = trimmed;
    }

    if url.len() <= scheme_len(url) {
        return None;
    }

    Some((
        NodeKind::ExternalLink {
            url: url.to_string(),
            title: None,
        },
        url.len(),
    ))
}

fn at_word_boundary(text: &str, i: usize) -> bool {
    text[..i]
        .chars()
        .next_back()
        .is_none_or(|c| !c.is_alphanumeric())
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn scheme_len(url: &str) -> usize {
    URL_SCHEMES
        .iter()
        .find(|s| starts_with_ignore_case(url, s))
        .map_or(0, |s| s.len())
}
