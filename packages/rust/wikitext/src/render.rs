//! External link list markup.

use std::borrow::Cow;
use std::fmt::Write;

/// Percent-encode the characters that would end or split a bracketed link:
/// whitespace, `[` and `]`. Anything else is left as it is.
pub fn escape_link_url(url: &str) -> Cow<'_, str> {
    if !url.chars().any(needs_escape) {
        return Cow::Borrowed(url);
    }

    let mut escaped = String::with_capacity(url.len() + 8);
    for c in url.chars() {
        if needs_escape(c) {
            let mut buf = [0; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "%{byte:02X}");
            }
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

fn needs_escape(c: char) -> bool {
    c.is_whitespace() || c == '[' || c == ']'
}

/// Render `[url title]`. The URL is escaped with [`escape_link_url`].
/// Whitespace in the title is collapsed, and `]` is escaped so it cannot
/// close the link early.
pub fn format_external_link(url: &str, title: &str) -> String {
    let url = escape_link_url(url);
    let title = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(']', "&#93;");

    if title.is_empty() {
        format!("[{url}]")
    } else {
        format!("[{url} {title}]")
    }
}

/// Render one `* [url title]` bullet per `(url, title)` pair, newline
/// separated, with no trailing newline.
pub fn format_link_list<'a, I>(links: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    links
        .into_iter()
        .map(|(url, title)| format!("* {}", format_external_link(url, title)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bullets() {
        let list = format_link_list([
            ("https://a.example/1", "Launch day"),
            ("https://a.example/2", "Second"),
        ]);
        assert_eq!(
            list,
            "* [https://a.example/1 Launch day]\n* [https://a.example/2 Second]"
        );
    }

    #[test]
    fn titles_are_sanitized() {
        assert_eq!(
            format_external_link("https://a.example", "Array [0]\n  access"),
            "[https://a.example Array [0&#93; access]"
        );
        assert_eq!(format_external_link("https://a.example", "  "), "[https://a.example]");
    }

    #[test]
    fn urls_are_escaped_only_where_needed() {
        assert!(matches!(
            escape_link_url("https://a.example/x?q=1"),
            Cow::Borrowed(_)
        ));
        assert_eq!(
            escape_link_url("https://a.example/a b\t[1]"),
            "https://a.example/a%20b%09%5B1%5D"
        );
        assert_eq!(escape_link_url("https://a.example/\u{3000}"), "https://a.example/%E3%80%80");
        assert_eq!(
            format_external_link("https://x.example/a b", "Spaced"),
            "[https://x.example/a%20b Spaced]"
        );
    }
}
