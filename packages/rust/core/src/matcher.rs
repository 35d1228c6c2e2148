//! Keyword and regex evaluation of entry titles against queries.
//!
//! Keywords become `\b(keyword)\b` patterns, case-insensitive, with the
//! keyword text used as a pattern fragment. Regex specs are either a pattern
//! string or `{"pattern": ..., "flags": ...}`, where flags are names
//! (`"IGNORECASE"`, `"I"`, ...), integer bits, or a list of either.
//!
//! Bad specs are reported once as [`FeedLinksError::QuerySpec`] and then
//! never match; they do not stop the run.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::warn;

use feedlinks_shared::{FeedLinksError, Query, RegexCaching, Result};

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Regex flag bits, numbered as in Python's `re` module so existing configs
/// keep their meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags(u32);

impl RegexFlags {
    pub const IGNORECASE: u32 = 2;
    pub const LOCALE: u32 = 4;
    pub const MULTILINE: u32 = 8;
    pub const DOTALL: u32 = 16;
    pub const UNICODE: u32 = 32;
    pub const VERBOSE: u32 = 64;
    pub const ASCII: u32 = 256;

    const KNOWN: u32 = Self::IGNORECASE
        | Self::LOCALE
        | Self::MULTILINE
        | Self::DOTALL
        | Self::UNICODE
        | Self::VERBOSE
        | Self::ASCII;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    /// Decode a `flags` value: a name, an integer, or a list of them.
    pub fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(items) => items
                .iter()
                .try_fold(0u32, |acc, item| -> std::result::Result<u32, String> {
                    Ok(acc | Self::single(item)?)
                })
                .map(Self),
            other => Self::single(other).map(Self),
        }
    }

    fn single(value: &Value) -> std::result::Result<u32, String> {
        match value {
            Value::String(name) => Self::by_name(name)
                .ok_or_else(|| format!("unknown regex flag {name:?}")),
            Value::Number(n) => {
                let bits = n
                    .as_u64()
                    .and_then(|b| u32::try_from(b).ok())
                    .ok_or_else(|| format!("regex flag {n} is not a valid bit set"))?;
                if bits & !Self::KNOWN != 0 {
                    return Err(format!("regex flag {bits} sets unsupported bits"));
                }
                Ok(bits)
            }
            other => Err(format!(
                "regex flags must be a name, an integer, or a list of them, got {other}"
            )),
        }
    }

    fn by_name(name: &str) -> Option<u32> {
        let name = name.trim();
        let name = name.strip_prefix("re.").unwrap_or(name);
        let bit = match name.to_ascii_uppercase().as_str() {
            "I" | "IGNORECASE" => Self::IGNORECASE,
            "L" | "LOCALE" => Self::LOCALE,
            "M" | "MULTILINE" => Self::MULTILINE,
            "S" | "DOTALL" => Self::DOTALL,
            "U" | "UNICODE" => Self::UNICODE,
            "X" | "VERBOSE" => Self::VERBOSE,
            "A" | "ASCII" => Self::ASCII,
            _ => return None,
        };
        Some(bit)
    }

    fn apply(self, builder: &mut RegexBuilder) {
        builder
            .case_insensitive(self.contains(Self::IGNORECASE))
            .multi_line(self.contains(Self::MULTILINE))
            .dot_matches_new_line(self.contains(Self::DOTALL))
            .ignore_whitespace(self.contains(Self::VERBOSE));
        if self.contains(Self::ASCII) && !self.contains(Self::UNICODE) {
            builder.unicode(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Regex specs
// ---------------------------------------------------------------------------

/// A decoded regex spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexSpec {
    pub pattern: String,
    pub flags: RegexFlags,
}

impl RegexSpec {
    /// Decode the spec at position `query` from its raw JSON value.
    pub fn from_value(query: usize, value: &Value) -> Result<Self> {
        match value {
            Value::String(pattern) => Ok(Self {
                pattern: pattern.clone(),
                flags: RegexFlags::default(),
            }),
            Value::Object(map) => {
                let pattern = match map.get("pattern") {
                    Some(Value::String(pattern)) => pattern.clone(),
                    Some(other) => {
                        return Err(FeedLinksError::query_spec(
                            query,
                            format!("regex pattern must be a string, got {other}"),
                        ));
                    }
                    None => {
                        return Err(FeedLinksError::query_spec(
                            query,
                            format!("regex {value} must have a pattern"),
                        ));
                    }
                };
                let flags = map
                    .get("flags")
                    .map(RegexFlags::from_value)
                    .transpose()
                    .map_err(|msg| FeedLinksError::query_spec(query, msg))?
                    .unwrap_or_default();
                Ok(Self { pattern, flags })
            }
            other => Err(FeedLinksError::query_spec(
                query,
                format!("regex {other} must be a string or an object"),
            )),
        }
    }

    pub fn compile(&self) -> std::result::Result<Regex, regex::Error> {
        let mut builder = RegexBuilder::new(&self.pattern);
        self.flags.apply(&mut builder);
        builder.build()
    }
}

// ---------------------------------------------------------------------------
// QueryMatcher
// ---------------------------------------------------------------------------

/// How many keywords and regexes of one query matched one text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryHit {
    pub keyword_matches: usize,
    pub regex_matches: usize,
}

impl QueryHit {
    pub fn is_match(&self) -> bool {
        self.keyword_matches > 0 || self.regex_matches > 0
    }
}

#[derive(Debug)]
struct PreparedRegex {
    spec: RegexSpec,
    /// Present under [`RegexCaching::Cached`].
    compiled: Option<Regex>,
}

#[derive(Debug)]
struct PreparedQuery {
    keywords: Vec<String>,
    regexes: Vec<PreparedRegex>,
}

/// Evaluates every query against entry titles.
///
/// Owns the keyword pattern cache; compiled keyword patterns (and keyword
/// compile failures) are kept for the matcher's lifetime.
#[derive(Debug)]
pub struct QueryMatcher {
    queries: Vec<PreparedQuery>,
    keyword_cache: HashMap<String, Option<Regex>>,
    caching: RegexCaching,
    spec_errors: Vec<FeedLinksError>,
}

impl QueryMatcher {
    /// Prepare `queries`. Every regex spec is decoded and compiled once here;
    /// failures are logged, kept in [`Self::spec_errors`], and dropped.
    pub fn new(queries: &[Query], caching: RegexCaching) -> Self {
        let mut spec_errors = Vec::new();
        let prepared = queries
            .iter()
            .enumerate()
            .map(|(index, query)| PreparedQuery {
                keywords: query.keywords.clone(),
                regexes: query
                    .regexes
                    .iter()
                    .filter_map(|raw| prepare_regex(index, raw, caching, &mut spec_errors))
                    .collect(),
            })
            .collect();

        Self {
            queries: prepared,
            keyword_cache: HashMap::new(),
            caching,
            spec_errors,
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn caching(&self) -> RegexCaching {
        self.caching
    }

    /// Query spec errors found so far.
    pub fn spec_errors(&self) -> &[FeedLinksError] {
        &self.spec_errors
    }

    /// Evaluate every query against `text`; one hit per query, in order.
    pub fn evaluate(&mut self, text: &str) -> Vec<QueryHit> {
        let Self {
            queries,
            keyword_cache,
            spec_errors,
            ..
        } = self;

        queries
            .iter()
            .enumerate()
            .map(|(index, query)| {
                let keyword_matches = query
                    .keywords
                    .iter()
                    .filter(|keyword| {
                        keyword_pattern(keyword_cache, spec_errors, index, keyword)
                            .is_some_and(|re| re.is_match(text))
                    })
                    .count();
                let regex_matches = query
                    .regexes
                    .iter()
                    .filter(|regex| regex_is_match(regex, text))
                    .count();
                QueryHit {
                    keyword_matches,
                    regex_matches,
                }
            })
            .collect()
    }
}

fn prepare_regex(
    index: usize,
    raw: &Value,
    caching: RegexCaching,
    errors: &mut Vec<FeedLinksError>,
) -> Option<PreparedRegex> {
    let compiled = RegexSpec::from_value(index, raw).and_then(|spec| {
        spec.compile()
            .map(|re| (spec.clone(), re))
            .map_err(|e| {
                FeedLinksError::query_spec(
                    index,
                    format!("regex {:?} does not compile: {e}", spec.pattern),
                )
            })
    });

    match compiled {
        Ok((spec, re)) => Some(PreparedRegex {
            spec,
            compiled: (caching == RegexCaching::Cached).then_some(re),
        }),
        Err(e) => {
            warn!(query = index, error = %e, "skipping regex spec");
            errors.push(e);
            None
        }
    }
}

fn regex_is_match(regex: &PreparedRegex, text: &str) -> bool {
    match &regex.compiled {
        Some(re) => re.is_match(text),
        None => regex
            .spec
            .compile()
            .is_ok_and(|re| re.is_match(text)),
    }
}

fn keyword_pattern<'c>(
    cache: &'c mut HashMap<String, Option<Regex>>,
    errors: &mut Vec<FeedLinksError>,
    query: usize,
    keyword: &str,
) -> Option<&'c Regex> {
    if !cache.contains_key(keyword) {
        let compiled = RegexBuilder::new(&format!(r"\b({keyword})\b"))
            .case_insensitive(true)
            .build();
        let entry = match compiled {
            Ok(re) => Some(re),
            Err(e) => {
                let err = FeedLinksError::query_spec(
                    query,
                    format!("keyword {keyword:?} is not a valid pattern: {e}"),
                );
                warn!(query, error = %err, "skipping keyword");
                errors.push(err);
                None
            }
        };
        cache.insert(keyword.to_string(), entry);
    }
    cache.get(keyword).and_then(Option::as_ref)
}
