//! Per-source proxy resolution.
//!
//! Every source starts from the global proxy settings; routing rules whose
//! pattern is found in the source string then replace that setting, with the
//! last matching rule (in declared order) winning.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde::de::{self, MapAccess, SeqAccess, Visitor};

use feedlinks_shared::{FeedLinksError, ProxyConfig, Result};

// ---------------------------------------------------------------------------
// Proxy specs
// ---------------------------------------------------------------------------

/// Proxy spec attached to a routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProxySpec {
    /// One proxy for both HTTP and HTTPS.
    Both(String),
    /// Explicit per-scheme proxies.
    PerScheme {
        #[serde(default)]
        http: Option<String>,
        #[serde(default)]
        https: Option<String>,
    },
}

impl ProxySpec {
    fn to_pair(&self) -> (Option<String>, Option<String>) {
        match self {
            Self::Both(proxy) => (Some(proxy.clone()), Some(proxy.clone())),
            Self::PerScheme { http, https } => (http.clone(), https.clone()),
        }
    }
}

/// Global proxy settings (from CLI flags or the `[proxy]` config section).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyOverrides {
    /// Same proxy for HTTP and HTTPS.
    pub proxy: Option<String>,
    /// HTTP proxy; wins over `proxy` for HTTP.
    pub http_proxy: Option<String>,
    /// HTTPS proxy; wins over `proxy` for HTTPS.
    pub https_proxy: Option<String>,
}

impl From<&ProxyConfig> for ProxyOverrides {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            proxy: config.proxy.clone(),
            http_proxy: config.http_proxy.clone(),
            https_proxy: config.https_proxy.clone(),
        }
    }
}

impl ProxyOverrides {
    fn base(&self) -> ResolvedProxy {
        let http = self.http_proxy.clone().or_else(|| self.proxy.clone());
        let https = self.https_proxy.clone().or_else(|| self.proxy.clone());
        let has_proxy =
            self.proxy.is_some() || self.http_proxy.is_some() || self.https_proxy.is_some();

        ResolvedProxy {
            http,
            https,
            origin: if has_proxy {
                ProxyOrigin::Global
            } else {
                ProxyOrigin::None
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution result
// ---------------------------------------------------------------------------

/// Where a source's proxy setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOrigin {
    /// No proxy configured; the transport default applies.
    None,
    /// Global proxy settings.
    Global,
    /// A routing rule with this pattern matched the source.
    Rule(String),
}

/// Proxy option resolved for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProxy {
    pub http: Option<String>,
    pub https: Option<String>,
    pub origin: ProxyOrigin,
}

impl ResolvedProxy {
    /// No proxy at all.
    pub fn none() -> Self {
        Self {
            http: None,
            https: None,
            origin: ProxyOrigin::None,
        }
    }

    pub fn has_proxy(&self) -> bool {
        self.origin != ProxyOrigin::None
    }

    /// Human-readable origin for log lines.
    pub fn describe_origin(&self) -> String {
        match &self.origin {
            ProxyOrigin::None => "no proxy settings".to_string(),
            ProxyOrigin::Global => "global proxy settings".to_string(),
            ProxyOrigin::Rule(pattern) => format!("matched regex pattern \"{pattern}\""),
        }
    }
}

impl fmt::Display for ResolvedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "http={}, https={}",
            self.http.as_deref().unwrap_or("-"),
            self.https.as_deref().unwrap_or("-")
        )
    }
}

/// A source paired with its resolved proxy option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOption {
    pub source: String,
    pub proxy: ResolvedProxy,
}

// ---------------------------------------------------------------------------
// Routing rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ProxyRule {
    pattern: Regex,
    spec: ProxySpec,
}

/// Ordered proxy routing rules.
#[derive(Debug, Clone, Default)]
pub struct ProxyRules {
    rules: Vec<ProxyRule>,
}

impl ProxyRules {
    /// Compile rules in the given order. An invalid pattern is a config error.
    pub fn new(rules: Vec<(String, ProxySpec)>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|(pattern, spec)| {
                Regex::new(&pattern)
                    .map(|pattern| ProxyRule { pattern, spec })
                    .map_err(|e| {
                        FeedLinksError::config(format!("invalid proxy rule pattern '{pattern}': {e}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Parse rules from JSON: an object `pattern -> spec` (declared order) or
    /// an array of `{"pattern": ..., "proxy": ...}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawRules = serde_json::from_str(json)
            .map_err(|e| FeedLinksError::config(format!("invalid proxy rules JSON: {e}")))?;
        Self::new(raw.0)
    }

    /// Load rules from a local JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FeedLinksError::io(path, e))?;
        let rules = Self::from_json(&content)?;
        tracing::debug!(?path, rules = rules.len(), "loaded proxy rules");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the proxy option for one source.
    pub fn resolve(&self, overrides: &ProxyOverrides, source: &str) -> ResolvedProxy {
        let mut resolved = overrides.base();

        for rule in &self.rules {
            if rule.pattern.is_match(source) {
                let (http, https) = rule.spec.to_pair();
                resolved = ResolvedProxy {
                    http,
                    https,
                    origin: ProxyOrigin::Rule(rule.pattern.as_str().to_string()),
                };
            }
        }

        resolved
    }
}

/// Resolve proxy options for every source, keeping source order.
pub fn resolve_sources(
    overrides: &ProxyOverrides,
    rules: &ProxyRules,
    sources: &[String],
) -> Vec<SourceOption> {
    sources
        .iter()
        .map(|source| SourceOption {
            source: source.clone(),
            proxy: rules.resolve(overrides, source),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Order-preserving rules file decoding
// ---------------------------------------------------------------------------

struct RawRules(Vec<(String, ProxySpec)>);

#[derive(Deserialize)]
struct RawRuleEntry {
    pattern: String,
    proxy: ProxySpec,
}

impl<'de> Deserialize<'de> for RawRules {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = RawRules;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of pattern -> proxy, or a list of {pattern, proxy}")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut rules = Vec::new();
                while let Some((pattern, spec)) = map.next_entry::<String, ProxySpec>()? {
                    rules.push((pattern, spec));
                }
                Ok(RawRules(rules))
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut rules = Vec::new();
                while let Some(entry) = seq.next_element::<RawRuleEntry>()? {
                    rules.push((entry.pattern, entry.proxy));
                }
                Ok(RawRules(rules))
            }
        }

        deserializer.deserialize_any(RulesVisitor)
    }
}
