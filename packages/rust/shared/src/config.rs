//! Application and feed configuration for feedlinks.
//!
//! User config lives at `~/.feedlinks/feedlinks.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! The feed config (`{sources, queries}`) is JSON and is loaded separately,
//! either from a local file or from a document in the document store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FeedLinksError, Result};
use crate::types::{FeedConfig, FeedConfigDocument, RegexCaching};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feedlinks.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feedlinks";

/// Default name of the JSON feed config file.
pub const FEED_CONFIG_FILE_NAME: &str = "config.json";

// ---------------------------------------------------------------------------
// Config structs (matching feedlinks.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// File and document locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Proxy settings applied to every source.
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// How many times a link may be added to the same document across runs.
    #[serde(default = "default_max_add")]
    pub max_add: u32,

    /// How many documents to preload at once.
    #[serde(default = "default_group")]
    pub group: usize,

    /// Width of the feed fetch pool.
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// HTTP timeout per feed request, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Regex-spec compilation strategy.
    #[serde(default)]
    pub regex_caching: RegexCaching,

    /// Skip target documents that do not exist instead of creating them.
    #[serde(default)]
    pub skip_missing: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_add: default_max_add(),
            group: default_group(),
            fetch_workers: default_fetch_workers(),
            fetch_timeout_secs: default_fetch_timeout(),
            regex_caching: RegexCaching::default(),
            skip_missing: false,
        }
    }
}

fn default_max_add() -> u32 {
    1
}
fn default_group() -> usize {
    50
}
fn default_fetch_workers() -> usize {
    5
}
fn default_fetch_timeout() -> u64 {
    30
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Local feed config file.
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Document holding the feed config when the config type is `document`.
    #[serde(default = "default_config_document")]
    pub config_document: String,

    /// Directory backing the file document store.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,

    /// Link history file. No history is kept when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_path: Option<String>,

    /// Proxy routing rules file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies_path: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            config_document: default_config_document(),
            documents_dir: default_documents_dir(),
            history_path: None,
            proxies_path: None,
        }
    }
}

fn default_config_path() -> String {
    format!("./{FEED_CONFIG_FILE_NAME}")
}
fn default_config_document() -> String {
    format!("MediaWiki:Feed external links/{FEED_CONFIG_FILE_NAME}")
}
fn default_documents_dir() -> String {
    "./pages".into()
}

/// `[proxy]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy used for both HTTP and HTTPS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// HTTP-only proxy (overrides `proxy` for HTTP).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    /// HTTPS-only proxy (overrides `proxy` for HTTPS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feedlinks/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedLinksError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feedlinks/feedlinks.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FeedLinksError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FeedLinksError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FeedLinksError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FeedLinksError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FeedLinksError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

// ---------------------------------------------------------------------------
// Feed config loading
// ---------------------------------------------------------------------------

/// Parse a feed config from JSON text (one object or a list of objects).
pub fn parse_feed_config(json: &str) -> Result<FeedConfig> {
    let doc: FeedConfigDocument = serde_json::from_str(json)
        .map_err(|e| FeedLinksError::config(format!("invalid feed config JSON: {e}")))?;
    Ok(doc.into())
}

/// Load the feed config from a local JSON file.
pub fn load_feed_config_from(path: &Path) -> Result<FeedConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FeedLinksError::io(path, e))?;
    parse_feed_config(&content).map_err(|e| match e {
        FeedLinksError::Config { message } => {
            FeedLinksError::config(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}
