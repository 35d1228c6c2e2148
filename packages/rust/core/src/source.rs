//! Where the feed config comes from.

use std::path::PathBuf;

use tracing::{info, warn};

use feedlinks_shared::{FeedConfig, Result, load_feed_config_from, parse_feed_config};
use feedlinks_storage::DocumentStore;

/// Location of the `{sources, queries}` feed config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A local JSON file.
    File(PathBuf),
    /// A document in the document store, with a local file used when the
    /// document is missing or is not valid config JSON.
    Document { name: String, fallback: PathBuf },
}

/// Load the feed config from `source`.
pub async fn load_feed_config(source: &ConfigSource, store: &dyn DocumentStore) -> Result<FeedConfig> {
    let fallback = match source {
        ConfigSource::File(path) => return load_feed_config_from(path),
        ConfigSource::Document { name, fallback } => {
            match store.load(name).await? {
                Some(text) => match parse_feed_config(&text) {
                    Ok(config) => {
                        info!(
                            document = %name,
                            sources = config.sources.len(),
                            queries = config.queries.len(),
                            "feed config loaded from document"
                        );
                        return Ok(config);
                    }
                    Err(e) => warn!(document = %name, error = %e, "config document is not valid feed config"),
                },
                None => warn!(document = %name, "config document does not exist"),
            }
            fallback
        }
    };

    info!(path = %fallback.display(), "falling back to local feed config");
    load_feed_config_from(fallback)
}
