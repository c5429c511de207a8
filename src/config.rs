//! Configuration file parser for the proxy's `config.toml`.
//!
//! The file declares the listening surface (`[server]`) and the proxied feeds
//! (`[[feeds]]`), each with an ordered rule list. Unknown top-level keys are
//! accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{DEFAULT_TIMEOUT, DEFAULT_TTL};
use crate::util::validate_url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Feed id is empty or contains characters unsafe in a URL path segment.
    #[error("Invalid feed id {0:?} (allowed: letters, digits, '.', '_', '-')")]
    InvalidFeedId(String),

    #[error("Duplicate feed id {0:?}")]
    DuplicateFeedId(String),

    #[error("Feed {feed_id:?} has an invalid source URL: {reason}")]
    InvalidSource { feed_id: String, reason: String },

    #[error("Invalid server.base_url: {0}")]
    InvalidBaseUrl(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level proxy configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub feeds: Vec<FeedConfig>,
}

/// `[server]` table: where to listen and how to talk to upstreams.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    pub listen_address: String,

    /// Path prefix under which feeds are served (`{prefix}/{id}.xml`).
    pub route_prefix: String,

    /// Public URL of the proxy's feed directory, e.g.
    /// `https://podcasts.example.com/rss`. When set, every served feed's
    /// `<itunes:new-feed-url>` points back at the proxy.
    pub base_url: Option<String>,

    /// How long a fetched body is served without contacting the upstream.
    pub cache_ttl_secs: u64,

    /// Timeout for a single upstream request.
    pub upstream_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8000".to_string(),
            route_prefix: "/rss".to_string(),
            base_url: None,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            upstream_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl ServerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Public URL of a served feed, or `None` when no base URL is configured.
    pub fn public_feed_url(&self, feed_id: &str) -> Option<String> {
        self.base_url
            .as_deref()
            .and_then(|base| feed_url_from_base(base, feed_id))
    }
}

/// Joins a base URL and a feed id into `{base}/{id}.xml`.
///
/// Surrounding whitespace and trailing slashes of `base` are ignored. Returns
/// `None` if nothing is left of the base.
pub fn feed_url_from_base(base: &str, feed_id: &str) -> Option<String> {
    let base = base.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}/{feed_id}.xml"))
}

/// One `[[feeds]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    /// Stable identifier, used in the served path.
    pub id: String,

    /// Upstream feed URL.
    pub source: String,

    /// Ordered rules; an item is served only if every rule accepts it.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A filter rule as written in the config file, discriminated by `type`.
///
/// Missing parameters default to empty/zero. A `type` this build doesn't know
/// about becomes [`Rule::Unknown`], which keeps every item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    /// Keep items whose `itunes:duration` is at most `value` (iTunes notation).
    LengthMax {
        #[serde(default)]
        value: String,
    },
    /// Keep items whose title contains `value`, ignoring case.
    TitleContains {
        #[serde(default)]
        value: String,
    },
    /// Drop items whose title contains `value`, ignoring case.
    TitleExcludes {
        #[serde(default)]
        value: String,
    },
    /// Keep items whose title matches the regex `value` anywhere.
    TitleRegex {
        #[serde(default)]
        value: String,
    },
    /// Keep items whose episode number is at least `min`.
    EpisodeNumberMin {
        #[serde(default)]
        min: u32,
    },
    /// Keep only the last part of multi-part episodes (`[2/2]`, `[3/3]`).
    TitleFractionEquals,
    #[serde(other)]
    Unknown,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    ///
    /// The result is not validated; call [`Config::validate`] before serving.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["server", "feeds"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Checks feed ids, source URLs and the base URL.
    ///
    /// Rules are not rejected here: an unknown rule type or a `title_regex`
    /// that does not compile is only logged. The regex still fails every
    /// request for that feed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base) = self.server.base_url.as_deref() {
            validate_url(base).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !is_valid_feed_id(&feed.id) {
                return Err(ConfigError::InvalidFeedId(feed.id.clone()));
            }
            if !seen.insert(feed.id.as_str()) {
                return Err(ConfigError::DuplicateFeedId(feed.id.clone()));
            }
            validate_url(&feed.source).map_err(|e| ConfigError::InvalidSource {
                feed_id: feed.id.clone(),
                reason: e.to_string(),
            })?;

            for rule in &feed.rules {
                match rule {
                    Rule::TitleRegex { value } => {
                        if let Err(e) = regex::Regex::new(value) {
                            tracing::warn!(
                                feed_id = %feed.id,
                                pattern = %value,
                                error = %e,
                                "title_regex does not compile, requests for this feed will fail"
                            );
                        }
                    }
                    Rule::Unknown => {
                        tracing::warn!(feed_id = %feed.id, "Unknown rule type, it will keep every item");
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

fn is_valid_feed_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

// ============================================================================
// Tests
// ============================================================================
