//! Configuration file parser.
//!
//! The file is TOML, or JSON when its name ends in `.json`. Reddit secrets
//! may instead come from `REDDIT_PASSWORD`, `REDDIT_CLIENT_ID` and
//! `REDDIT_CLIENT_SECRET`; the environment takes precedence over the file.
//! Unknown keys are ignored, though we log a warning for each one since it
//! is usually a typo.
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::util::validate_feed_url;

pub const ENV_PASSWORD: &str = "REDDIT_PASSWORD";
pub const ENV_CLIENT_ID: &str = "REDDIT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON in config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One alert feed and the subreddits its entries go to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    pub subreddits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// File layout before validation. Every key is optional here so that
/// missing settings produce [`ConfigError::Missing`] rather than a parse
/// error, and so secrets can come from the environment instead.
#[derive(Deserialize)]
#[serde(default)]
struct RawConfig {
    user_agent: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    feeds: Vec<FeedConfig>,
    resubmit: bool,
    check_rate: u64,
    database: String,
    web: WebConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            feeds: Vec::new(),
            resubmit: false,
            check_rate: Config::DEFAULT_CHECK_RATE,
            database: Config::DEFAULT_DATABASE.to_string(),
            web: WebConfig::default(),
        }
    }
}

const KNOWN_KEYS: [&str; 10] = [
    "user_agent",
    "username",
    "password",
    "client_id",
    "client_secret",
    "feeds",
    "resubmit",
    "check_rate",
    "database",
    "web",
];

/// Validated application configuration.
///
/// Debug output masks the password and client secret.
pub struct Config {
    pub user_agent: String,
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub client_secret: SecretString,
    pub feeds: Vec<FeedConfig>,
    /// Whether Reddit may accept a url that was already submitted
    pub resubmit: bool,
    /// Seconds between polling cycles
    pub check_rate: u64,
    pub database: String,
    pub web: WebConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("feeds", &self.feeds)
            .field("resubmit", &self.resubmit)
            .field("check_rate", &self.check_rate)
            .field("database", &self.database)
            .field("web", &self.web)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;
    pub const DEFAULT_CHECK_RATE: u64 = 300;
    pub const DEFAULT_DATABASE: &'static str = "database.db";

    /// Load configuration from a file, with secrets overridable from the
    /// process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading environment overrides through `env`.
    pub fn load_with_env<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Check file size before reading to avoid loading a huge file
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content, env)?
        } else {
            Self::from_toml_str(&content, env)?
        };

        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            check_rate = config.check_rate,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Ok(table) = content.parse::<toml::Table>() {
            warn_unknown_keys(table.keys().map(String::as_str));
        }
        let raw: RawConfig = toml::from_str(content)?;
        Self::from_raw(raw, env)
    }

    pub fn from_json_str<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(content) {
            warn_unknown_keys(map.keys().map(String::as_str));
        }
        let raw: RawConfig = serde_json::from_str(content)?;
        Self::from_raw(raw, env)
    }

    fn from_raw<F>(raw: RawConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = env(ENV_PASSWORD)
            .or(raw.password)
            .ok_or(ConfigError::Missing("password"))?;
        let client_id = env(ENV_CLIENT_ID)
            .or(raw.client_id)
            .ok_or(ConfigError::Missing("client_id"))?;
        let client_secret = env(ENV_CLIENT_SECRET)
            .or(raw.client_secret)
            .ok_or(ConfigError::Missing("client_secret"))?;

        let user_agent = non_empty(raw.user_agent, "user_agent")?;
        let username = non_empty(raw.username, "username")?;

        if raw.feeds.is_empty() {
            return Err(ConfigError::Missing("feeds"));
        }
        let feeds = raw
            .feeds
            .into_iter()
            .map(validate_feed)
            .collect::<Result<Vec<_>, _>>()?;

        if raw.check_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "check_rate".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            user_agent,
            username,
            password: SecretString::from(password),
            client_id,
            client_secret: SecretString::from(client_secret),
            feeds,
            resubmit: raw.resubmit,
            check_rate: raw.check_rate,
            database: raw.database,
            web: raw.web,
        })
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_rate)
    }
}

fn warn_unknown_keys<'a>(keys: impl Iterator<Item = &'a str>) {
    for key in keys {
        if !KNOWN_KEYS.contains(&key) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(field)),
    }
}

/// Checks the feed url and normalizes subreddit names (`r/rust` → `rust`).
fn validate_feed(feed: FeedConfig) -> Result<FeedConfig, ConfigError> {
    validate_feed_url(&feed.url).map_err(|e| ConfigError::Invalid {
        field: format!("feeds.url ({})", feed.url),
        reason: e.to_string(),
    })?;

    let subreddits: Vec<String> = feed
        .subreddits
        .iter()
        .map(|s| {
            let s = s.trim();
            s.strip_prefix("/r/")
                .or_else(|| s.strip_prefix("r/"))
                .unwrap_or(s)
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect();

    if subreddits.is_empty() {
        return Err(ConfigError::Invalid {
            field: format!("feeds.subreddits ({})", feed.url),
            reason: "at least one subreddit is required".to_string(),
        });
    }

    Ok(FeedConfig {
        url: feed.url,
        subreddits,
    })
}

// ============================================================================
// Tests
// ============================================================================
