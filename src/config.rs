//! Application configuration.
//!
//! Loaded with figment from an optional `backlog.toml`, overridden by
//! `BACKLOG_`-prefixed environment variables (e.g. `BACKLOG_CLIENT_ID`).
//! Durations accept plain seconds (`3600`) or unit strings (`"1h"`, `"5m"`).

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILE: &str = "backlog.toml";
pub const ENV_PREFIX: &str = "BACKLOG_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Level applied to this crate's targets when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base URL of the metadata API; endpoints are joined onto it.
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// OAuth2 token endpoint for the client-credentials grant.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    #[serde(
        default = "default_upstream_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub upstream_cache_ttl: Duration,
    #[serde(
        default = "default_token_safety_margin",
        deserialize_with = "deserialize_duration"
    )]
    pub token_safety_margin: Duration,
    #[serde(
        default = "default_persistent_cache_window",
        deserialize_with = "deserialize_duration"
    )]
    pub persistent_cache_window: Duration,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    /// Outbound upstream requests per second.
    #[serde(default = "default_upstream_rate_limit")]
    pub upstream_rate_limit: NonZeroU32,

    /// Directory holding the durable cache tier.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// JSON snapshot (`{"<document path>": {fields}}`) seeding the local
    /// document store. The store starts empty when unset.
    pub documents_path: Option<PathBuf>,
}

impl Config {
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Path of the durable tier's backing file.
    pub fn durable_store_path(&self) -> PathBuf {
        self.cache_dir.join("durable.json")
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_upstream_base_url() -> String {
    "https://api.igdb.com/v4".to_owned()
}

fn default_auth_url() -> String {
    "https://id.twitch.tv/oauth2/token".to_owned()
}

fn default_upstream_cache_ttl() -> Duration {
    crate::upstream::DEFAULT_REQUEST_TTL
}

fn default_token_safety_margin() -> Duration {
    crate::upstream::token::DEFAULT_SAFETY_MARGIN
}

fn default_persistent_cache_window() -> Duration {
    crate::cache::CACHE_DURATION
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_upstream_rate_limit() -> NonZeroU32 {
    crate::upstream::DEFAULT_RATE_LIMIT
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".backlog")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

/// Parse a duration from integer seconds or a string such as `"90s"` or `"1.5h"`.
fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    use serde::de::Error;

    match DurationValue::deserialize(deserializer)? {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationValue::Text(text) => {
            let parsed = DurationParser::with_all_time_units()
                .parse(text.trim())
                .map_err(|e| D::Error::custom(format!("invalid duration '{text}': {e}")))?;
            Duration::try_from(parsed)
                .map_err(|e| D::Error::custom(format!("invalid duration '{text}': {e}")))
        }
    }
}
