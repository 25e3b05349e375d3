//! Runtime configuration consumed by the session layer.
//!
//! Values come from `TONGTOOL_*` environment variables or a JSON document.
//! Every field has a default, so a document only needs the credentials.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `TONGTOOL_APP_KEY` | `app_key` | empty |
//! | `TONGTOOL_APP_SECRET` | `app_secret` | empty |
//! | `TONGTOOL_DEBUG` | `debug` | `false` |
//! | `TONGTOOL_AUTH_BASE_URL` | `auth_base_url` | `https://open.tongtool.com/open-platform-service` |
//! | `TONGTOOL_API_BASE_URL` | `api_base_url` | `https://open.tongtool.com/api-service` |
//! | `TONGTOOL_ENABLE_CACHE` | `enable_cache` | `true` |
//! | `TONGTOOL_CACHE_TTL_SECS` | `cache_ttl_secs` | `600` |
//! | `TONGTOOL_CACHE_MAX_ENTRY_BYTES` | `cache_max_entry_bytes` | `4194304` |
//! | `TONGTOOL_TIMEOUT_MS` | `timeout_ms` | `10000` |
//! | `TONGTOOL_RETRY_COUNT` | `retry_count` | `2` |
//! | `TONGTOOL_RETRY_MIN_WAIT_MS` | `retry_min_wait_ms` | `1000` |
//! | `TONGTOOL_RETRY_MAX_WAIT_MS` | `retry_max_wait_ms` | `5000` |
//! | `TONGTOOL_FORCE_HARD_WAIT` | `force_hard_wait` | `false` |
//! | `TONGTOOL_DEFAULT_PAGE_SIZE` | `default_page_size` | `100` |
//! | `TONGTOOL_CREDENTIAL_TTL_SECS` | `credential_ttl_secs` | `7200` |
//! | `TONGTOOL_CREDENTIAL_REFRESH_MARGIN_SECS` | `credential_refresh_margin_secs` | `1800` |

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ApiError;

/// Upper bound for `cache_ttl_secs`: one year.
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub app_key: String,
    pub app_secret: String,
    pub auth_base_url: String,
    pub api_base_url: String,
    pub enable_cache: bool,
    pub cache_ttl_secs: u64,
    /// Responses larger than this are not cached.
    pub cache_max_entry_bytes: usize,
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retry_count: u32,
    pub retry_min_wait_ms: u64,
    pub retry_max_wait_ms: u64,
    /// On rate limiting, sleep until the next wall-clock minute instead of backing off.
    pub force_hard_wait: bool,
    pub default_page_size: u32,
    pub credential_ttl_secs: u64,
    /// A credential this close to expiry is refreshed before use.
    pub credential_refresh_margin_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            app_key: String::new(),
            app_secret: String::new(),
            auth_base_url: String::from("https://open.tongtool.com/open-platform-service"),
            api_base_url: String::from("https://open.tongtool.com/api-service"),
            enable_cache: true,
            cache_ttl_secs: 600,
            cache_max_entry_bytes: 4 * 1024 * 1024,
            timeout_ms: 10_000,
            retry_count: 2,
            retry_min_wait_ms: 1_000,
            retry_max_wait_ms: 5_000,
            force_hard_wait: false,
            default_page_size: 100,
            credential_ttl_secs: 7_200,
            credential_refresh_margin_secs: 1_800,
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("debug", &self.debug)
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("auth_base_url", &self.auth_base_url)
            .field("api_base_url", &self.api_base_url)
            .field("enable_cache", &self.enable_cache)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_max_entry_bytes", &self.cache_max_entry_bytes)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_count", &self.retry_count)
            .field("retry_min_wait_ms", &self.retry_min_wait_ms)
            .field("retry_max_wait_ms", &self.retry_max_wait_ms)
            .field("force_hard_wait", &self.force_hard_wait)
            .field("default_page_size", &self.default_page_size)
            .field("credential_ttl_secs", &self.credential_ttl_secs)
            .field(
                "credential_refresh_margin_secs",
                &self.credential_refresh_margin_secs,
            )
            .finish()
    }
}

impl Config {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            ..Self::default()
        }
    }

    /// Reads `TONGTOOL_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let mut config = Self::default();

        if let Some(value) = lookup("TONGTOOL_APP_KEY") {
            config.app_key = value;
        }
        if let Some(value) = lookup("TONGTOOL_APP_SECRET") {
            config.app_secret = value;
        }
        if let Some(value) = lookup("TONGTOOL_AUTH_BASE_URL") {
            config.auth_base_url = value;
        }
        if let Some(value) = lookup("TONGTOOL_API_BASE_URL") {
            config.api_base_url = value;
        }
        if let Some(value) = lookup("TONGTOOL_DEBUG") {
            config.debug = parse_flag("TONGTOOL_DEBUG", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_ENABLE_CACHE") {
            config.enable_cache = parse_flag("TONGTOOL_ENABLE_CACHE", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_FORCE_HARD_WAIT") {
            config.force_hard_wait = parse_flag("TONGTOOL_FORCE_HARD_WAIT", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_CACHE_TTL_SECS") {
            config.cache_ttl_secs = parse_number("TONGTOOL_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_TIMEOUT_MS") {
            config.timeout_ms = parse_number("TONGTOOL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_RETRY_COUNT") {
            config.retry_count = parse_number("TONGTOOL_RETRY_COUNT", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_RETRY_MIN_WAIT_MS") {
            config.retry_min_wait_ms = parse_number("TONGTOOL_RETRY_MIN_WAIT_MS", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_RETRY_MAX_WAIT_MS") {
            config.retry_max_wait_ms = parse_number("TONGTOOL_RETRY_MAX_WAIT_MS", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_DEFAULT_PAGE_SIZE") {
            config.default_page_size = parse_number("TONGTOOL_DEFAULT_PAGE_SIZE", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_CACHE_MAX_ENTRY_BYTES") {
            config.cache_max_entry_bytes =
                parse_number("TONGTOOL_CACHE_MAX_ENTRY_BYTES", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_CREDENTIAL_TTL_SECS") {
            config.credential_ttl_secs = parse_number("TONGTOOL_CREDENTIAL_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("TONGTOOL_CREDENTIAL_REFRESH_MARGIN_SECS") {
            config.credential_refresh_margin_secs =
                parse_number("TONGTOOL_CREDENTIAL_REFRESH_MARGIN_SECS", &value)?;
        }

        Ok(config)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ApiError> {
        serde_json::from_str(input).map_err(ApiError::Serialization)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| {
            ApiError::Config(format!("failed to read {}: {error}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.app_key.trim().is_empty() || self.app_secret.trim().is_empty() {
            return Err(ApiError::Config(String::from(
                "app_key and app_secret must be set",
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ApiError::Config(String::from(
                "timeout_ms must be greater than zero",
            )));
        }
        if self.default_page_size == 0 {
            return Err(ApiError::Config(String::from(
                "default_page_size must be greater than zero",
            )));
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ApiError::Config(format!(
                "cache_ttl_secs ({}) exceeds {MAX_CACHE_TTL_SECS}",
                self.cache_ttl_secs
            )));
        }
        if self.retry_min_wait_ms > self.retry_max_wait_ms {
            return Err(ApiError::Config(format!(
                "retry_min_wait_ms ({}) exceeds retry_max_wait_ms ({})",
                self.retry_min_wait_ms, self.retry_max_wait_ms
            )));
        }
        Ok(())
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub const fn retry_min_wait(&self) -> Duration {
        Duration::from_millis(self.retry_min_wait_ms)
    }

    pub const fn retry_max_wait(&self) -> Duration {
        Duration::from_millis(self.retry_max_wait_ms)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ApiError::Config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::Config(format!("{name} must be a number, got '{value}'")))
}
