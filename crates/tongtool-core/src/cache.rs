//! In-memory caching for API responses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Defines the behavior of the in-memory cache for an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the response to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry,
    /// and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

/// Per-call cache behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CachePolicy {
    pub mode: CacheMode,
    /// Overrides the cache's default TTL for entries written by this call.
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub const fn enabled() -> Self {
        Self {
            mode: CacheMode::Use,
            ttl: None,
        }
    }

    pub const fn bypass() -> Self {
        Self {
            mode: CacheMode::Bypass,
            ttl: None,
        }
    }

    pub const fn refresh() -> Self {
        Self {
            mode: CacheMode::Refresh,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub const fn reads(&self) -> bool {
        matches!(self.mode, CacheMode::Use)
    }

    pub const fn writes(&self) -> bool {
        matches!(self.mode, CacheMode::Use | CacheMode::Refresh)
    }
}

/// Rejected cache writes. Callers log these; the response itself is still valid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache is disabled")]
    Disabled,

    #[error("entry of {size} bytes exceeds the {limit} byte limit")]
    EntryTooLarge { size: usize, limit: usize },
}

/// A stored response body. Entries are replaced, never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Arc<str>,
    pub stored_at_epoch: i64,
    pub ttl: Duration,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now <= expires_at)
    }
}

/// Thread-safe TTL cache for API responses, sharded internally.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    default_ttl: Duration,
    max_entry_bytes: usize,
}

impl ResponseCache {
    /// Create a new cache store with a default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
            max_entry_bytes: usize::MAX,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let ttl = if config.enable_cache {
            config.cache_ttl()
        } else {
            Duration::ZERO
        };
        Self::new(ttl).with_max_entry_bytes(config.cache_max_entry_bytes)
    }

    /// Create a disabled cache: reads miss and writes are rejected.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn with_max_entry_bytes(mut self, max_entry_bytes: usize) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.default_ttl.is_zero()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the payload if an entry exists and hasn't expired.
    ///
    /// Expired entries stay in the map until [`ResponseCache::sweep`] runs.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let entry = self.entries.get(key)?;
        entry
            .is_live(Instant::now())
            .then(|| Arc::clone(&entry.payload))
    }

    /// Store a payload. `ttl_override` replaces the default TTL for this entry.
    pub fn put(
        &self,
        key: impl Into<String>,
        payload: impl Into<Arc<str>>,
        ttl_override: Option<Duration>,
    ) -> Result<(), CacheError> {
        if self.is_disabled() {
            return Err(CacheError::Disabled);
        }

        let payload = payload.into();
        if payload.len() > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size: payload.len(),
                limit: self.max_entry_bytes,
            });
        }

        let key = key.into();
        let ttl = ttl_override.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            stored_at_epoch: OffsetDateTime::now_utc().unix_timestamp(),
            ttl,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Remove expired entries, returning how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Run [`ResponseCache::sweep`] on a fixed interval until the handle is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "swept expired cache entries");
                }
            }
        })
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
