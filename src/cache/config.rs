//! Cache configuration.
//!
//! Controls the cache layer and the invalidation event pipeline via the
//! `[cache]` section of `chirp.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECONDS: u64 = 300;
const DEFAULT_SINGLE_FLIGHT_WAIT_MS: u64 = 5_000;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 10_000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 1_000;
const DEFAULT_PURGE_INTERVAL_MS: u64 = 60_000;

/// Cache configuration from `chirp.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, `get_or_compute` always computes and nothing is stored.
    pub enabled: bool,
    /// TTL for features without an adaptive TTL table.
    pub default_ttl_seconds: u64,
    /// How long a follower waits on an in-flight compute before computing
    /// on its own.
    pub single_flight_wait_ms: u64,
    /// Maximum pending domain events; the oldest is dropped on overflow.
    pub event_queue_limit: usize,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
    /// Auto-consume interval (ms) for eventual consistency.
    pub auto_consume_interval_ms: u64,
    /// Interval (ms) between purges of expired store entries.
    pub purge_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            single_flight_wait_ms: DEFAULT_SINGLE_FLIGHT_WAIT_MS,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl_seconds: settings.default_ttl_seconds,
            single_flight_wait_ms: settings.single_flight_wait_ms,
            event_queue_limit: settings.event_queue_limit,
            consume_batch_limit: settings.consume_batch_limit,
            auto_consume_interval_ms: settings.auto_consume_interval_ms,
            purge_interval_ms: settings.purge_interval_ms,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds.max(1))
    }

    pub fn single_flight_wait(&self) -> Duration {
        Duration::from_millis(self.single_flight_wait_ms)
    }

    pub fn auto_consume_interval(&self) -> Duration {
        Duration::from_millis(self.auto_consume_interval_ms.max(1))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms.max(1))
    }

    /// Returns the queue limit as NonZeroUsize, clamping to 1 if zero.
    pub fn event_queue_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.event_queue_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the batch limit as NonZeroUsize, clamping to 1 if zero.
    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
