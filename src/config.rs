//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::Deserialize;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expiration in milliseconds applied to entries stored without an explicit policy
    pub default_expiration_ms: Option<u64>,
    /// Maximum number of entries; least recently used entries are evicted beyond it
    pub max_entries: Option<usize>,
    /// Background expiration sweep interval in milliseconds
    pub sweep_interval_ms: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_EXPIRATION_MS` - Default expiration (default: none)
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: unbounded)
    /// - `CACHE_SWEEP_INTERVAL_MS` - Sweep frequency in milliseconds (default: 1000)
    pub fn from_env() -> Self {
        Self {
            default_expiration_ms: env::var("CACHE_DEFAULT_EXPIRATION_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            max_entries: env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok()),
            sweep_interval_ms: env::var("CACHE_SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }

    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration_ms = Some(expiration.as_millis() as u64);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Default expiration as a Duration, if configured.
    pub fn default_expiration(&self) -> Option<Duration> {
        self.default_expiration_ms.map(Duration::from_millis)
    }

    /// Sweep interval as a Duration. Never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiration_ms: None,
            max_entries: None,
            sweep_interval_ms: 1000,
        }
    }
}
