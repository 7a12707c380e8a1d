//! Cache Statistics Module
//!
//! Tracks cache performance metrics: hits, misses, evictions and computations.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of lookups that found a live entry
    pub hits: u64,
    /// Number of lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries evicted by the LRU capacity policy
    pub evictions: u64,
    /// Entries removed because they expired
    pub expirations: u64,
    /// Entries removed by remove, invalidation or cascade
    pub invalidations: u64,
    /// Compute functions that ran to completion successfully
    pub computations: u64,
    /// Compute functions that failed
    pub computation_failures: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_removal(&mut self, reason: RemovalReason, count: usize) {
        let count = count as u64;
        match reason {
            RemovalReason::Capacity => self.evictions += count,
            RemovalReason::Expired => self.expirations += count,
            RemovalReason::Invalidated => self.invalidations += count,
        }
    }

    pub fn record_computation(&mut self, succeeded: bool) {
        if succeeded {
            self.computations += 1;
        } else {
            self.computation_failures += 1;
        }
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Removal Reason ==
/// Why an entry (and its cascade) left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Capacity,
    Expired,
    Invalidated,
}
