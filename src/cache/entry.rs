//! Cache Entry Module
//!
//! Defines individual cache entries, their dependencies and expiration policy.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

// == Expiration ==
/// How long an entry stays live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Never expires, even when a default expiration is configured
    Never,
    /// Expires at a fixed point in time
    Absolute(DateTime<Utc>),
    /// Expires a fixed duration after it was stored
    After(Duration),
    /// Expires after a period without hits; each hit restarts the period
    Sliding(Duration),
}

// == Entry Options ==
/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Explicit expiration; `None` falls back to the configured default
    pub expiration: Option<Expiration>,
}

impl EntryOptions {
    pub fn expires(expiration: Expiration) -> Self {
        Self {
            expiration: Some(expiration),
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value, dependencies and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Immutable identifier
    pub key: String,
    /// The stored value
    pub value: V,
    /// Keys this entry depends on
    pub dependencies: HashSet<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp, None = no expiration
    pub expires_at: Option<DateTime<Utc>>,
    /// Sliding window refreshed on every hit
    pub sliding: Option<TimeDelta>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry.
    ///
    /// # Arguments
    /// * `key` - The entry's key
    /// * `value` - The value to store
    /// * `dependencies` - Keys whose removal must also remove this entry
    /// * `expiration` - Resolved expiration policy, None = never expires
    pub fn new(
        key: String,
        value: V,
        dependencies: HashSet<String>,
        expiration: Option<Expiration>,
    ) -> Self {
        let now = Utc::now();
        let (expires_at, sliding) = match expiration {
            None | Some(Expiration::Never) => (None, None),
            Some(Expiration::Absolute(at)) => (Some(at), None),
            Some(Expiration::After(ttl)) => (deadline(now, ttl), None),
            Some(Expiration::Sliding(window)) => {
                (deadline(now, window), Some(to_delta(window)))
            }
        };

        Self {
            key,
            value,
            dependencies,
            created_at: now,
            expires_at,
            sliding,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is expired once `now` reaches its expiration time.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    // == Touch ==
    /// Restarts the sliding window. Returns true if the deadline moved.
    pub fn touch(&mut self, now: DateTime<Utc>) -> bool {
        match self.sliding {
            Some(window) => {
                self.expires_at = now.checked_add_signed(window);
                true
            }
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns the time left before expiration, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has a deadline in the future
    /// - `None` if the entry never expires
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            (expires - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

// Out-of-range deadlines mean the entry effectively never expires.
fn deadline(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    now.checked_add_signed(to_delta(duration))
}
