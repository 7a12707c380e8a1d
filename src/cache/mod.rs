//! Cache Module
//!
//! Provides an in-process cache with dependency tracking, cascade
//! invalidation, expiration and LRU eviction.

mod entry;
mod graph;
mod lru;
mod manager;
mod request;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{CacheEntry, EntryOptions, Expiration};
pub use graph::DependencyGraph;
pub use lru::LruTracker;
pub use manager::CacheManager;
pub use request::{RequestCache, RequestId};
pub use stats::{CacheStats, RemovalReason};
pub use store::{EntryStore, MemoryStore};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
