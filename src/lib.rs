//! depcache - An in-process cache with dependency tracking
//!
//! Entries may declare the keys they depend on. Removing a key removes every
//! entry built on it, transitively. `get_or_add` runs at most one computation
//! per key at a time and shares its result with every concurrent caller.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheManager, EntryOptions, EntryStore, Expiration, MemoryStore, RequestCache};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
