//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Errors are `Clone` because one failed computation is reported to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Declaring the dependency would make `key` depend on itself
    #[error("Dependency cycle detected: {key} cannot depend on {dependency}")]
    CycleDetected { key: String, dependency: String },

    /// The compute function passed to `get_or_add` failed
    #[error("Computation failed for key {key}: {message}")]
    ComputationFailed { key: String, message: String },

    /// Key is empty or too long
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Cache is full and nothing could be evicted
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// The backing store failed
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Returns true if this error came from a failed computation.
    pub fn is_computation_failure(&self) -> bool {
        matches!(self, CacheError::ComputationFailed { .. })
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
