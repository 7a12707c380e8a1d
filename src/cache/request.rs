//! Request-scoped Cache Module
//!
//! A short-lived view over a [`CacheManager`]: keys written through it are
//! tagged with the request's id and removed when the request ends.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::manager::Lookup;
use crate::cache::{CacheManager, EntryOptions};
use crate::error::Result;

// == Request Id ==
/// Identifies one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// == Request Cache ==
/// Per-request memoization on top of the shared cache.
///
/// Reads see the whole shared cache. Writes (puts, and `get_or_add` calls
/// whose computed result was stored) are remembered and removed, with
/// cascade, by [`end`](Self::end) or on drop.
pub struct RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: CacheManager<V>,
    id: RequestId,
    tagged: Mutex<HashSet<String>>,
}

impl<V> RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(cache: CacheManager<V>) -> Self {
        let id = RequestId::new();
        debug!("Request {} started", id);
        Self {
            cache,
            id,
            tagged: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn try_get(&self, key: &str) -> Result<Option<V>> {
        self.cache.try_get(key)
    }

    pub async fn get_or_add<F, Fut>(&self, key: &str, compute: F, dependencies: &[&str]) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let (value, lookup) = self
            .cache
            .resolve(key, compute, dependencies, EntryOptions::default())
            .await?;
        if lookup == Lookup::Computed {
            self.tag(key);
        }
        Ok(value)
    }

    pub fn put(&self, key: &str, value: V, dependencies: &[&str]) -> Result<()> {
        self.cache.put(key, value, dependencies)?;
        self.tag(key);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<usize> {
        self.tagged.lock().remove(key);
        self.cache.remove(key)
    }

    /// Keys this request has written and not yet removed.
    pub fn tagged_keys(&self) -> Vec<String> {
        self.tagged.lock().iter().cloned().collect()
    }

    // == End ==
    /// Removes every key tagged by this request. Returns the number of
    /// entries evicted, cascades included.
    pub fn end(mut self) -> Result<usize> {
        self.release()
    }

    fn tag(&self, key: &str) {
        self.tagged.lock().insert(key.to_string());
    }

    // Tries every tagged key and reports the first failure.
    fn release(&mut self) -> Result<usize> {
        let keys = std::mem::take(self.tagged.get_mut());
        let mut evicted = 0;
        let mut first_error = None;

        for key in keys {
            match self.cache.remove(&key) {
                Ok(count) => evicted += count,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!("Request {} ended, {} entries evicted", self.id, evicted);
        match first_error {
            Some(err) => Err(err),
            None => Ok(evicted),
        }
    }
}

impl<V> Drop for RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.tagged.get_mut().is_empty() {
            return;
        }
        if let Err(err) = self.release() {
            warn!("Failed to end request {}: {}", self.id, err);
        }
    }
}
