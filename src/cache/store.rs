//! Entry Store Module
//!
//! The key -> entry mapping behind the cache manager. `EntryStore` is the
//! seam for alternative backends; `MemoryStore` is the process-local one,
//! combining HashMap storage with LRU tracking.
//!
//! Stores know nothing about dependencies or expiration policy beyond the
//! deadline recorded on each entry. The manager calls them while holding its
//! lock, so implementations only need `&mut self`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, LruTracker};
use crate::error::Result;

// == Entry Store Trait ==
/// Backing storage for cache entries.
///
/// Failures are reported as [`CacheError::Backend`](crate::error::CacheError::Backend)
/// and surface to the caller of the operation that hit them.
pub trait EntryStore<V>: Send {
    /// Returns the current entry, counting as an access for eviction order.
    fn get(&mut self, key: &str) -> Result<Option<CacheEntry<V>>>;

    /// Inserts or replaces an entry.
    fn set(&mut self, key: String, entry: CacheEntry<V>) -> Result<()>;

    /// Removes an entry, returning whether it existed.
    fn delete(&mut self, key: &str) -> Result<bool>;

    fn contains_key(&self, key: &str) -> Result<bool>;

    /// Snapshot of all stored keys. Iterating the copy is safe while the
    /// store keeps changing.
    fn keys(&self) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize>;

    /// Stored keys from least to most recently used.
    fn eviction_order(&self) -> Result<Vec<String>>;

    /// Keys whose deadline is at or before `now`. Does not affect eviction order.
    fn expired_keys(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    fn clear(&mut self) -> Result<()>;
}

// == Memory Store ==
/// In-process entry storage with LRU access tracking.
#[derive(Debug)]
pub struct MemoryStore<V> {
    /// Key-entry storage
    entries: HashMap<String, CacheEntry<V>>,
    /// LRU access tracker
    lru: LruTracker,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> EntryStore<V> for MemoryStore<V> {
    fn get(&mut self, key: &str) -> Result<Option<CacheEntry<V>>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.lru.touch(key);
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }

    fn set(&mut self, key: String, entry: CacheEntry<V>) -> Result<()> {
        self.lru.touch(&key);
        self.entries.insert(key, entry);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        self.lru.remove(key);
        Ok(self.entries.remove(key).is_some())
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn eviction_order(&self) -> Result<Vec<String>> {
        Ok(self.lru.oldest_first().cloned().collect())
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.lru.clear();
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entry(key: &str, value: &str) -> CacheEntry<String> {
        CacheEntry::new(key.to_string(), value.to_string(), HashSet::new(), None)
    }

    fn put(store: &mut MemoryStore<String>, key: &str, value: &str) {
        store.set(key.to_string(), entry(key, value)).unwrap();
    }

    #[test]
    fn test_store_new() {
        let store: MemoryStore<String> = MemoryStore::new();
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = MemoryStore::new();
        put(&mut store, "key1", "value1");

        let entry = store.get("key1").unwrap().unwrap();
        assert_eq!(entry.value, "value1");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store: MemoryStore<String> = MemoryStore::new();
        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = MemoryStore::new();
        put(&mut store, "key1", "value1");
        put(&mut store, "key1", "value2");

        assert_eq!(store.get("key1").unwrap().unwrap().value, "value2");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_store_delete() {
        let mut store = MemoryStore::new();
        put(&mut store, "key1", "value1");

        assert!(store.delete("key1").unwrap());
        assert!(!store.delete("key1").unwrap());
        assert!(!store.contains_key("key1").unwrap());
        assert!(store.eviction_order().unwrap().is_empty());
    }

    #[test]
    fn test_store_eviction_order_follows_access() {
        let mut store = MemoryStore::new();
        put(&mut store, "key1", "value1");
        put(&mut store, "key2", "value2");
        put(&mut store, "key3", "value3");

        // Access key1 to make it most recently used
        store.get("key1").unwrap();

        assert_eq!(
            store.eviction_order().unwrap(),
            vec!["key2".to_string(), "key3".to_string(), "key1".to_string()]
        );
    }

    #[test]
    fn test_store_keys_snapshot_is_independent() {
        let mut store = MemoryStore::new();
        put(&mut store, "a", "1");
        put(&mut store, "b", "2");

        let keys = store.keys().unwrap();
        for key in &keys {
            store.delete(key).unwrap();
        }

        assert_eq!(keys.len(), 2);
        assert_eq!(store.len().unwrap(), 0);
        // The snapshot can be walked again after the store changed
        assert_eq!(keys.iter().count(), 2);
    }

    #[test]
    fn test_store_expired_keys() {
        let mut store = MemoryStore::new();
        put(&mut store, "fresh", "1");
        let mut stale = entry("stale", "2");
        stale.expires_at = Some(Utc::now() - chrono::TimeDelta::seconds(1));
        store.set("stale".to_string(), stale).unwrap();

        let before = store.eviction_order().unwrap();
        assert_eq!(store.expired_keys(Utc::now()).unwrap(), vec!["stale".to_string()]);
        // Listing expired keys is not an access
        assert_eq!(store.eviction_order().unwrap(), before);
    }

    #[test]
    fn test_store_clear() {
        let mut store = MemoryStore::new();
        put(&mut store, "a", "1");
        put(&mut store, "b", "2");
        store.clear().unwrap();

        assert_eq!(store.len().unwrap(), 0);
        assert!(store.eviction_order().unwrap().is_empty());
    }
}
