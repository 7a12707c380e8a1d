//! Cache Manager Module
//!
//! Public face of the cache. Combines an entry store with the dependency
//! graph and guarantees at most one running computation per key.
//!
//! All bookkeeping (store, graph, stats, in-flight computations) sits behind
//! one mutex that is only held for short synchronous sections. The only
//! operation that waits is `get_or_add`, and it waits outside the lock.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheStats, DependencyGraph, EntryOptions, EntryStore, Expiration, MemoryStore,
    RemovalReason, RequestCache, MAX_KEY_LENGTH,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::spawn_sweep_task;

// Resolves to the value and whether it was stored.
type Computation<V> = Shared<BoxFuture<'static, Result<(V, bool)>>>;

/// How `get_or_add` produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// A live entry was already stored
    Hit,
    /// This caller started the computation and its result was stored
    Computed,
    /// This caller started the computation but the result was stale
    Discarded,
    /// This caller attached to a computation someone else started
    Joined,
}

// A computation that has been started but not yet completed.
struct InFlight<V> {
    id: u64,
    dependencies: Vec<String>,
    /// Set when the key or one of its dependencies was removed meanwhile.
    /// The result still reaches the waiters but is not stored.
    stale: bool,
    computation: Computation<V>,
}

struct State<V> {
    store: Box<dyn EntryStore<V>>,
    graph: DependencyGraph,
    stats: CacheStats,
    in_flight: HashMap<String, InFlight<V>>,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    config: CacheConfig,
    next_flight_id: AtomicU64,
}

// == Cache Manager ==
/// Dependency-aware cache.
///
/// Cloning is cheap; clones share the same cache.
pub struct CacheManager<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a cache backed by process memory.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Creates a cache over a custom backing store.
    pub fn with_store<S>(config: CacheConfig, store: S) -> Self
    where
        S: EntryStore<V> + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    store: Box::new(store),
                    graph: DependencyGraph::new(),
                    stats: CacheStats::new(),
                    in_flight: HashMap::new(),
                }),
                config,
                next_flight_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // == Try Get ==
    /// Returns the live value for `key` without computing anything.
    ///
    /// Expired entries read as absent but stay stored until swept.
    pub fn try_get(&self, key: &str) -> Result<Option<V>> {
        let mut state = self.inner.state.lock();
        state.live_value(key, Utc::now(), false)
    }

    // == Get Or Add ==
    /// Returns the value for `key`, computing and storing it if absent.
    ///
    /// Concurrent callers for the same absent key share one run of
    /// `compute`. If it fails, every one of them gets
    /// [`CacheError::ComputationFailed`], nothing is stored and the next
    /// call tries again. When joining a running computation the caller's
    /// `dependencies` are ignored in favor of the starter's.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `compute` - Produces the value when it is missing
    /// * `dependencies` - Keys whose removal must also remove this entry
    pub async fn get_or_add<F, Fut>(&self, key: &str, compute: F, dependencies: &[&str]) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_or_add_with(key, compute, dependencies, EntryOptions::default())
            .await
    }

    /// `get_or_add` with explicit entry options.
    pub async fn get_or_add_with<F, Fut>(
        &self,
        key: &str,
        compute: F,
        dependencies: &[&str],
        options: EntryOptions,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.resolve(key, compute, dependencies, options)
            .await
            .map(|(value, _)| value)
    }

    pub(crate) async fn resolve<F, Fut>(
        &self,
        key: &str,
        compute: F,
        dependencies: &[&str],
        options: EntryOptions,
    ) -> Result<(V, Lookup)>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        validate_key(key)?;
        let dependencies = validate_dependencies(dependencies)?;

        let (computation, lookup) = {
            let mut state = self.inner.state.lock();
            if let Some(value) = state.live_value(key, Utc::now(), true)? {
                return Ok((value, Lookup::Hit));
            }

            match state.in_flight.get(key) {
                Some(flight) if !flight.stale => {
                    debug!("Joining in-flight computation for key {}", key);
                    (flight.computation.clone(), Lookup::Joined)
                }
                _ => {
                    state.graph.check_edges(key, &dependencies)?;
                    let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    let computation =
                        self.start(key.to_string(), id, dependencies.clone(), options, compute);
                    // A stale flight being replaced finishes on its own and is discarded
                    state.in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            dependencies,
                            stale: false,
                            computation: computation.clone(),
                        },
                    );
                    debug!("Started computation {} for key {}", id, key);
                    (computation, Lookup::Computed)
                }
            }
        };

        let (value, stored) = computation.await?;
        match lookup {
            Lookup::Computed if !stored => Ok((value, Lookup::Discarded)),
            _ => Ok((value, lookup)),
        }
    }

    // The completion step runs inside the shared future, so whichever waiter
    // drives it stores the result before any waiter sees it.
    fn start<F, Fut>(
        &self,
        key: String,
        id: u64,
        dependencies: Vec<String>,
        options: EntryOptions,
        compute: F,
    ) -> Computation<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let outcome = AssertUnwindSafe(async move { compute().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow!("computation panicked")));
            inner.complete(&key, id, &dependencies, options, outcome)
        }
        .boxed()
        .shared()
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any existing entry and its
    /// dependency edges in one step.
    pub fn put(&self, key: &str, value: V, dependencies: &[&str]) -> Result<()> {
        self.put_with(key, value, dependencies, EntryOptions::default())
    }

    /// `put` with explicit entry options.
    pub fn put_with(
        &self,
        key: &str,
        value: V,
        dependencies: &[&str],
        options: EntryOptions,
    ) -> Result<()> {
        validate_key(key)?;
        let dependencies = validate_dependencies(dependencies)?;

        let mut state = self.inner.state.lock();
        state.insert(key, value, &dependencies, options, &self.inner.config)?;
        // An explicit write wins over a computation started before it
        if let Some(flight) = state.in_flight.get_mut(key) {
            flight.stale = true;
        }
        state.drop_orphaned_flights();
        Ok(())
    }

    // == Remove ==
    /// Removes `key` and every entry that transitively depends on it.
    ///
    /// Returns the number of stored entries evicted. Unknown keys are a no-op.
    pub fn remove(&self, key: &str) -> Result<usize> {
        let mut state = self.inner.state.lock();
        let evicted = state.evict(key, true, RemovalReason::Invalidated)?;
        if evicted > 0 {
            debug!("Removed key {} ({} entries evicted)", key, evicted);
        }
        Ok(evicted)
    }

    // == Invalidate Dependents ==
    /// Removes every entry that transitively depends on `key`, keeping `key`.
    pub fn invalidate_dependents(&self, key: &str) -> Result<usize> {
        let mut state = self.inner.state.lock();
        let evicted = state.evict(key, false, RemovalReason::Invalidated)?;
        if evicted > 0 {
            debug!("Invalidated {} dependents of key {}", evicted, key);
        }
        Ok(evicted)
    }

    // == Clear ==
    /// Empties the store and the dependency graph.
    ///
    /// Running computations finish for their waiters but are not stored.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.store.clear()?;
        state.graph.clear();
        for flight in state.in_flight.values_mut() {
            flight.stale = true;
        }
        state.drop_orphaned_flights();
        info!("Cache cleared");
        Ok(())
    }

    // == Sweep Expired ==
    /// Removes every expired entry and its dependents.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let mut state = self.inner.state.lock();
        state.sweep(Utc::now())
    }

    /// Starts the background sweeper at the configured interval.
    ///
    /// Abort the returned handle on shutdown.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweep_task(self.clone(), self.inner.config.sweep_interval())
    }

    /// Opens a request scope whose writes are removed when it ends.
    pub fn begin_request(&self) -> RequestCache<V> {
        RequestCache::new(self.clone())
    }

    // == Introspection ==
    /// Whether an entry is stored for `key`, expired or not.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.inner.state.lock().store.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> Result<usize> {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of stored keys.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.inner.state.lock().store.keys()
    }

    /// Direct dependents of `key`.
    pub fn dependents(&self, key: &str) -> HashSet<String> {
        self.inner.state.lock().graph.dependents(key)
    }

    /// Every key that would be evicted alongside `key`.
    pub fn transitive_dependents(&self, key: &str) -> HashSet<String> {
        self.inner.state.lock().graph.transitive_dependents(key)
    }

    /// Direct dependencies of `key`.
    pub fn dependencies(&self, key: &str) -> HashSet<String> {
        self.inner.state.lock().graph.dependencies(key)
    }

    /// Number of computations currently running or parked awaiting a caller.
    pub fn pending_computations(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        if let Ok(len) = state.store.len() {
            stats.set_total_entries(len);
        }
        stats
    }

    #[cfg(test)]
    pub(crate) fn graph_is_consistent(&self) -> bool {
        self.inner.state.lock().graph.is_consistent()
    }

    #[cfg(test)]
    pub(crate) fn stored_dependencies(&self, key: &str) -> Option<HashSet<String>> {
        let mut state = self.inner.state.lock();
        state
            .store
            .get(key)
            .ok()
            .flatten()
            .map(|entry| entry.dependencies)
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn complete(
        &self,
        key: &str,
        id: u64,
        dependencies: &[String],
        options: EntryOptions,
        outcome: anyhow::Result<V>,
    ) -> Result<(V, bool)> {
        let mut state = self.state.lock();

        let stale = match state.in_flight.get(key) {
            Some(flight) if flight.id == id => {
                let stale = flight.stale;
                state.in_flight.remove(key);
                stale
            }
            // Replaced by a newer computation
            _ => true,
        };

        match outcome {
            Ok(value) => {
                state.stats.record_computation(true);
                if stale {
                    debug!("Discarding stale result of computation {} for key {}", id, key);
                    return Ok((value, false));
                }
                state.insert(key, value.clone(), dependencies, options, &self.config)?;
                Ok((value, true))
            }
            Err(err) => {
                state.stats.record_computation(false);
                warn!("Computation for key {} failed: {:#}", key, err);
                Err(CacheError::ComputationFailed {
                    key: key.to_string(),
                    message: format!("{:#}", err),
                })
            }
        }
    }
}

impl<V> State<V>
where
    V: Clone + Send + Sync + 'static,
{
    // Reads a live entry. Expired entries count as misses; when
    // `evict_expired` is set they are also removed along with their dependents.
    fn live_value(&mut self, key: &str, now: DateTime<Utc>, evict_expired: bool) -> Result<Option<V>> {
        let Some(mut entry) = self.store.get(key)? else {
            self.stats.record_miss();
            return Ok(None);
        };

        if entry.is_expired_at(now) {
            self.stats.record_miss();
            if evict_expired {
                self.evict(key, true, RemovalReason::Expired)?;
            }
            return Ok(None);
        }

        self.stats.record_hit();
        if entry.touch(now) {
            let value = entry.value.clone();
            self.store.set(key.to_string(), entry)?;
            Ok(Some(value))
        } else {
            Ok(Some(entry.value))
        }
    }

    fn insert(
        &mut self,
        key: &str,
        value: V,
        dependencies: &[String],
        options: EntryOptions,
        config: &CacheConfig,
    ) -> Result<()> {
        self.graph.check_edges(key, dependencies)?;

        if !self.store.contains_key(key)? {
            self.make_room(key, dependencies, config.max_entries)?;
        }

        let expiration = options
            .expiration
            .or_else(|| config.default_expiration().map(Expiration::After));
        let entry = CacheEntry::new(
            key.to_string(),
            value,
            dependencies.iter().cloned().collect(),
            expiration,
        );

        // Store first: a backend failure must leave the graph untouched
        self.store.set(key.to_string(), entry)?;
        self.graph.replace_edges(key, dependencies)
    }

    // Evicts least recently used entries until one more fits. Entries the
    // incoming key depends on are skipped, since evicting them would cascade
    // into the incoming key.
    fn make_room(&mut self, key: &str, dependencies: &[String], max_entries: Option<usize>) -> Result<()> {
        let Some(max) = max_entries else {
            return Ok(());
        };
        if self.store.len()? < max {
            return Ok(());
        }

        let swept = self.sweep(Utc::now())?;
        if swept > 0 && self.store.len()? < max {
            return Ok(());
        }

        let mut protected = HashSet::new();
        for dependency in dependencies {
            protected.insert(dependency.clone());
            protected.extend(self.graph.transitive_dependencies(dependency));
        }

        while self.store.len()? >= max {
            let victim = self
                .store
                .eviction_order()?
                .into_iter()
                .find(|candidate| !protected.contains(candidate));

            match victim {
                Some(victim) => {
                    debug!("Capacity reached, evicting least recently used key {}", victim);
                    self.evict(&victim, true, RemovalReason::Capacity)?;
                }
                None => {
                    warn!("Cache full: no evictable entry to make room for key {}", key);
                    return Err(CacheError::CacheFull(format!(
                        "No evictable entry to make room for key {} (max_entries = {})",
                        key, max
                    )));
                }
            }
        }
        Ok(())
    }

    // Removes the transitive dependents of `root` (and `root` itself when
    // `include_root` is set) from store and graph. Returns how many stored
    // entries went away.
    fn evict(&mut self, root: &str, include_root: bool, reason: RemovalReason) -> Result<usize> {
        let dependents = self.graph.transitive_dependents(root);
        self.mark_stale(root, include_root, &dependents);

        let mut cascaded = 0;
        for key in &dependents {
            if self.store.delete(key)? {
                cascaded += 1;
            }
            self.graph.remove_node(key);
        }

        let mut evicted_root = 0;
        if include_root {
            if self.store.delete(root)? {
                evicted_root = 1;
            }
            self.graph.remove_node(root);
        }

        self.stats.record_removal(reason, evicted_root);
        self.stats.record_removal(RemovalReason::Invalidated, cascaded);
        Ok(evicted_root + cascaded)
    }

    fn mark_stale(&mut self, root: &str, include_root: bool, dependents: &HashSet<String>) {
        for (key, flight) in self.in_flight.iter_mut() {
            let key_doomed = dependents.contains(key) || (include_root && key == root);
            let dependency_doomed = flight
                .dependencies
                .iter()
                .any(|dep| dep == root || dependents.contains(dep));
            if key_doomed || dependency_doomed {
                flight.stale = true;
            }
        }
        self.drop_orphaned_flights();
    }

    // A stale flight whose only handle is our own has no waiter left to
    // drive it, and nobody can join it.
    fn drop_orphaned_flights(&mut self) {
        self.in_flight.retain(|key, flight| {
            let orphaned = flight.stale && flight.computation.strong_count() == Some(1);
            if orphaned {
                debug!("Dropping abandoned computation {} for key {}", flight.id, key);
            }
            !orphaned
        });
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for key in self.store.expired_keys(now)? {
            // An earlier cascade in this sweep may already have taken it
            if self.store.contains_key(&key)? {
                removed += self.evict(&key, true, RemovalReason::Expired)?;
            }
        }
        Ok(removed)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("Key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

fn validate_dependencies(dependencies: &[&str]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut owned = Vec::with_capacity(dependencies.len());
    for dependency in dependencies {
        validate_key(dependency)?;
        if seen.insert(*dependency) {
            owned.push(dependency.to_string());
        }
    }
    Ok(owned)
}
