//! Expiration Sweep Task
//!
//! Background task that periodically removes expired cache entries and
//! everything depending on them.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;

/// Spawns a background task that periodically sweeps expired entries.
///
/// The task runs until aborted, sleeping for `interval` between runs.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache: CacheManager<String> = CacheManager::new(CacheConfig::default());
/// let sweeper = spawn_sweep_task(cache.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_sweep_task<V>(cache: CacheManager<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!("Starting expiration sweep task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            match cache.sweep_expired() {
                Ok(0) => debug!("Expiration sweep: no expired entries found"),
                Ok(removed) => info!("Expiration sweep: removed {} entries", removed),
                Err(err) => warn!("Expiration sweep failed: {}", err),
            }
        }
    })
}
