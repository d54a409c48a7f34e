//! Garbage Collection Task
//!
//! Background task that periodically removes cache entries nobody has read
//! for longer than their gcTime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{current_timestamp_ms, MemoryQueryCache};

/// Spawns the gcTime sweep.
///
/// # Arguments
/// * `cache` - Shared cache store
/// * `interval_secs` - Seconds between sweeps
///
/// # Returns
/// A JoinHandle that can be aborted during graceful shutdown.
pub fn spawn_gc_task(cache: Arc<MemoryQueryCache>, interval_secs: u64) -> JoinHandle<()> {
    spawn_gc_task_every(cache, Duration::from_secs(interval_secs.max(1)))
}

pub(crate) fn spawn_gc_task_every(cache: Arc<MemoryQueryCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting gc task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.collect_garbage(current_timestamp_ms());
            if removed > 0 {
                info!("gc: removed {} unused entries", removed);
            } else {
                debug!("gc: nothing to collect");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, QueryCache, StaleTime};
    use crate::cache_key;
    use crate::value::Value;

    #[tokio::test]
    async fn test_gc_task_removes_unused_entries() {
        // gcTime of zero: collectable on the first sweep.
        let cache = Arc::new(MemoryQueryCache::new(StaleTime::Millis(60_000), 0));
        cache.set_data(cache_key!["groups"], Value::Null, current_timestamp_ms());

        let handle = spawn_gc_task_every(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.is_empty());
        assert_eq!(cache.stats().collected, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_gc_task_keeps_recent_entries() {
        let cache = Arc::new(MemoryQueryCache::new(StaleTime::Millis(60_000), 3_600_000));
        let key: CacheKey = cache_key!["groups"];
        cache.set_data(key.clone(), Value::Null, current_timestamp_ms());

        let handle = spawn_gc_task_every(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get_entry(&key).is_some());
        handle.abort();
    }

    #[tokio::test]
    async fn test_gc_task_can_be_aborted() {
        let cache = Arc::new(MemoryQueryCache::new(StaleTime::Millis(60_000), 0));
        let handle = spawn_gc_task(cache, 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
