//! Persistence Task
//!
//! Writes the cache snapshot on a timer. The final write at shutdown is done
//! by the caller through [`Persister::persist_cache`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::persist::Persister;

/// Spawns the periodic persist loop.
///
/// # Arguments
/// * `cache` - Cache to dehydrate
/// * `persister` - Where the snapshot goes
/// * `interval_secs` - Seconds between writes
pub fn spawn_persist_task<C>(
    cache: Arc<C>,
    persister: Arc<Persister>,
    interval_secs: u64,
) -> JoinHandle<()>
where
    C: QueryCache + ?Sized + 'static,
{
    spawn_persist_task_every(cache, persister, Duration::from_secs(interval_secs.max(1)))
}

pub(crate) fn spawn_persist_task_every<C>(
    cache: Arc<C>,
    persister: Arc<Persister>,
    interval: Duration,
) -> JoinHandle<()>
where
    C: QueryCache + ?Sized + 'static,
{
    tokio::spawn(async move {
        info!("Starting persist task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            // Failures are already logged by the persister.
            if persister.persist_cache(cache.as_ref()).await {
                debug!("persist: snapshot written to '{}'", persister.key());
            }
        }
    })
}
