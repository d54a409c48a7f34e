//! Query Cache Store Module
//!
//! The generic cache store this subsystem consumes. The [`QueryCache`] trait is
//! the whole contract the freshness, broadcast and persistence layers rely on;
//! [`MemoryQueryCache`] is the in-process implementation used by the host and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::{current_timestamp_ms, CacheEntry, CacheKey, CacheStats, QueryStatus, StaleTime};
use crate::value::{PendingOp, Value};

/// Capacity of the change-notification channel.
const EVENT_CAPACITY: usize = 256;

// == Invalidate Scope ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateScope {
    /// Only the key itself
    Exact,
    /// Every key whose leading parts equal the given key
    Prefix,
}

impl InvalidateScope {
    pub fn from_exact(exact: bool) -> Self {
        if exact {
            InvalidateScope::Exact
        } else {
            InvalidateScope::Prefix
        }
    }
}

// == Cache Event ==
/// Change notification published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// New data was written successfully
    Updated { key: CacheKey, data_updated_at: u64 },
    Invalidated { key: CacheKey },
    Removed { key: CacheKey },
}

// == Query Cache Contract ==
/// The operations this subsystem needs from a cache store.
pub trait QueryCache: Send + Sync {
    fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Marks matching entries invalidated. Returns how many were marked.
    fn invalidate(&self, key: &CacheKey, scope: InvalidateScope) -> usize;

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;

    fn default_stale_time(&self) -> StaleTime;

    /// Snapshot of every entry, for dehydration.
    fn entries(&self) -> Vec<CacheEntry>;

    /// Inserts restored entries. Returns how many were accepted.
    fn hydrate(&self, entries: Vec<CacheEntry>) -> usize;
}

// == Memory Query Cache ==
#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<CacheKey, CacheEntry>,
    stats: CacheStats,
}

/// In-memory cache store.
#[derive(Debug)]
pub struct MemoryQueryCache {
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<CacheEvent>,
    default_stale_time: StaleTime,
    default_gc_time_ms: u64,
}

impl MemoryQueryCache {
    // == Constructor ==
    /// Creates an empty store.
    ///
    /// # Arguments
    /// * `default_stale_time` - Staleness window for entries without their own
    /// * `default_gc_time_ms` - gcTime given to newly created entries
    pub fn new(default_stale_time: StaleTime, default_gc_time_ms: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(StoreInner::default()),
            events,
            default_stale_time,
            default_gc_time_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CacheEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for cache event");
        }
    }

    // == Set Data ==
    /// Records a successful fetch.
    ///
    /// `data_updated_at` never moves backwards for a key: it becomes
    /// `max(previous, now)`. Clears the invalidated flag and any in-flight fetch.
    pub fn set_data(&self, key: CacheKey, data: Value, now: u64) -> u64 {
        let updated_at = {
            let mut inner = self.lock();
            let gc = self.default_gc_time_ms;
            let entry = inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), gc));
            entry.data_updated_at = entry.data_updated_at.max(now);
            entry.status = QueryStatus::Success;
            entry.data = Some(data);
            entry.error = None;
            entry.is_invalidated = false;
            entry.in_flight = None;
            entry.last_accessed = now;
            let updated_at = entry.data_updated_at;
            let len = inner.entries.len();
            inner.stats.set_total_entries(len);
            updated_at
        };
        self.emit(CacheEvent::Updated {
            key,
            data_updated_at: updated_at,
        });
        updated_at
    }

    // == Set Fetching ==
    /// Marks a fetch in flight. An entry that already has data keeps its
    /// `Success` status (background refresh).
    pub fn set_fetching(&self, key: CacheKey, in_flight: PendingOp) {
        let mut inner = self.lock();
        let gc = self.default_gc_time_ms;
        let entry = inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key, gc));
        if !entry.has_data() {
            entry.status = QueryStatus::Fetching;
        }
        entry.in_flight = Some(in_flight);
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
    }

    // == Set Error ==
    /// Records a failed fetch. Existing data is kept.
    pub fn set_error(&self, key: CacheKey, message: impl Into<String>) {
        let mut inner = self.lock();
        let gc = self.default_gc_time_ms;
        let entry = inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key, gc));
        entry.status = QueryStatus::Error;
        entry.error = Some(message.into());
        entry.in_flight = None;
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
    }

    /// Overrides the staleness window of one entry.
    pub fn set_stale_time(&self, key: &CacheKey, stale_time: StaleTime) -> bool {
        match self.lock().entries.get_mut(key) {
            Some(entry) => {
                entry.stale_time = Some(stale_time);
                true
            }
            None => false,
        }
    }

    // == Remove ==
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.entries.remove(key).is_some();
            let len = inner.entries.len();
            inner.stats.set_total_entries(len);
            removed
        };
        if removed {
            self.emit(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    // == Garbage Collection ==
    /// Removes every entry unread for longer than its gcTime.
    ///
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self, now: u64) -> usize {
        let removed: Vec<CacheKey> = {
            let mut inner = self.lock();
            let keys: Vec<CacheKey> = inner
                .entries
                .values()
                .filter(|entry| entry.is_collectable(now))
                .map(|entry| entry.key.clone())
                .collect();
            for key in &keys {
                inner.entries.remove(key);
            }
            inner.stats.record_collected(keys.len());
            let len = inner.entries.len();
            inner.stats.set_total_entries(len);
            keys
        };
        let count = removed.len();
        for key in removed {
            self.emit(CacheEvent::Removed { key });
        }
        count
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.set_total_entries(inner.entries.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl QueryCache for MemoryQueryCache {
    fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let found = inner.entries.get_mut(key).map(|entry| {
            entry.last_accessed = entry.last_accessed.max(current_timestamp_ms());
            entry.clone()
        });
        match found {
            Some(_) => inner.stats.record_hit(),
            None => inner.stats.record_miss(),
        }
        found
    }

    fn invalidate(&self, key: &CacheKey, scope: InvalidateScope) -> usize {
        let marked: Vec<CacheKey> = {
            let mut inner = self.lock();
            let marked: Vec<CacheKey> = inner
                .entries
                .values_mut()
                .filter(|entry| match scope {
                    InvalidateScope::Exact => &entry.key == key,
                    InvalidateScope::Prefix => entry.key.starts_with(key),
                })
                .map(|entry| {
                    entry.is_invalidated = true;
                    entry.key.clone()
                })
                .collect();
            inner.stats.record_invalidations(marked.len());
            marked
        };
        let count = marked.len();
        for key in marked {
            self.emit(CacheEvent::Invalidated { key });
        }
        count
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn default_stale_time(&self) -> StaleTime {
        self.default_stale_time
    }

    fn entries(&self) -> Vec<CacheEntry> {
        self.lock().entries.values().cloned().collect()
    }

    fn hydrate(&self, entries: Vec<CacheEntry>) -> usize {
        let mut inner = self.lock();
        let mut accepted = 0;
        for restored in entries {
            // Never clobber data that is at least as new as the restored copy.
            let newer = inner
                .entries
                .get(&restored.key)
                .map(|existing| restored.data_updated_at > existing.data_updated_at)
                .unwrap_or(true);
            if newer {
                inner.entries.insert(restored.key.clone(), restored);
                accepted += 1;
            }
        }
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
        accepted
    }
}
