//! Resource Handle Registry
//!
//! Reference-counts dereferenceable handles for media payloads. A handle whose
//! count drops to zero is kept for an idle window before it is revoked, so a
//! consumer that lets go for one render and grabs it again gets the same
//! handle back.
//!
//! # Invariants
//! - A handle stays live while its count is above zero or a release is pending.
//! - A released entry is removed from the table.
//! - Acquiring a key with a different payload revokes the old handle before a
//!   new one is allocated.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::media::BinaryPayload;

// == Resource Handle ==
/// Opaque reference to a live payload, e.g. `blob:local/3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Allocator ==
/// Platform capability that turns a payload into a handle and back.
pub trait ResourceHandleAllocator: Send + Sync {
    fn allocate(&self, payload: &BinaryPayload) -> ResourceHandle;
    fn revoke(&self, handle: &ResourceHandle);
}

/// In-process allocator issuing `blob:` handles.
#[derive(Debug, Default)]
pub struct LocalHandleAllocator {
    next: AtomicU64,
    live: Mutex<HashMap<ResourceHandle, BinaryPayload>>,
}

impl LocalHandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dereferences a handle. `None` once it has been revoked.
    pub fn resolve(&self, handle: &ResourceHandle) -> Option<BinaryPayload> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ResourceHandleAllocator for LocalHandleAllocator {
    fn allocate(&self, payload: &BinaryPayload) -> ResourceHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ResourceHandle::new(format!("blob:local/{}", id));
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone(), payload.clone());
        handle
    }

    fn revoke(&self, handle: &ResourceHandle) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle);
    }
}

// == Handle Stats ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandleStats {
    /// Every acquire call
    pub acquisitions: u64,
    /// Acquires that returned an existing handle
    pub reuses: u64,
    pub releases: u64,
    /// Handles actually revoked
    pub deallocations: u64,
    pub live_handles: usize,
}

// == Registry ==
#[derive(Debug)]
struct PendingRelease {
    token: u64,
    abort: AbortHandle,
}

impl PendingRelease {
    fn cancel(self) {
        self.abort.abort();
    }
}

#[derive(Debug)]
struct HandleEntry {
    payload: BinaryPayload,
    handle: ResourceHandle,
    ref_count: usize,
    pending_release: Option<PendingRelease>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: HashMap<String, HandleEntry>,
    next_token: u64,
    stats: HandleStats,
}

/// Process-wide handle table. Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct HandleRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    allocator: Arc<dyn ResourceHandleAllocator>,
    idle_window: Duration,
}

impl HandleRegistry {
    pub fn new(allocator: Arc<dyn ResourceHandleAllocator>, idle_window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            allocator,
            idle_window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        lock_inner(&self.inner)
    }

    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    // == Acquire ==
    /// Returns a live handle for `payload` under `source_key` and takes a
    /// reference on it.
    pub fn acquire(&self, source_key: &str, payload: &BinaryPayload) -> ResourceHandle {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.stats.acquisitions += 1;

        if let Some(entry) = inner.entries.get_mut(source_key) {
            if entry.payload.ptr_eq(payload) {
                entry.ref_count += 1;
                if let Some(pending) = entry.pending_release.take() {
                    pending.cancel();
                }
                let handle = entry.handle.clone();
                inner.stats.reuses += 1;
                return handle;
            }
        }

        // Different payload for the same key: the stale handle goes first.
        if let Some(stale) = inner.entries.remove(source_key) {
            if let Some(pending) = stale.pending_release {
                pending.cancel();
            }
            self.allocator.revoke(&stale.handle);
            inner.stats.deallocations += 1;
            debug!("Replaced stale handle {} for '{}'", stale.handle, source_key);
        }

        let handle = self.allocator.allocate(payload);
        inner.entries.insert(
            source_key.to_string(),
            HandleEntry {
                payload: payload.clone(),
                handle: handle.clone(),
                ref_count: 1,
                pending_release: None,
            },
        );
        handle
    }

    // == Release ==
    /// Drops one reference. Returns the remaining count.
    ///
    /// At zero a deferred release is scheduled. Without a tokio runtime nothing
    /// could fire it, so the handle is revoked right away.
    pub fn release(&self, source_key: &str) -> usize {
        self.release_matching(source_key, None)
    }

    /// Like [`release`](Self::release), but only when `handle` is still the
    /// one stored under `source_key`. A reference taken on a handle that has
    /// since been replaced must not count against its replacement.
    pub fn release_handle(&self, source_key: &str, handle: &ResourceHandle) -> usize {
        self.release_matching(source_key, Some(handle))
    }

    fn release_matching(&self, source_key: &str, expected: Option<&ResourceHandle>) -> usize {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.entries.get_mut(source_key) else {
            debug!("Release of unknown handle key '{}'", source_key);
            return 0;
        };
        if let Some(expected) = expected {
            if &entry.handle != expected {
                debug!("Release of replaced handle {} for '{}' ignored", expected, source_key);
                return entry.ref_count;
            }
        }
        entry.ref_count = entry.ref_count.saturating_sub(1);
        inner.stats.releases += 1;
        let remaining = entry.ref_count;
        if remaining > 0 || entry.pending_release.is_some() {
            return remaining;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                inner.next_token += 1;
                let token = inner.next_token;
                let task = runtime.spawn(deferred_release(
                    self.inner.clone(),
                    self.allocator.clone(),
                    source_key.to_string(),
                    token,
                    self.idle_window,
                ));
                entry.pending_release = Some(PendingRelease {
                    token,
                    abort: task.abort_handle(),
                });
            }
            Err(_) => {
                if let Some(entry) = inner.entries.remove(source_key) {
                    self.allocator.revoke(&entry.handle);
                    inner.stats.deallocations += 1;
                }
            }
        }
        remaining
    }

    /// Takes a reference that is released when the lease is dropped.
    pub fn lease(&self, source_key: &str, payload: &BinaryPayload) -> HandleLease {
        let handle = self.acquire(source_key, payload);
        HandleLease {
            registry: self.clone(),
            source_key: source_key.to_string(),
            handle,
        }
    }

    /// Revokes every handle, pending or not. Used at shutdown.
    pub fn release_all(&self) -> usize {
        let mut inner = self.lock();
        let drained: Vec<HandleEntry> = inner.entries.drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            if let Some(pending) = entry.pending_release {
                pending.cancel();
            }
            self.allocator.revoke(&entry.handle);
        }
        inner.stats.deallocations += count as u64;
        count
    }

    // == Inspection ==
    pub fn ref_count(&self, source_key: &str) -> Option<usize> {
        self.lock().entries.get(source_key).map(|e| e.ref_count)
    }

    pub fn handle(&self, source_key: &str) -> Option<ResourceHandle> {
        self.lock().entries.get(source_key).map(|e| e.handle.clone())
    }

    pub fn is_release_pending(&self, source_key: &str) -> bool {
        self.lock()
            .entries
            .get(source_key)
            .is_some_and(|e| e.pending_release.is_some())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> HandleStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.live_handles = inner.entries.len();
        stats
    }
}

fn lock_inner(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timer body. The entry may have been re-acquired, replaced or rescheduled
/// since this was spawned, so everything is re-checked under the lock.
async fn deferred_release(
    inner: Arc<Mutex<RegistryInner>>,
    allocator: Arc<dyn ResourceHandleAllocator>,
    source_key: String,
    token: u64,
    idle_window: Duration,
) {
    tokio::time::sleep(idle_window).await;

    let mut guard = lock_inner(&inner);
    let state = &mut *guard;
    let due = state.entries.get(&source_key).is_some_and(|entry| {
        entry.ref_count == 0
            && entry
                .pending_release
                .as_ref()
                .is_some_and(|pending| pending.token == token)
    });
    if !due {
        return;
    }
    if let Some(entry) = state.entries.remove(&source_key) {
        allocator.revoke(&entry.handle);
        state.stats.deallocations += 1;
        info!("Released idle handle {} for '{}'", entry.handle, source_key);
    }
}

// == Handle Lease ==
/// One reference on a registry handle.
pub struct HandleLease {
    registry: HandleRegistry,
    source_key: String,
    handle: ResourceHandle,
}

impl HandleLease {
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }
}

impl fmt::Debug for HandleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleLease")
            .field("source_key", &self.source_key)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.registry.release_handle(&self.source_key, &self.handle);
    }
}
