//! Broadcast watermarks
//!
//! Per logical group, the newest `dataUpdatedAt` this context has announced.
//! One table is shared by every watcher of the context so that independently
//! created watchers never announce the same refresh twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cache::current_timestamp_ms;

/// How long after a peer announcement a local refresh still counts as the
/// re-validation that announcement caused.
pub const DEFAULT_ABSORB_WINDOW_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceDecision {
    /// Newer than anything announced so far; publish it
    Announce,
    /// Not newer than the watermark
    Duplicate,
    /// Refresh caused by a peer announcement; watermark advanced silently
    Absorbed,
}

#[derive(Debug, Default, Clone, Copy)]
struct GroupMark {
    last_announced: u64,
    /// Set by a peer-triggered re-validation: a local refresh stamped at or
    /// before this instant is absorbed.
    absorb_until: Option<u64>,
}

#[derive(Debug)]
pub struct BroadcastWatermarks {
    marks: Mutex<HashMap<String, GroupMark>>,
    absorb_window_ms: u64,
}

impl Default for BroadcastWatermarks {
    fn default() -> Self {
        Self {
            marks: Mutex::new(HashMap::new()),
            absorb_window_ms: DEFAULT_ABSORB_WINDOW_MS,
        }
    }
}

impl BroadcastWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_absorb_window_ms(mut self, window_ms: u64) -> Self {
        self.absorb_window_ms = window_ms;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GroupMark>> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called after a successful local refresh. The watermark only advances on
    /// a strictly greater timestamp.
    pub fn on_local_refresh(&self, group: &str, data_updated_at: u64) -> AnnounceDecision {
        let mut marks = self.lock();
        let mark = marks.entry(group.to_string()).or_default();
        if data_updated_at <= mark.last_announced {
            return AnnounceDecision::Duplicate;
        }
        mark.last_announced = data_updated_at;
        // The pending absorption is spent either way; a refresh past its
        // deadline is genuine and goes out.
        match mark.absorb_until.take() {
            Some(deadline) if data_updated_at <= deadline => AnnounceDecision::Absorbed,
            _ => AnnounceDecision::Announce,
        }
    }

    /// Records a peer announcement. A peer's timestamp counts as announced,
    /// and when it triggers a local re-validation the resulting refresh is
    /// absorbed instead of echoed back, provided it lands within the absorb
    /// window.
    pub fn on_peer_refresh(&self, group: &str, data_updated_at: u64, revalidating: bool) {
        self.on_peer_refresh_at(group, data_updated_at, revalidating, current_timestamp_ms());
    }

    pub fn on_peer_refresh_at(&self, group: &str, data_updated_at: u64, revalidating: bool, now: u64) {
        let window = self.absorb_window_ms;
        let mut marks = self.lock();
        let mark = marks.entry(group.to_string()).or_default();
        mark.last_announced = mark.last_announced.max(data_updated_at);
        if revalidating {
            mark.absorb_until = Some(now.saturating_add(window));
        }
    }

    pub fn last_announced(&self, group: &str) -> Option<u64> {
        self.lock().get(group).map(|mark| mark.last_announced)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
