//! Freshness Evaluator
//!
//! Decides whether a cached entry can be used without refetching.

use crate::cache::{current_timestamp_ms, CacheEntry, CacheKey, QueryCache, QueryStatus, StaleTime};

/// The freshness predicate at a given instant.
///
/// Fresh iff the entry exists, succeeded, is not invalidated, holds data, and
/// its age is below the window. `Infinite` always passes the age check; a
/// window of zero or less never does.
pub fn is_fresh_at(entry: Option<&CacheEntry>, stale_time: StaleTime, now: u64) -> bool {
    let Some(entry) = entry else {
        return false;
    };
    if entry.status != QueryStatus::Success || entry.is_invalidated || !entry.has_data() {
        return false;
    }
    match stale_time {
        StaleTime::Infinite => true,
        StaleTime::Millis(window) if window <= 0 => false,
        StaleTime::Millis(window) => entry.age_ms(now) < window as u64,
    }
}

// == Freshness Evaluator ==
/// Freshness checks against a process-wide default window.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessEvaluator {
    default_stale_time: StaleTime,
}

impl FreshnessEvaluator {
    pub fn new(default_stale_time: StaleTime) -> Self {
        Self { default_stale_time }
    }

    /// Uses the cache store's own default window.
    pub fn for_cache<C: QueryCache + ?Sized>(cache: &C) -> Self {
        Self::new(cache.default_stale_time())
    }

    pub fn default_stale_time(&self) -> StaleTime {
        self.default_stale_time
    }

    /// Window precedence: explicit override, then the entry's own, then the default.
    pub fn effective_stale_time(
        &self,
        entry: Option<&CacheEntry>,
        stale_time_override: Option<StaleTime>,
    ) -> StaleTime {
        stale_time_override
            .or_else(|| entry.and_then(|e| e.stale_time))
            .unwrap_or(self.default_stale_time)
    }

    pub fn is_fresh(&self, entry: Option<&CacheEntry>, stale_time_override: Option<StaleTime>) -> bool {
        self.is_fresh_at_time(entry, stale_time_override, current_timestamp_ms())
    }

    pub fn is_fresh_at_time(
        &self,
        entry: Option<&CacheEntry>,
        stale_time_override: Option<StaleTime>,
        now: u64,
    ) -> bool {
        let window = self.effective_stale_time(entry, stale_time_override);
        is_fresh_at(entry, window, now)
    }

    /// Looks the key up in the store and evaluates it.
    pub fn is_key_fresh<C: QueryCache + ?Sized>(
        &self,
        cache: &C,
        key: &CacheKey,
        stale_time_override: Option<StaleTime>,
    ) -> bool {
        let entry = cache.get_entry(key);
        self.is_fresh(entry.as_ref(), stale_time_override)
    }
}
