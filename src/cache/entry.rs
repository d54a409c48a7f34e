//! Cache Entry Module
//!
//! The record the cache store keeps per key. This subsystem reads entries and
//! reacts to them; only the store creates and mutates them.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::value::{PendingOp, Value};

// == Query Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Idle,
    Fetching,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Fetching => "fetching",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "idle" => Some(QueryStatus::Idle),
            "fetching" => Some(QueryStatus::Fetching),
            "success" => Some(QueryStatus::Success),
            "error" => Some(QueryStatus::Error),
            _ => None,
        }
    }
}

// == Stale Time ==
/// Staleness window. `Infinite` never goes stale; a non-positive window is
/// always stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StaleTime {
    Infinite,
    Millis(i64),
}

impl StaleTime {
    pub fn from_millis(ms: i64) -> Self {
        StaleTime::Millis(ms)
    }
}

// == Cache Entry ==
/// A single cached query.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Unix milliseconds of the last successful data write
    pub data_updated_at: u64,
    pub is_invalidated: bool,
    /// Per-entry staleness window; `None` defers to the store default
    pub stale_time: Option<StaleTime>,
    /// How long an unread entry is kept, in milliseconds
    pub gc_time_ms: u64,
    /// In-flight fetch, if any
    pub in_flight: Option<PendingOp>,
    /// Unix milliseconds of the last read or write
    pub last_accessed: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an idle entry with no data.
    pub fn new(key: CacheKey, gc_time_ms: u64) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            data_updated_at: 0,
            is_invalidated: false,
            stale_time: None,
            gc_time_ms,
            in_flight: None,
            last_accessed: current_timestamp_ms(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Milliseconds since the data was written, saturating at zero when the
    /// recorded time lies in the future.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.data_updated_at)
    }

    /// True once the entry has been unread for longer than its gcTime.
    /// In-flight entries are never collectable.
    pub fn is_collectable(&self, now: u64) -> bool {
        !self.is_fetching() && now.saturating_sub(self.last_accessed) >= self.gc_time_ms
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new(cache_key!["groups"], 1000);
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(!entry.has_data());
        assert!(!entry.is_fetching());
        assert!(!entry.is_invalidated);
    }

    #[test]
    fn test_age_saturates_on_future_timestamp() {
        let mut entry = CacheEntry::new(cache_key!["groups"], 1000);
        entry.data_updated_at = 5_000;
        assert_eq!(entry.age_ms(4_000), 0);
        assert_eq!(entry.age_ms(6_500), 1_500);
    }

    #[test]
    fn test_collectable_boundary() {
        let mut entry = CacheEntry::new(cache_key!["groups"], 1000);
        entry.last_accessed = 10_000;
        assert!(!entry.is_collectable(10_999));
        assert!(entry.is_collectable(11_000));

        entry.in_flight = Some(PendingOp::new());
        assert!(!entry.is_collectable(50_000));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            QueryStatus::Idle,
            QueryStatus::Fetching,
            QueryStatus::Success,
            QueryStatus::Error,
        ] {
            assert_eq!(QueryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QueryStatus::parse("loading"), None);
    }

    #[test]
    fn test_stale_time_serde() {
        let json = serde_json::to_string(&StaleTime::Millis(500)).unwrap();
        assert_eq!(json, r#"{"millis":500}"#);
        let inf: StaleTime = serde_json::from_str(r#""infinite""#).unwrap();
        assert_eq!(inf, StaleTime::Infinite);
    }
}
