//! Response DTOs for the diagnostics API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheKey, CacheStats};
use crate::freshness::Warmth;
use crate::media::HandleStats;

/// Response body for GET /warmth
#[derive(Debug, Clone, Serialize)]
pub struct WarmthResponse {
    pub target: String,
    /// `{"kind": "unmanaged"}` or `{"kind": "managed", "warm": bool}`
    #[serde(flatten)]
    pub warmth: Warmth,
}

impl WarmthResponse {
    pub fn new(target: impl Into<String>, warmth: Warmth) -> Self {
        Self {
            target: target.into(),
            warmth,
        }
    }
}

/// Response body for POST /freshness
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessResponse {
    pub key: CacheKey,
    pub fresh: bool,
    /// Absent when the key is not cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_updated_at: Option<u64>,
}

/// Response body for POST /invalidate
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub key: CacheKey,
    pub exact: bool,
    /// Number of local entries marked invalidated
    pub invalidated: usize,
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStatsBody,
    pub handles: HandleStats,
    /// Groups with a broadcast watermark
    pub watermarks: usize,
    pub payloads: PayloadStatsBody,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PayloadStatsBody {
    /// Payloads held by the backing cache; absent when it cannot be listed
    pub retained: Option<usize>,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsBody {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub collected: u64,
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(cache: &CacheStats, handles: HandleStats, watermarks: usize) -> Self {
        Self {
            cache: CacheStatsBody {
                hits: cache.hits,
                misses: cache.misses,
                invalidations: cache.invalidations,
                collected: cache.collected,
                total_entries: cache.total_entries,
                hit_rate: cache.hit_rate(),
            },
            handles,
            watermarks,
            payloads: PayloadStatsBody::default(),
        }
    }

    pub fn with_payloads(mut self, retained: Option<usize>, max_entries: usize) -> Self {
        self.payloads = PayloadStatsBody {
            retained,
            max_entries,
        };
        self
    }
}

/// Response body for GET /media?url=
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaResponse {
    pub url: String,
    pub handle: String,
    pub content_type: String,
    pub size: usize,
    /// References held after this request let go of its own
    pub ref_count: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key;
    use serde_json::json;

    #[test]
    fn test_warmth_response_flattens_verdict() {
        let resp = WarmthResponse::new("/chat/1", Warmth::Managed { warm: true });
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({ "target": "/chat/1", "kind": "managed", "warm": true })
        );

        let resp = WarmthResponse::new("/settings", Warmth::Unmanaged);
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({ "target": "/settings", "kind": "unmanaged" })
        );
    }

    #[test]
    fn test_freshness_response_omits_missing_timestamp() {
        let resp = FreshnessResponse {
            key: cache_key!["groups"],
            fresh: false,
            data_updated_at: None,
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({ "key": ["groups"], "fresh": false })
        );
    }

    #[test]
    fn test_stats_response_hit_rate() {
        let mut stats = CacheStats::new();
        for _ in 0..4 {
            stats.record_hit();
        }
        stats.record_miss();
        let resp = StatsResponse::new(&stats, HandleStats::default(), 0).with_payloads(Some(3), 200);
        assert!((resp.cache.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.payloads.retained, Some(3));
        assert_eq!(resp.payloads.max_entries, 200);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
