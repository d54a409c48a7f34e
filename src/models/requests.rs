//! Request DTOs for the diagnostics API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

use crate::cache::{CacheKey, StaleTime};

/// Query string of GET /warmth
#[derive(Debug, Clone, Deserialize)]
pub struct WarmthQuery {
    /// Navigation target, path plus optional query, e.g. `/chat/7?tab=media`
    pub target: String,
}

impl WarmthQuery {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if !self.target.starts_with('/') {
            return Some("Target must be an absolute path".to_string());
        }
        None
    }
}

/// Request body for POST /freshness
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessRequest {
    pub key: CacheKey,
    /// Optional staleness window overriding the entry's and the default
    #[serde(default)]
    pub stale_time_ms: Option<i64>,
}

impl FreshnessRequest {
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        None
    }

    pub fn stale_time_override(&self) -> Option<StaleTime> {
        self.stale_time_ms.map(StaleTime::from_millis)
    }
}

/// Request body for POST /invalidate
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    pub key: CacheKey,
    /// When false every key under this prefix is invalidated
    #[serde(default)]
    pub exact: bool,
}

impl InvalidateRequest {
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        None
    }
}

/// Query string of GET /media
#[derive(Debug, Clone, Deserialize)]
pub struct MediaQuery {
    /// Media URL, e.g. `/img/avatar.png`
    pub url: String,
}

impl MediaQuery {
    pub fn validate(&self) -> Option<String> {
        if !self.url.starts_with('/') {
            return Some("Media URL must be an absolute path".to_string());
        }
        None
    }
}
