//! Configuration Module
//!
//! Handles loading the subsystem's tunables from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Subsystem configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// The idle-release window and the payload cap are tuning knobs, not constants.
#[derive(Debug, Clone)]
pub struct Config {
    /// Diagnostics HTTP server port
    pub server_port: u16,
    /// Process-wide staleness window in milliseconds
    pub default_stale_time_ms: i64,
    /// gcTime given to entries that do not set their own, in milliseconds
    pub default_gc_time_ms: u64,
    /// Garbage-collection sweep interval in seconds
    pub gc_interval: u64,
    /// Inter-context channel name
    pub sync_channel: String,
    /// Optional namespace prepended to channel names
    pub channel_prefix: String,
    /// Durable key holding the persisted snapshot
    pub persist_key: String,
    /// Directory backing the file durable store
    pub persist_path: PathBuf,
    /// Persistence timer in seconds
    pub persist_interval: u64,
    /// Restore-time age ceiling in milliseconds
    pub persist_max_age_ms: u64,
    /// Snapshot version string
    pub persist_buster: String,
    /// First key parts allowed into the snapshot
    pub persist_allow_prefixes: Vec<String>,
    /// Idle window before an unreferenced media handle is released, in milliseconds
    pub media_idle_release_ms: u64,
    /// Maximum number of retained binary payloads
    pub media_max_entries: usize,
    /// Directory media URLs are served from
    pub media_root: PathBuf,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` (default: 3000)
    /// - `DEFAULT_STALE_TIME_MS` (default: 60000)
    /// - `DEFAULT_GC_TIME_MS` (default: 300000)
    /// - `GC_INTERVAL_SECS` (default: 60)
    /// - `SYNC_CHANNEL` (default: "query-sync")
    /// - `SYNC_CHANNEL_PREFIX` (default: "")
    /// - `PERSIST_KEY` (default: "query-cache")
    /// - `PERSIST_PATH` (default: "data")
    /// - `PERSIST_INTERVAL_SECS` (default: 30)
    /// - `PERSIST_MAX_AGE_MS` (default: 24h)
    /// - `PERSIST_BUSTER` (default: "v1")
    /// - `PERSIST_ALLOW_PREFIXES` (default: "groups,dating-profiles,user-profile")
    /// - `MEDIA_IDLE_RELEASE_MS` (default: 30000)
    /// - `MEDIA_MAX_ENTRIES` (default: 200)
    /// - `MEDIA_ROOT` (default: "media")
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("SERVER_PORT", defaults.server_port),
            default_stale_time_ms: parse_var("DEFAULT_STALE_TIME_MS", defaults.default_stale_time_ms),
            default_gc_time_ms: parse_var("DEFAULT_GC_TIME_MS", defaults.default_gc_time_ms),
            gc_interval: parse_var("GC_INTERVAL_SECS", defaults.gc_interval),
            sync_channel: env::var("SYNC_CHANNEL").unwrap_or(defaults.sync_channel),
            channel_prefix: env::var("SYNC_CHANNEL_PREFIX").unwrap_or(defaults.channel_prefix),
            persist_key: env::var("PERSIST_KEY").unwrap_or(defaults.persist_key),
            persist_path: env::var("PERSIST_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.persist_path),
            persist_interval: parse_var("PERSIST_INTERVAL_SECS", defaults.persist_interval),
            persist_max_age_ms: parse_var("PERSIST_MAX_AGE_MS", defaults.persist_max_age_ms),
            persist_buster: env::var("PERSIST_BUSTER").unwrap_or(defaults.persist_buster),
            persist_allow_prefixes: env::var("PERSIST_ALLOW_PREFIXES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.persist_allow_prefixes),
            media_idle_release_ms: parse_var("MEDIA_IDLE_RELEASE_MS", defaults.media_idle_release_ms),
            media_max_entries: parse_var("MEDIA_MAX_ENTRIES", defaults.media_max_entries),
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
        }
    }

    /// Idle-release window as a Duration.
    pub fn media_idle_release(&self) -> Duration {
        Duration::from_millis(self.media_idle_release_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            default_stale_time_ms: 60_000,
            default_gc_time_ms: 300_000,
            gc_interval: 60,
            sync_channel: "query-sync".to_string(),
            channel_prefix: String::new(),
            persist_key: "query-cache".to_string(),
            persist_path: PathBuf::from("data"),
            persist_interval: 30,
            persist_max_age_ms: 24 * 60 * 60 * 1000,
            persist_buster: "v1".to_string(),
            persist_allow_prefixes: vec![
                "groups".to_string(),
                "dating-profiles".to_string(),
                "user-profile".to_string(),
            ],
            media_idle_release_ms: 30_000,
            media_max_entries: 200,
            media_root: PathBuf::from("media"),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
