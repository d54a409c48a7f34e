//! API Handlers
//!
//! HTTP request handlers exposing the subsystem's decisions.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};

use crate::broadcast::{BroadcastSync, BroadcastWatermarks, RefreshWatcher};
use crate::cache::{MemoryQueryCache, QueryCache, StaleTime};
use crate::cache_key;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::freshness::{app_policies, FreshnessEvaluator, RouteWarmthResolver};
use crate::media::{
    FilePayloadFetcher, HandleRegistry, LocalHandleAllocator, MediaLoader, MemoryPayloadCache,
};
use crate::models::{
    FreshnessRequest, FreshnessResponse, HealthResponse, InvalidateRequest, InvalidateResponse,
    MediaQuery, MediaResponse, StatsResponse, WarmthQuery, WarmthResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<MemoryQueryCache>,
    pub evaluator: FreshnessEvaluator,
    pub resolver: Arc<RouteWarmthResolver>,
    pub watcher: Arc<RefreshWatcher<MemoryQueryCache>>,
    pub watermarks: Arc<BroadcastWatermarks>,
    pub handles: HandleRegistry,
    pub media: Arc<MediaLoader>,
}

impl AppState {
    /// Wires a cache, a channel and a media loader together. The loader's
    /// registry is the process-wide handle table.
    pub fn new(cache: Arc<MemoryQueryCache>, sync: BroadcastSync, channel: &str, media: Arc<MediaLoader>) -> Self {
        let evaluator = FreshnessEvaluator::for_cache(cache.as_ref());
        let resolver = RouteWarmthResolver::new(evaluator).with_policies(app_policies());
        let watermarks = Arc::new(BroadcastWatermarks::new());
        let watcher = RefreshWatcher::new(cache.clone(), sync, watermarks.clone(), channel)
            .watch("groups-list", cache_key!["groups"])
            .watch("dating-profiles", cache_key!["dating-profiles"])
            .watch("user-profile", cache_key!["user-profile", "me"]);
        Self {
            cache,
            evaluator,
            resolver: Arc::new(resolver),
            watcher: Arc::new(watcher),
            watermarks,
            handles: media.registry().clone(),
            media,
        }
    }

    /// Creates an AppState from configuration.
    pub fn from_config(config: &Config, sync: BroadcastSync) -> Self {
        let cache = Arc::new(MemoryQueryCache::new(
            StaleTime::from_millis(config.default_stale_time_ms),
            config.default_gc_time_ms,
        ));
        let handles = HandleRegistry::new(
            Arc::new(LocalHandleAllocator::new()),
            config.media_idle_release(),
        );
        let media = MediaLoader::new(
            Arc::new(MemoryPayloadCache::new()),
            Arc::new(FilePayloadFetcher::new(&config.media_root)),
            handles,
            config.media_max_entries,
        );
        Self::new(
            cache,
            sync.with_prefix(config.channel_prefix.clone()),
            &config.sync_channel,
            Arc::new(media),
        )
    }
}

/// Handler for GET /warmth?target=
///
/// Tells whether navigating to `target` can skip the loading indicator.
pub async fn warmth_handler(
    State(state): State<AppState>,
    Query(query): Query<WarmthQuery>,
) -> Result<Json<WarmthResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(SyncError::InvalidRequest(error_msg));
    }

    let warmth = state.resolver.evaluate_target(&query.target, state.cache.as_ref());
    Ok(Json(WarmthResponse::new(query.target, warmth)))
}

/// Handler for POST /freshness
pub async fn freshness_handler(
    State(state): State<AppState>,
    Json(req): Json<FreshnessRequest>,
) -> Result<Json<FreshnessResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(SyncError::InvalidRequest(error_msg));
    }

    let entry = state.cache.get_entry(&req.key);
    let fresh = state
        .evaluator
        .is_fresh(entry.as_ref(), req.stale_time_override());
    Ok(Json(FreshnessResponse {
        data_updated_at: entry.map(|e| e.data_updated_at),
        key: req.key,
        fresh,
    }))
}

/// Handler for POST /invalidate
///
/// Invalidates locally and announces the invalidation to peer contexts.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(SyncError::InvalidRequest(error_msg));
    }

    let invalidated = state.watcher.invalidate(&req.key, req.exact);
    Ok(Json(InvalidateResponse {
        key: req.key,
        exact: req.exact,
        invalidated,
    }))
}

/// Handler for GET /media?url=
///
/// Loads a payload through the capped payload cache and reports the handle it
/// got. The request's own lease ends with the response, so an unreferenced
/// handle sits out the idle window before it is revoked.
pub async fn media_handler(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Json<MediaResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(SyncError::InvalidRequest(error_msg));
    }
    let (payload, lease) = state.media.load_payload(&query.url).await?;
    let handle = lease.handle().to_string();
    drop(lease);

    Ok(Json(MediaResponse {
        ref_count: state.handles.ref_count(&query.url).unwrap_or(0),
        content_type: payload.content_type().to_string(),
        size: payload.len(),
        url: query.url,
        handle,
    }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let retained = state.media.cached_payloads().await;
    Json(
        StatsResponse::new(
            &state.cache.stats(),
            state.handles.stats(),
            state.watermarks.len(),
        )
        .with_payloads(retained, state.media.max_entries()),
    )
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
