//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cache_coherence::{
    api::create_router,
    broadcast::{BroadcastSync, LocalChannelHub},
    cache::{current_timestamp_ms, QueryCache},
    cache_key,
    value::Value as CacheValue,
    AppState, Config,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_state() -> AppState {
    AppState::from_config(&Config::default(), BroadcastSync::unavailable())
}

fn create_test_app() -> Router {
    create_router(create_test_state())
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let response = create_test_app().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
}

// == Warmth Endpoint Tests ==

#[tokio::test]
async fn test_warmth_unmanaged_route() {
    let response = create_test_app()
        .oneshot(get("/warmth?target=/settings"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["kind"], "unmanaged");
    assert!(json.get("warm").is_none());
}

#[tokio::test]
async fn test_warmth_cold_then_warm() {
    let state = create_test_state();
    let app = create_router(state.clone());

    let response = app.clone().oneshot(get("/warmth?target=/chat/12")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["kind"], "managed");
    assert_eq!(json["warm"], false);

    state.cache.set_data(
        cache_key!["groups", 12, "messages"],
        CacheValue::array([]),
        current_timestamp_ms(),
    );
    let response = app.oneshot(get("/warmth?target=/chat/12")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["warm"], true);
}

#[tokio::test]
async fn test_warmth_malformed_segment_is_cold() {
    let response = create_test_app()
        .oneshot(get("/warmth?target=/chat/abc"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["kind"], "managed");
    assert_eq!(json["warm"], false);
}

#[tokio::test]
async fn test_warmth_relative_target_rejected() {
    let response = create_test_app()
        .oneshot(get("/warmth?target=chat"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("absolute"));
}

// == Freshness Endpoint Tests ==

#[tokio::test]
async fn test_freshness_missing_key() {
    let response = create_test_app()
        .oneshot(post_json("/freshness", r#"{"key":["groups"]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["fresh"], false);
    assert!(json.get("dataUpdatedAt").is_none());
}

#[tokio::test]
async fn test_freshness_with_override() {
    let state = create_test_state();
    let app = create_router(state.clone());
    let updated = current_timestamp_ms().saturating_sub(30_000);
    state
        .cache
        .set_data(cache_key!["groups"], CacheValue::Null, updated);

    let response = app
        .clone()
        .oneshot(post_json("/freshness", r#"{"key":["groups"]}"#))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["fresh"], true);
    assert_eq!(json["dataUpdatedAt"], updated);

    let response = app
        .oneshot(post_json(
            "/freshness",
            r#"{"key":["groups"],"staleTimeMs":10000}"#,
        ))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["fresh"], false);
}

#[tokio::test]
async fn test_freshness_empty_key_rejected() {
    let response = create_test_app()
        .oneshot(post_json("/freshness", r#"{"key":[]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == Invalidate Endpoint Tests ==

#[tokio::test]
async fn test_invalidate_exact() {
    let state = create_test_state();
    let app = create_router(state.clone());
    let now = current_timestamp_ms();
    state.cache.set_data(cache_key!["groups"], CacheValue::Null, now);
    state.cache.set_data(cache_key!["groups", 1], CacheValue::Null, now);

    let response = app
        .oneshot(post_json("/invalidate", r#"{"key":["groups"],"exact":true}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["invalidated"], 1);
    assert!(state.cache.get_entry(&cache_key!["groups"]).unwrap().is_invalidated);
    assert!(!state.cache.get_entry(&cache_key!["groups", 1]).unwrap().is_invalidated);
}

#[tokio::test]
async fn test_invalidate_announces_to_peers() {
    let hub = LocalChannelHub::default();
    let config = Config::default();
    let host = AppState::from_config(&config, BroadcastSync::new(Arc::new(hub.context("host"))));
    let peer = AppState::from_config(&config, BroadcastSync::new(Arc::new(hub.context("peer"))));
    let _peer_watcher = peer.watcher.clone().spawn();

    let now = current_timestamp_ms();
    peer.cache.set_data(cache_key!["dating-profiles"], CacheValue::Null, now);

    let response = create_router(host)
        .oneshot(post_json("/invalidate", r#"{"key":["dating-profiles"],"exact":false}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(peer
        .cache
        .get_entry(&cache_key!["dating-profiles"])
        .unwrap()
        .is_invalidated);
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let state = create_test_state();
    let app = create_router(state.clone());
    state
        .cache
        .set_data(cache_key!["groups"], CacheValue::Null, current_timestamp_ms());
    state.cache.get_entry(&cache_key!["groups"]);
    state.cache.get_entry(&cache_key!["missing"]);

    let response = app.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["cache"]["hits"], 1);
    assert_eq!(json["cache"]["misses"], 1);
    assert_eq!(json["cache"]["total_entries"], 1);
    assert_eq!(json["handles"]["live_handles"], 0);
    assert!(json["watermarks"].is_number());
}

// == Media Endpoint Tests ==

#[tokio::test]
async fn test_media_endpoint_returns_handle() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("avatar.jpg"), [0xFFu8, 0xD8, 0xFF]).unwrap();
    let config = Config {
        media_root: dir.path().to_path_buf(),
        ..Config::default()
    };
    let state = AppState::from_config(&config, BroadcastSync::unavailable());
    let app = create_router(state.clone());

    let response = app
        .clone()
        .oneshot(get("/media?url=/avatar.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["contentType"], "image/jpeg");
    assert_eq!(json["size"], 3);
    assert!(json["handle"].as_str().unwrap().starts_with("blob:"));

    // Reloading inside the idle window yields the same handle.
    let again = body_to_json(app.oneshot(get("/media?url=/avatar.jpg")).await.unwrap().into_body()).await;
    assert_eq!(again["handle"], json["handle"]);
    assert_eq!(state.handles.stats().reuses, 1);
}

#[tokio::test]
async fn test_media_endpoint_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        media_root: dir.path().to_path_buf(),
        ..Config::default()
    };
    let app = create_router(AppState::from_config(&config, BroadcastSync::unavailable()));

    let response = app.oneshot(get("/media?url=/missing.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route() {
    let response = create_test_app().oneshot(get("/get/key")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
