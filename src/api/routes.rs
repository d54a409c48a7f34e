//! API Routes
//!
//! Configures the Axum router with the diagnostics endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    freshness_handler, health_handler, invalidate_handler, media_handler, stats_handler,
    warmth_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /stats` - Cache, handle and watermark statistics
/// - `GET /warmth?target=` - Route warmth verdict for a navigation target
/// - `POST /freshness` - Freshness verdict for a cache key
/// - `POST /invalidate` - Invalidate locally and announce to peers
/// - `GET /media?url=` - Load a media payload and report its handle
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/warmth", get(warmth_handler))
        .route("/freshness", post(freshness_handler))
        .route("/invalidate", post(invalidate_handler))
        .route("/media", get(media_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
