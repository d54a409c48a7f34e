//! API Module
//!
//! Diagnostics HTTP surface. It carries no cached data; it only exposes the
//! subsystem's decisions.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Statistics
//! - `GET /warmth?target=` - Route warmth verdict
//! - `POST /freshness` - Freshness verdict for a key
//! - `POST /invalidate` - Invalidate and announce

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
