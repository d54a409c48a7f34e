//! Request and Response models for the diagnostics API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

pub use requests::{FreshnessRequest, InvalidateRequest, MediaQuery, WarmthQuery};
pub use responses::{
    CacheStatsBody, FreshnessResponse, HealthResponse, InvalidateResponse, MediaResponse,
    PayloadStatsBody, StatsResponse, WarmthResponse,
};
