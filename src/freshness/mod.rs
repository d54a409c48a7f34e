//! Freshness Module
//!
//! Staleness arithmetic consulted before every fetch decision, and the route
//! warmth resolver built on top of it.

mod evaluator;
mod route;

pub use evaluator::{is_fresh_at, FreshnessEvaluator};
pub use route::{app_policies, PathContext, RouteTarget, RouteWarmthResolver, Warmth, WarmthPolicy};
