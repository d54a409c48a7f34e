//! Route Warmth Resolver
//!
//! Maps a pending navigation target to a cache key and asks the freshness
//! evaluator whether that key is warm. Used to decide whether navigation needs a
//! loading indicator.
//!
//! Policies are checked in registration order and the first matching policy
//! wins, even when a later policy would also match.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::{CacheKey, QueryCache, StaleTime};
use crate::cache_key;
use crate::error::{Result, SyncError};
use crate::freshness::FreshnessEvaluator;

// == Path Context ==
/// A navigation target split into path and query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathContext {
    pub pathname: String,
    pub query: Vec<(String, String)>,
}

impl PathContext {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            query: Vec::new(),
        }
    }

    /// Splits `"/chat/42?tab=media"` into pathname and query pairs. A fragment
    /// is ignored.
    pub fn parse(target: &str) -> Self {
        let target = target.split('#').next().unwrap_or_default();
        let (pathname, search) = match target.split_once('?') {
            Some((path, search)) => (path, search),
            None => (target, ""),
        };
        let query = search
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Self {
            pathname: pathname.to_string(),
            query,
        }
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.pathname.split('/').filter(|s| !s.is_empty())
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments().nth(index)
    }

    /// Parses a path segment, failing with a resolution error when it is
    /// missing or malformed.
    pub fn parse_segment<T: std::str::FromStr>(&self, index: usize) -> Result<T> {
        let raw = self.segment(index).ok_or_else(|| {
            SyncError::RouteResolution(format!("{} has no segment {}", self.pathname, index))
        })?;
        raw.parse().map_err(|_| {
            SyncError::RouteResolution(format!("malformed segment '{}' in {}", raw, self.pathname))
        })
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// == Route Target ==
/// What a policy resolves a path to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub key: CacheKey,
    pub stale_time: Option<StaleTime>,
}

impl RouteTarget {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            stale_time: None,
        }
    }

    pub fn with_stale_time(mut self, stale_time: StaleTime) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

// == Warmth Policy ==
type Matcher = Box<dyn Fn(&PathContext) -> bool + Send + Sync>;
type Resolver = Box<dyn Fn(&PathContext) -> Result<RouteTarget> + Send + Sync>;

pub struct WarmthPolicy {
    name: String,
    matcher: Matcher,
    resolver: Resolver,
}

impl WarmthPolicy {
    pub fn new(
        name: impl Into<String>,
        matcher: impl Fn(&PathContext) -> bool + Send + Sync + 'static,
        resolver: impl Fn(&PathContext) -> Result<RouteTarget> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            matcher: Box::new(matcher),
            resolver: Box::new(resolver),
        }
    }

    /// Matches every pathname starting with `prefix`.
    pub fn path_prefix(
        name: impl Into<String>,
        prefix: &'static str,
        resolver: impl Fn(&PathContext) -> Result<RouteTarget> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, move |ctx| ctx.pathname.starts_with(prefix), resolver)
    }

    /// Matches one exact pathname (a trailing slash is ignored).
    pub fn exact_path(
        name: impl Into<String>,
        path: &'static str,
        resolver: impl Fn(&PathContext) -> Result<RouteTarget> + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            name,
            move |ctx| ctx.pathname.trim_end_matches('/') == path.trim_end_matches('/'),
            resolver,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for WarmthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmthPolicy").field("name", &self.name).finish()
    }
}

// == Warmth ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Warmth {
    /// No policy covers this path; use the default loading behaviour
    Unmanaged,
    /// A policy matched; `warm` is the freshness verdict for its key
    Managed { warm: bool },
}

impl Warmth {
    pub fn is_warm(&self) -> bool {
        matches!(self, Warmth::Managed { warm: true })
    }
}

// == Route Warmth Resolver ==
#[derive(Debug)]
pub struct RouteWarmthResolver {
    evaluator: FreshnessEvaluator,
    policies: Vec<WarmthPolicy>,
}

impl RouteWarmthResolver {
    pub fn new(evaluator: FreshnessEvaluator) -> Self {
        Self {
            evaluator,
            policies: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: WarmthPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_policies(mut self, policies: impl IntoIterator<Item = WarmthPolicy>) -> Self {
        self.policies.extend(policies);
        self
    }

    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(WarmthPolicy::name).collect()
    }

    /// Evaluates a navigation target. Never fails: a resolution error counts
    /// as managed but cold, and so does a policy closure that panics.
    pub fn evaluate<C: QueryCache + ?Sized>(&self, ctx: &PathContext, cache: &C) -> Warmth {
        let mut matched = None;
        for policy in &self.policies {
            match guarded(policy, || (policy.matcher)(ctx)) {
                Ok(true) => {
                    matched = Some(policy);
                    break;
                }
                Ok(false) => {}
                Err(_) => return Warmth::Managed { warm: false },
            }
        }
        let Some(policy) = matched else {
            return Warmth::Unmanaged;
        };
        match guarded(policy, || (policy.resolver)(ctx)).and_then(|resolved| resolved) {
            Ok(target) => Warmth::Managed {
                warm: self
                    .evaluator
                    .is_key_fresh(cache, &target.key, target.stale_time),
            },
            Err(e) => {
                debug!("Route policy '{}' could not resolve {}: {}", policy.name, ctx.pathname, e);
                Warmth::Managed { warm: false }
            }
        }
    }

    pub fn evaluate_target<C: QueryCache + ?Sized>(&self, target: &str, cache: &C) -> Warmth {
        self.evaluate(&PathContext::parse(target), cache)
    }
}

/// Runs one policy closure, turning a panic into a resolution error.
fn guarded<T>(policy: &WarmthPolicy, f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
        warn!("Route policy '{}' panicked", policy.name);
        SyncError::RouteResolution(format!("policy '{}' panicked", policy.name))
    })
}

// == Application Policies ==
/// Route policies of the messaging/dating client.
pub fn app_policies() -> Vec<WarmthPolicy> {
    vec![
        WarmthPolicy::path_prefix("chat", "/chat/", |ctx| {
            let group_id: u64 = ctx.parse_segment(1)?;
            Ok(RouteTarget::new(cache_key!["groups", group_id, "messages"])
                .with_stale_time(StaleTime::Millis(15_000)))
        }),
        WarmthPolicy::exact_path("groups", "/groups", |_| {
            Ok(RouteTarget::new(cache_key!["groups"]))
        }),
        WarmthPolicy::path_prefix("dating", "/dating", |ctx| {
            let key = match ctx.query_param("gender") {
                Some(gender) => cache_key!["dating-profiles", json!({ "gender": gender })],
                None => cache_key!["dating-profiles"],
            };
            Ok(RouteTarget::new(key))
        }),
        WarmthPolicy::exact_path("profile", "/profile", |_| {
            Ok(RouteTarget::new(cache_key!["user-profile", "me"])
                .with_stale_time(StaleTime::Millis(5 * 60_000)))
        }),
    ]
}
