//! Per-tenant rate limiting.
//!
//! This module provides the building blocks for quota enforcement:
//! - [`PlanSource`]: where a tenant's quota comes from (remote plan service).
//! - [`RateLimiter`]: the core trait the gatekeeper asks for an admission decision.
//! - [`Decision`]: the result of a check (Allowed/Denied).
//!
//! # Architecture
//!
//! - **Plans**: `HttpPlanResolver` (in `plan` module) makes one HTTP round trip
//!   per plan-cache miss and knows nothing about caching.
//! - **Logic**: `FixedWindowLimiter` (in `strategies` module) caches plans in the
//!   [`KvStore`](crate::store::KvStore) and counts requests per one-second window.
//! - **Storage**: the shared KV store holds both the plan records and the
//!   counters, under independent keys.

use crate::GateError;

pub mod plan;
pub mod strategies;
pub use plan::{HttpPlanResolver, PlanSource};
pub use strategies::FixedWindowLimiter;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Requests counted in the current window, this one included.
        count: i64,
        /// The tenant's resolved quota.
        quota: i64,
    },
    /// The request is over quota.
    Denied { count: i64, quota: i64 },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Turn a denial into the matching [`GateError`].
    pub fn into_result(self) -> Result<Self, GateError> {
        match self {
            Decision::Allowed { .. } => Ok(self),
            Decision::Denied { count, quota } => Err(GateError::QuotaExceeded { count, quota }),
        }
    }
}

/// Core interface for admission logic.
///
/// Backend and parse failures come back as `Err`; a resolved "over quota" is
/// an `Ok(Decision::Denied)` so callers can tell the two apart.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `tenant` and decide whether it may proceed.
    async fn limit(&self, tenant: &str) -> Result<Decision, GateError>;
}
