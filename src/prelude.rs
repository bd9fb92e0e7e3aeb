//! Convenient re-exports for common Tollgate types.
pub use crate::{
    activity::{ActivityRecorder, BatchSettings, BatcherHandle, HttpCollector, MemoryCollector},
    body::{count_items, snapshot_body},
    cache::{ResponseCache, ResponseCacheLayer},
    config::{GatekeeperConfig, StoreConfig},
    gatekeeper::{Gatekeeper, GatekeeperLayer},
    identity::IdentityPattern,
    rate_limit::{FixedWindowLimiter, HttpPlanResolver, PlanSource, RateLimiter},
    store::{InMemoryStore, KvStore},
    ConfigError, GateError,
};
