#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Tenant-aware admission middleware for tower HTTP stacks: identifies the
//! caller from the request path, enforces a per-tenant quota fetched from a
//! plan service, meters usage to a remote collector, and serves responses
//! through a cache-aside layer backed by a shared key-value store.
//!
//! ## Features
//!
//! - **Fixed-window rate limiting** with remote plan resolution cached in the store
//! - **Response caching** keyed by path, with self-healing on corrupt entries
//! - **Usage telemetry** batched by size or time, dropped under pressure
//! - **Pluggable store** via [`KvStore`] (in-memory here, Redis in `tollgate-redis`)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryStore::new());
//!     store.set("a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d", "100").await.unwrap();
//!
//!     let collector = MemoryCollector::new();
//!     let (recorder, batcher) = ActivityRecorder::spawn(
//!         collector.clone(),
//!         BatchSettings { buffer_size: 256, batch_size: 32, flush_interval: Duration::from_secs(5) },
//!     );
//!     let plans = Arc::new(HttpPlanResolver::new("key", "http://plans.invalid/plan").unwrap());
//!     let gatekeeper = Gatekeeper::from_parts(
//!         IdentityPattern::new(r"/accounts/(?P<tenant>[0-9a-f-]{36})").unwrap(),
//!         FixedWindowLimiter::new(store.clone(), plans),
//!         ResponseCache::new(store, Duration::from_secs(30)),
//!         recorder,
//!     );
//!
//!     let req = http::Request::get("/accounts/a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d/profile")
//!         .body(http_body_util::Full::new(bytes::Bytes::new()))
//!         .unwrap();
//!     let admitted = gatekeeper.admit(req).await.unwrap();
//!     assert!(admitted.uri().path().ends_with("/profile"));
//!
//!     batcher.shutdown().await;
//!     assert_eq!(collector.records().len(), 1);
//! }
//! ```

pub mod activity;
pub mod body;
pub mod cache;
pub mod config;
pub mod error;
pub mod gatekeeper;
pub mod identity;
pub mod prelude;
pub mod rate_limit;
pub mod store;

// Re-exports
pub use activity::{
    ActivityCollector, ActivityRecord, ActivityRecorder, BatchSettings, BatcherHandle,
    HttpCollector, MemoryCollector,
};
pub use cache::{CachedResponse, ResponseCache, ResponseCacheLayer, ResponseCacheService};
pub use config::{GatekeeperConfig, StoreConfig};
pub use error::{ConfigError, GateError, StoreError};
pub use gatekeeper::{Gatekeeper, GatekeeperLayer, GatekeeperService};
pub use identity::{Identity, IdentityPattern};
pub use rate_limit::{Decision, FixedWindowLimiter, HttpPlanResolver, PlanSource, RateLimiter};
pub use store::{InMemoryStore, KvStore};
