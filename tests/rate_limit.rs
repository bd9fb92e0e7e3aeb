#![allow(missing_docs)]

mod common;

use async_trait::async_trait;
use common::test_helpers::*;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tollgate::prelude::*;
use tollgate::Decision;
use tower::{Layer, ServiceExt};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_admit_exactly_the_quota() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = Arc::new(FixedWindowLimiter::new(store.clone(), FixedPlans::new("25")));
    // Warm the plan record so every task goes straight to the counter.
    limiter.quota(TENANT).await.unwrap();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.limit(TENANT).await.unwrap() })
        })
        .collect();

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap().is_allowed() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 25);
}

/// Limiter with a fixed verdict, to exercise the gatekeeper's trait seam.
struct Verdict(Result<Decision, GateError>);

#[async_trait]
impl RateLimiter for Verdict {
    async fn limit(&self, _tenant: &str) -> Result<Decision, GateError> {
        self.0.clone()
    }
}

fn gatekeeper_with(limiter: Verdict) -> Gatekeeper<Verdict, InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let (recorder, _batcher) = ActivityRecorder::spawn(
        MemoryCollector::new(),
        BatchSettings { buffer_size: 8, batch_size: 8, flush_interval: Duration::from_secs(60) },
    );
    Gatekeeper::from_parts(
        IdentityPattern::new(PATTERN).unwrap(),
        limiter,
        ResponseCache::new(store, Duration::from_secs(5)),
        recorder,
    )
}

#[tokio::test]
async fn custom_limiter_decisions_map_to_statuses() {
    let cases = vec![
        (Ok(Decision::Allowed { count: 1, quota: 1 }), StatusCode::OK),
        (Ok(Decision::Denied { count: 2, quota: 1 }), StatusCode::TOO_MANY_REQUESTS),
        (Err(GateError::Backend("redis down".into())), StatusCode::INTERNAL_SERVER_ERROR),
        (Err(GateError::Parse("plan \"x\"".into())), StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (verdict, expected) in cases {
        let upstream = CountingUpstream::default();
        let svc = gatekeeper_with(Verdict(verdict)).layer().layer(upstream.clone());
        let response = svc.oneshot(get(&format!("/accounts/{TENANT}"))).await.unwrap();
        assert_eq!(response.status(), expected);
        assert_eq!(upstream.calls(), usize::from(expected == StatusCode::OK));
    }
}

#[tokio::test]
async fn server_errors_use_generic_body() {
    let svc = gatekeeper_with(Verdict(Err(GateError::Backend("10.0.0.7:6379 refused".into()))))
        .layer()
        .layer(CountingUpstream::default());
    let response = svc.oneshot(get(&format!("/accounts/{TENANT}"))).await.unwrap();
    assert_eq!(body_bytes(response).await, "something went wrong");
}
