//! An in-process gateway: the gatekeeper in front of a toy upstream.
//!
//! Uses the in-memory store, a fixed plan table and the memory collector, so
//! it runs without Redis or any remote service.
//!
//! Run with `RUST_LOG=tollgate=debug cargo run --example in_memory_gateway`.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tollgate::prelude::*;
use tower::{ServiceBuilder, ServiceExt};
use tracing_subscriber::EnvFilter;

const TENANT: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";

/// Every tenant gets the same small plan.
struct FlatPlans(i64);

#[async_trait]
impl PlanSource for FlatPlans {
    async fn fetch(&self, _tenant: &str) -> Result<String, GateError> {
        Ok(self.0.to_string())
    }
}

async fn upstream(req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = format!("hello from {}", req.uri().path());
    Ok(Response::new(Full::new(Bytes::from(body))))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Tollgate: in-memory gateway ===\n");

    let store = Arc::new(InMemoryStore::new());
    let collector = MemoryCollector::new();
    let (recorder, batcher) = ActivityRecorder::spawn(
        collector.clone(),
        BatchSettings { buffer_size: 128, batch_size: 16, flush_interval: Duration::from_secs(1) },
    );
    let gatekeeper = Gatekeeper::from_parts(
        IdentityPattern::new(r"/accounts/(?P<tenant>[0-9a-fA-F-]{36})")?,
        FixedWindowLimiter::new(store.clone(), Arc::new(FlatPlans(3))),
        ResponseCache::new(store.clone(), Duration::from_secs(30)),
        recorder,
    );

    let svc = ServiceBuilder::new()
        .layer(gatekeeper.layer())
        .service(tower::service_fn(upstream));

    println!("1. Four requests inside one window (quota 3)");
    for i in 1..=4 {
        let req = Request::post(format!("/accounts/{TENANT}/orders"))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(br#"[{"sku":1},{"sku":2}]"#)))?;
        let response = svc.clone().oneshot(req).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        println!("   #{i}: {status} {}", String::from_utf8_lossy(&body));
    }

    println!("\n2. Next window: the cached response is replayed");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let req = Request::get(format!("/accounts/{TENANT}/orders")).body(Full::new(Bytes::new()))?;
    let response = svc.clone().oneshot(req).await?;
    assert_eq!(response.status(), StatusCode::OK);
    println!("   cached entries in store: {}", store.len());

    println!("\n3. A path without a tenant");
    let req = Request::get("/health").body(Full::new(Bytes::new()))?;
    let response = svc.clone().oneshot(req).await?;
    println!("   {}", response.status());

    batcher.shutdown().await;
    println!("\n4. Flushed activity:");
    for record in collector.records() {
        println!("   {} x{}", record.request_id, record.count);
    }
    Ok(())
}
