use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tollgate::prelude::*;
use tollgate::BatcherHandle;
use tower_service::Service;

pub const TENANT: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";
pub const OTHER_TENANT: &str = "0f9e8d7c-6b5a-4a3b-9c2d-1e0f9a8b7c6d";
pub const PATTERN: &str = r"/accounts/(?P<tenant>[0-9a-fA-F-]{36})";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Plan source answering every tenant with the same quota.
pub struct FixedPlans {
    quota: String,
    calls: AtomicUsize,
}

impl FixedPlans {
    pub fn new(quota: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { quota: quota.into(), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanSource for FixedPlans {
    async fn fetch(&self, _tenant: &str) -> Result<String, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.quota.clone())
    }
}

/// Upstream that counts calls and echoes the path and call number.
#[derive(Clone, Default)]
pub struct CountingUpstream {
    calls: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Bytes>>>,
}

impl CountingUpstream {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().unwrap().clone()
    }
}

impl Service<Request<Full<Bytes>>> for CountingUpstream {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let bodies = self.bodies.clone();
        Box::pin(async move {
            let path = req.uri().path().to_string();
            let body = req.into_body().collect().await.unwrap().to_bytes();
            bodies.lock().unwrap().push(body);
            let response = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain")
                .header("x-served-by", "upstream")
                .body(Full::new(Bytes::from(format!("{path} #{n}"))))
                .unwrap();
            Ok(response)
        })
    }
}

pub type MemoryGatekeeper = Gatekeeper<FixedWindowLimiter<InMemoryStore, FixedPlans>, InMemoryStore>;

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub plans: Arc<FixedPlans>,
    pub collector: MemoryCollector,
    pub batcher: BatcherHandle,
    pub gatekeeper: MemoryGatekeeper,
}

pub fn fixture(quota: &str) -> Fixture {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let plans = FixedPlans::new(quota);
    let collector = MemoryCollector::new();
    let (recorder, batcher) = ActivityRecorder::spawn(
        collector.clone(),
        BatchSettings { buffer_size: 256, batch_size: 256, flush_interval: Duration::from_secs(3600) },
    );
    let gatekeeper = Gatekeeper::from_parts(
        IdentityPattern::new(PATTERN).unwrap(),
        FixedWindowLimiter::new(store.clone(), plans.clone()),
        ResponseCache::new(store.clone(), Duration::from_secs(30)),
        recorder,
    );
    Fixture { store, plans, collector, batcher, gatekeeper }
}

pub fn get(path: &str) -> Request<Full<Bytes>> {
    Request::get(path).body(Full::new(Bytes::new())).unwrap()
}

pub fn post(path: &str, content_type: &str, body: &str) -> Request<Full<Bytes>> {
    Request::post(path)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

pub async fn body_bytes(response: Response<Full<Bytes>>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}
