//! The request gatekeeper.
//!
//! Every request walks the same states in order, and any of them can end it:
//!
//! 1. **Identify**: the identity pattern must yield a UUID tenant (else 400).
//! 2. **Admit**: the rate limiter counts the request (429 over quota, 500 on
//!    backend or parse failure).
//! 3. **Snapshot**: the body is buffered up to [`MAX_REQUEST_BODY_SIZE`]
//!    (500 on read failure).
//! 4. **Meter**: an activity record is queued without waiting.
//! 5. **Serve**: the response cache replays a hit or runs upstream.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate::{Gatekeeper, GatekeeperConfig, InMemoryStore, StoreConfig};
//! use tower::ServiceBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatekeeperConfig {
//!     pattern: r"/accounts/(?P<tenant>[0-9a-f-]{36})".into(),
//!     api_key: "secret".into(),
//!     plan_address: "http://plans.internal/v1/plan".into(),
//!     activity_address: "http://collector.internal/v1/activity".into(),
//!     store: StoreConfig { address: "memory://".into(), auth: None },
//!     cache_expiry_secs: 30,
//!     buffer_size: 1024,
//!     batch_size: 100,
//!     flush_interval_secs: 5,
//! };
//! let (gatekeeper, batcher) = Gatekeeper::new(&config, Arc::new(InMemoryStore::new()))?;
//! let upstream = tower::service_fn(|_req: http::Request<http_body_util::Full<bytes::Bytes>>| async {
//!     Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::new(
//!         bytes::Bytes::from_static(b"ok"),
//!     )))
//! });
//! let svc = ServiceBuilder::new().layer(gatekeeper.layer()).service(upstream);
//! # drop(svc);
//! batcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::activity::{ActivityRecorder, BatchSettings, BatcherHandle, HttpCollector};
use crate::body::{count_items, snapshot_body};
use crate::cache::ResponseCache;
use crate::config::{GatekeeperConfig, MAX_REQUEST_BODY_SIZE};
use crate::error::ConfigError;
use crate::identity::{Identity, IdentityPattern};
use crate::rate_limit::{FixedWindowLimiter, HttpPlanResolver, RateLimiter};
use crate::store::KvStore;
use crate::GateError;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response};
use http_body::Body;
use http_body_util::Full;
use std::fmt::Display;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, error, info, warn};

/// Orchestrates identity, admission, metering and caching for each request.
pub struct Gatekeeper<L, K> {
    pattern: IdentityPattern,
    limiter: Arc<L>,
    cache: ResponseCache<K>,
    recorder: ActivityRecorder,
    body_limit: usize,
}

impl<L, K> Clone for Gatekeeper<L, K> {
    fn clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            limiter: self.limiter.clone(),
            cache: self.cache.clone(),
            recorder: self.recorder.clone(),
            body_limit: self.body_limit,
        }
    }
}

impl<L, K> std::fmt::Debug for Gatekeeper<L, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("pattern", &self.pattern.as_str())
            .field("cache", &self.cache)
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

impl<K> Gatekeeper<FixedWindowLimiter<K, HttpPlanResolver>, K>
where
    K: KvStore + 'static,
{
    /// Validate `config`, build the HTTP collaborators and start the batcher.
    ///
    /// Must be called from within a tokio runtime. The returned
    /// [`BatcherHandle`] drains pending telemetry on shutdown; dropping it
    /// leaves the batcher running.
    pub fn new(config: &GatekeeperConfig, store: Arc<K>) -> Result<(Self, BatcherHandle), ConfigError> {
        config.validate()?;
        let pattern = IdentityPattern::new(&config.pattern)?;
        let plans = HttpPlanResolver::new(config.api_key.clone(), &config.plan_address)?;
        let collector = HttpCollector::new(config.api_key.clone(), &config.activity_address)?;

        let limiter = FixedWindowLimiter::new(store.clone(), Arc::new(plans));
        let cache = ResponseCache::new(store, config.cache_expiry());
        let (recorder, batcher) =
            ActivityRecorder::spawn(collector, BatchSettings::from_config(config));

        info!(
            pattern = %pattern.as_str(),
            cache_expiry_secs = config.cache_expiry_secs,
            buffer_size = config.buffer_size,
            batch_size = config.batch_size,
            flush_interval_secs = config.flush_interval_secs,
            "gatekeeper configured"
        );
        Ok((Self::from_parts(pattern, limiter, cache, recorder), batcher))
    }
}

impl<L, K> Gatekeeper<L, K>
where
    L: RateLimiter + 'static,
    K: KvStore + 'static,
{
    /// Assemble a gatekeeper from already-built collaborators.
    pub fn from_parts(
        pattern: IdentityPattern,
        limiter: L,
        cache: ResponseCache<K>,
        recorder: ActivityRecorder,
    ) -> Self {
        Self {
            pattern,
            limiter: Arc::new(limiter),
            cache,
            recorder,
            body_limit: MAX_REQUEST_BODY_SIZE,
        }
    }

    /// Override the body snapshot limit.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        &self.recorder
    }

    pub fn layer(&self) -> GatekeeperLayer<L, K> {
        GatekeeperLayer::new(self.clone())
    }

    /// Run Identify, Admit, Snapshot and Meter.
    ///
    /// On success the returned request carries the snapshot as its body and
    /// the activity record has been queued.
    pub async fn admit<B>(&self, req: Request<B>) -> Result<Request<Full<Bytes>>, GateError>
    where
        B: Body,
        B::Data: Into<Bytes>,
        B::Error: Display,
    {
        let identity = self.identify(&req)?;
        let tenant = identity.tenant_id();

        let decision = self.limiter.limit(&tenant).await?.into_result()?;
        debug!(tenant = %tenant, ?decision, "request admitted");

        let (mut parts, body) = req.into_parts();
        let snapshot = snapshot_body(body, self.body_limit).await?;
        if parts.headers.contains_key(CONTENT_LENGTH) {
            // A truncated snapshot must not carry the original length.
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(snapshot.len()));
        }

        let count = count_items(parts.headers.get(CONTENT_TYPE), &snapshot);
        self.recorder.record(identity.request_key, count);

        Ok(Request::from_parts(parts, Full::new(snapshot)))
    }

    fn identify<B>(&self, req: &Request<B>) -> Result<Identity, GateError> {
        self.pattern.extract(req.uri().path()).ok_or(GateError::InvalidIdentity)
    }
}

fn reject(path: &str, err: &GateError) -> Response<Full<Bytes>> {
    let status = err.status().as_u16();
    if status >= 500 {
        error!(path, status, error = %err, "request failed");
    } else if let Some((count, quota)) = err.quota_details() {
        warn!(path, status, count, quota, "request rejected: quota exceeded");
    } else {
        warn!(path, status, error = %err, "request rejected");
    }
    err.to_response()
}

/// A layer that puts a [`Gatekeeper`] in front of a service.
pub struct GatekeeperLayer<L, K> {
    gatekeeper: Gatekeeper<L, K>,
}

impl<L, K> Clone for GatekeeperLayer<L, K> {
    fn clone(&self) -> Self {
        Self { gatekeeper: self.gatekeeper.clone() }
    }
}

impl<L, K> GatekeeperLayer<L, K> {
    pub fn new(gatekeeper: Gatekeeper<L, K>) -> Self {
        Self { gatekeeper }
    }
}

impl<S, L, K> Layer<S> for GatekeeperLayer<L, K> {
    type Service = GatekeeperService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        GatekeeperService { inner: service, gatekeeper: self.gatekeeper.clone() }
    }
}

/// Middleware service produced by [`GatekeeperLayer`].
///
/// Rejections are answered here as plain-text responses; only the inner
/// service's own errors come back as `Err`.
pub struct GatekeeperService<S, L, K> {
    inner: S,
    gatekeeper: Gatekeeper<L, K>,
}

impl<S: Clone, L, K> Clone for GatekeeperService<S, L, K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), gatekeeper: self.gatekeeper.clone() }
    }
}

impl<S, L, K, ReqBody, ResBody> Service<Request<ReqBody>> for GatekeeperService<S, L, K>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    L: RateLimiter + 'static,
    K: KvStore + 'static,
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Into<Bytes> + Send,
    ReqBody::Error: Display + Send,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Display + Send,
{
    type Response = Response<Full<Bytes>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let gatekeeper = self.gatekeeper.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            match gatekeeper.admit(req).await {
                Ok(admitted) => gatekeeper.cache.serve_or_cache(admitted, inner).await,
                Err(err) => Ok(reject(&path, &err)),
            }
        })
    }
}
