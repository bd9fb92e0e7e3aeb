//! Cache-aside response cache.
//!
//! Keyed by request path only: method and query string are ignored, so two
//! requests that differ only in their query share an entry.
//!
//! - **Hit**: the stored [`CachedResponse`] is replayed and upstream is not called.
//! - **Corrupt entry**: the key is deleted and the request is handled as a miss.
//! - **Miss**: upstream runs once, its body is buffered in full, the envelope is
//!   stored with the configured TTL, and the buffered response is returned.
//!   A failed store write is logged; the caller still gets the response.
//!
//! Nothing reaches the caller before either a valid hit is decoded or the
//! upstream body has been read to the end.

use crate::store::KvStore;
use crate::GateError;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use std::fmt::Display;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, error, warn};

pub mod envelope;
pub use envelope::CachedResponse;

/// Cache-aside wrapper around an upstream service.
pub struct ResponseCache<K> {
    store: Arc<K>,
    ttl: Duration,
}

impl<K> Clone for ResponseCache<K> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), ttl: self.ttl }
    }
}

impl<K> std::fmt::Debug for ResponseCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl<K> ResponseCache<K>
where
    K: KvStore + 'static,
{
    pub fn new(store: Arc<K>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key for a request.
    pub fn key_for<B>(req: &Request<B>) -> String {
        req.uri().path().to_string()
    }

    /// Look up `key`; corrupt entries are deleted and reported as a miss.
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };

        match CachedResponse::decode(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry; invalidating");
                if let Err(e) = self.store.delete(key).await {
                    warn!(key, error = %e, "failed to delete corrupt cache entry");
                }
                None
            }
        }
    }

    /// Store an envelope; failures are logged and swallowed.
    pub async fn store(&self, key: &str, cached: &CachedResponse) {
        let encoded = match cached.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(key, error = %e, "failed to serialize response for caching");
                return;
            }
        };
        match self.store.set_with_ttl(key, &encoded, self.ttl).await {
            Ok(()) => debug!(key, ttl_secs = self.ttl.as_secs(), "response cached"),
            Err(e) => warn!(key, error = %e, "failed to cache response"),
        }
    }

    /// Replay a cached response for `req`, or run `upstream` and cache its output.
    pub async fn serve_or_cache<S, ReqBody, ResBody>(
        &self,
        req: Request<ReqBody>,
        upstream: S,
    ) -> Result<Response<Full<Bytes>>, S::Error>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Display,
    {
        let key = Self::key_for(&req);

        if let Some(cached) = self.lookup(&key).await {
            debug!(key = %key, "cache hit");
            return Ok(cached.to_response());
        }

        debug!(key = %key, "cache miss");
        let response = upstream.oneshot(req).await?;
        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!(key = %key, error = %e, "failed to read upstream response body");
                return Ok(GateError::Backend(e.to_string()).to_response());
            }
        };

        let cached = CachedResponse::new(parts.status, parts.headers, body);
        self.store(&key, &cached).await;
        Ok(cached.to_response())
    }
}

/// A layer that puts a [`ResponseCache`] in front of a service.
pub struct ResponseCacheLayer<K> {
    cache: ResponseCache<K>,
}

impl<K> Clone for ResponseCacheLayer<K> {
    fn clone(&self) -> Self {
        Self { cache: self.cache.clone() }
    }
}

impl<K> ResponseCacheLayer<K> {
    pub fn new(cache: ResponseCache<K>) -> Self {
        Self { cache }
    }
}

impl<S, K> Layer<S> for ResponseCacheLayer<K> {
    type Service = ResponseCacheService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        ResponseCacheService { inner: service, cache: self.cache.clone() }
    }
}

/// Middleware service produced by [`ResponseCacheLayer`].
pub struct ResponseCacheService<S, K> {
    inner: S,
    cache: ResponseCache<K>,
}

impl<S: Clone, K> Clone for ResponseCacheService<S, K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), cache: self.cache.clone() }
    }
}

impl<S, K, ReqBody, ResBody> Service<Request<ReqBody>> for ResponseCacheService<S, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: KvStore + 'static,
    ReqBody: Send + 'static,
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
        // Hand the readied service to the future and keep a fresh clone.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let cache = self.cache.clone();
        Box::pin(async move { cache.serve_or_cache(req, inner).await })
    }
}
