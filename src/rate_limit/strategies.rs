use crate::config::{RATE_KEY_SUFFIX, RATE_WINDOW};
use crate::rate_limit::{Decision, PlanSource, RateLimiter};
use crate::store::KvStore;
use crate::GateError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A fixed-window limiter whose quota comes from a remote plan.
///
/// The plan record lives in the store under the bare tenant id with no
/// expiry; the counter lives under `<tenant>-rate` and expires one window
/// after the first request that created it.
pub struct FixedWindowLimiter<K, P> {
    store: Arc<K>,
    plans: Arc<P>,
    window: Duration,
}

impl<K, P> Clone for FixedWindowLimiter<K, P> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), plans: self.plans.clone(), window: self.window }
    }
}

impl<K, P> FixedWindowLimiter<K, P>
where
    K: KvStore + 'static,
    P: PlanSource + 'static,
{
    /// Create a limiter with the standard one-second window.
    pub fn new(store: Arc<K>, plans: Arc<P>) -> Self {
        Self { store, plans, window: RATE_WINDOW }
    }

    /// Window length used for counter expiry.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counter key for a tenant.
    pub fn counter_key(tenant: &str) -> String {
        format!("{tenant}{RATE_KEY_SUFFIX}")
    }

    /// Resolve the tenant's quota, fetching and caching the plan on a miss.
    pub async fn quota(&self, tenant: &str) -> Result<i64, GateError> {
        let cached = self.store.get(tenant).await?.filter(|v| !v.is_empty());
        let raw = match cached {
            Some(raw) => raw,
            None => {
                let fetched = self.plans.fetch(tenant).await?;
                self.store.set(tenant, &fetched).await?;
                debug!(tenant, plan = %fetched, "plan cached");
                fetched
            }
        };
        raw.parse::<i64>().map_err(|e| {
            GateError::Parse(format!("can't parse plan {raw:?} for tenant {tenant}: {e}"))
        })
    }

    async fn count(&self, tenant: &str) -> Result<i64, GateError> {
        let key = Self::counter_key(tenant);
        let count = self.store.incr(&key).await?;
        if count == 1 {
            // First hit of a fresh window arms the expiry; later hits leave it alone.
            self.store.expire(&key, self.window).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl<K, P> RateLimiter for FixedWindowLimiter<K, P>
where
    K: KvStore + 'static,
    P: PlanSource + 'static,
{
    async fn limit(&self, tenant: &str) -> Result<Decision, GateError> {
        let quota = self.quota(tenant).await?;
        let count = self.count(tenant).await?;
        if count <= quota {
            Ok(Decision::Allowed { count, quota })
        } else {
            debug!(tenant, count, quota, "quota exceeded");
            Ok(Decision::Denied { count, quota })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TENANT: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";

    #[derive(Debug, Default)]
    struct StaticPlans {
        value: String,
        calls: AtomicUsize,
        fail: bool,
    }

    impl StaticPlans {
        fn new(value: &str) -> Self {
            Self { value: value.into(), ..Self::default() }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlanSource for StaticPlans {
        async fn fetch(&self, _tenant: &str) -> Result<String, GateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GateError::Backend("something went wrong".into()));
            }
            Ok(self.value.clone())
        }
    }

    /// Wraps the in-memory store and records every `expire` call.
    #[derive(Default)]
    struct ExpireSpy {
        inner: InMemoryStore,
        expires: Mutex<Vec<String>>,
        fail_incr: bool,
    }

    #[async_trait]
    impl KvStore for ExpireSpy {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }
        async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            self.inner.set_with_ttl(key, value, ttl).await
        }
        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            if self.fail_incr {
                return Err(StoreError::Connection("broken pipe".into()));
            }
            self.inner.incr(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.expires.lock().unwrap().push(key.to_string());
            self.inner.expire(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nth_request_allowed_iff_within_quota() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = FixedWindowLimiter::new(store, Arc::new(StaticPlans::new("3")));

        for n in 1..=3 {
            let d = limiter.limit(TENANT).await.expect("no error");
            assert_eq!(d, Decision::Allowed { count: n, quota: 3 });
        }
        let d = limiter.limit(TENANT).await.expect("no error");
        assert_eq!(d, Decision::Denied { count: 4, quota: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_expiry_without_touching_plan() {
        let store = Arc::new(InMemoryStore::new());
        let plans = Arc::new(StaticPlans::new("1"));
        let limiter = FixedWindowLimiter::new(store.clone(), plans.clone());

        assert!(limiter.limit(TENANT).await.unwrap().is_allowed());
        assert!(!limiter.limit(TENANT).await.unwrap().is_allowed());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.limit(TENANT).await.unwrap().is_allowed());

        assert_eq!(plans.calls(), 1, "plan fetched once and then served from the store");
        assert_eq!(store.get(TENANT).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.ttl(TENANT), None, "plan record has no expiry");
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_armed_once_per_window() {
        let spy = Arc::new(ExpireSpy::default());
        let limiter = FixedWindowLimiter::new(spy.clone(), Arc::new(StaticPlans::new("10")));

        for _ in 0..5 {
            limiter.limit(TENANT).await.unwrap();
        }
        assert_eq!(spy.expires.lock().unwrap().len(), 1);
        assert_eq!(spy.expires.lock().unwrap()[0], format!("{TENANT}-rate"));

        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.limit(TENANT).await.unwrap();
        assert_eq!(spy.expires.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cached_plan_skips_resolver() {
        let store = Arc::new(InMemoryStore::new());
        store.set(TENANT, "5").await.unwrap();
        let plans = Arc::new(StaticPlans::failing());
        let limiter = FixedWindowLimiter::new(store, plans.clone());

        assert_eq!(limiter.quota(TENANT).await.unwrap(), 5);
        assert_eq!(plans.calls(), 0);
    }

    #[tokio::test]
    async fn empty_cached_plan_counts_as_miss() {
        let store = Arc::new(InMemoryStore::new());
        store.set(TENANT, "").await.unwrap();
        let plans = Arc::new(StaticPlans::new("9"));
        let limiter = FixedWindowLimiter::new(store, plans.clone());

        assert_eq!(limiter.quota(TENANT).await.unwrap(), 9);
        assert_eq!(plans.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_cached_plan_is_parse_error() {
        let store = Arc::new(InMemoryStore::new());
        store.set(TENANT, " 12").await.unwrap();
        let limiter = FixedWindowLimiter::new(store, Arc::new(StaticPlans::new("1")));

        let err = limiter.limit(TENANT).await.unwrap_err();
        assert!(err.is_parse(), "got {err:?}");
    }

    #[tokio::test]
    async fn resolver_failure_is_backend_error_and_nothing_cached() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = FixedWindowLimiter::new(store.clone(), Arc::new(StaticPlans::failing()));

        let err = limiter.limit(TENANT).await.unwrap_err();
        assert!(err.is_backend());
        assert!(store.is_empty(), "no plan cached and no counter created");
    }

    #[tokio::test]
    async fn store_failure_during_increment_is_backend_error() {
        let spy = Arc::new(ExpireSpy { fail_incr: true, ..ExpireSpy::default() });
        let limiter = FixedWindowLimiter::new(spy, Arc::new(StaticPlans::new("1")));

        let err = limiter.limit(TENANT).await.unwrap_err();
        assert!(err.is_backend());
    }

    #[tokio::test]
    async fn zero_quota_denies_everything() {
        let limiter = FixedWindowLimiter::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticPlans::new("0")),
        );
        assert_eq!(limiter.limit(TENANT).await.unwrap(), Decision::Denied { count: 1, quota: 0 });
    }
}
