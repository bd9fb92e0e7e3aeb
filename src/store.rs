//! Key-value store contract shared by the rate limiter and the response cache.
//!
//! Both subsystems talk to one remote store (Redis in production, see the
//! `tollgate-redis` crate). Atomicity of `incr` and per-key expiry are the
//! store's job; nothing in this crate takes an in-process lock around them.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Abstract storage interface for counters, cached plans, and cached responses.
///
/// Dropping a returned future cancels the call, which is how a client
/// disconnect propagates into the store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value with no expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Store a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment an integer counter, creating it at 0 first if needed.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set a key's expiry. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remove a key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T> KvStore for Arc<T>
where
    T: KvStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        (**self).incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        (**self).expire(key, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Simple in-memory store.
///
/// Expiry uses the tokio clock, so tests running with a paused runtime can
/// step through windows with `tokio::time::advance`.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.guard().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time-to-live of a key, `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.guard()
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live_entry<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|e| !e.is_live(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut guard = self.guard();
        Ok(Self::live_entry(&mut guard, key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.guard().insert(key.to_string(), Entry { value: value.to_string(), expires_at: None });
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Some(Instant::now() + ttl);
        self.guard().insert(key.to_string(), Entry { value: value.to_string(), expires_at });
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut guard = self.guard();
        match Self::live_entry(&mut guard, key, now) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    StoreError::command("INCR", "value is not an integer or out of range")
                })?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| StoreError::command("INCR", "increment would overflow"))?;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                guard.insert(key.to_string(), Entry { value: "1".into(), expires_at: None });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut guard = self.guard();
        match Self::live_entry(&mut guard, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.guard().remove(key);
        Ok(())
    }
}
