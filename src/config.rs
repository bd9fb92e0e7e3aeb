//! Gatekeeper configuration surface.
//!
//! The host decides where configuration comes from; this module only defines
//! the shape (serde-deserializable) and validates it up front so a bad value
//! fails at construction instead of on the first request.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for a single plan-service lookup.
pub const PLAN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for a single telemetry flush.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
/// Length of a rate-limiting window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);
/// Suffix appended to the tenant id to form the rate-counter key.
pub const RATE_KEY_SUFFIX: &str = "-rate";
/// Largest request body snapshot taken for metering.
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Connection settings for the shared KV store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store address, e.g. `redis://cache.internal:6379`.
    pub address: String,
    /// Optional password.
    #[serde(default)]
    pub auth: Option<String>,
}

/// Everything the gatekeeper needs; every field is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Identity-extraction regex run against the request path.
    pub pattern: String,
    /// Key sent as `X-Api-Key` to the plan service and the collector.
    pub api_key: String,
    /// Plan service endpoint.
    pub plan_address: String,
    /// Telemetry collector endpoint.
    pub activity_address: String,
    pub store: StoreConfig,
    /// TTL of cached responses, in seconds.
    pub cache_expiry_secs: u64,
    /// Capacity of the in-memory telemetry buffer.
    pub buffer_size: usize,
    /// Records per telemetry flush.
    pub batch_size: usize,
    /// Seconds between time-triggered flushes.
    pub flush_interval_secs: u64,
}

impl GatekeeperConfig {
    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("pattern", &self.pattern)?;
        require("api_key", &self.api_key)?;
        require("activity_address", &self.activity_address)?;
        require("plan_address", &self.plan_address)?;
        require("store.address", &self.store.address)?;
        if self.cache_expiry_secs == 0 {
            return Err(ConfigError::Missing("cache_expiry_secs"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Missing("buffer_size"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Missing("batch_size"));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Missing("flush_interval_secs"));
        }

        Regex::new(&self.pattern)
            .map_err(|e| ConfigError::Invalid { field: "pattern", reason: e.to_string() })?;
        parse_url("plan_address", &self.plan_address)?;
        parse_url("activity_address", &self.activity_address)?;
        Ok(())
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    Ok(())
}

pub(crate) fn parse_url(field: &'static str, raw: &str) -> Result<reqwest::Url, ConfigError> {
    reqwest::Url::parse(raw).map_err(|e| ConfigError::Invalid { field, reason: e.to_string() })
}
