use crate::config::{parse_url, PLAN_FETCH_TIMEOUT};
use crate::error::{ConfigError, GENERIC_FAILURE};
use crate::GateError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::warn;

/// Source of tenant quotas.
///
/// Implementations return the quota as the string that gets cached in the KV
/// store; parsing happens in the limiter so cached and fetched values go
/// through the same check.
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn fetch(&self, tenant: &str) -> Result<String, GateError>;
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    data: PlanData,
}

#[derive(Debug, Deserialize)]
struct PlanData {
    request_limit: i64,
}

/// Plan service client: `GET <address>?userId=<tenant>` with `X-Api-Key`.
///
/// Every failure collapses into the same opaque backend error; the detail is
/// logged here and nowhere else.
#[derive(Debug, Clone)]
pub struct HttpPlanResolver {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl HttpPlanResolver {
    pub fn new(api_key: impl Into<String>, plan_address: &str) -> Result<Self, ConfigError> {
        let url = parse_url("plan_address", plan_address)?;
        let client = reqwest::Client::builder()
            .timeout(PLAN_FETCH_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Invalid { field: "plan_address", reason: e.to_string() })?;
        Ok(Self { client, url, api_key: api_key.into() })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn failure() -> GateError {
    GateError::Backend(GENERIC_FAILURE.to_string())
}

#[async_trait]
impl PlanSource for HttpPlanResolver {
    async fn fetch(&self, tenant: &str) -> Result<String, GateError> {
        let mut url = self.url.clone();
        url.query_pairs_mut().clear().append_pair("userId", tenant);

        let response = self
            .client
            .get(url)
            .header("Content-Type", "application/json")
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                warn!(tenant, error = %e, "plan fetch: request failed");
                failure()
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(tenant, status = status.as_u16(), "plan fetch: unexpected status code");
            return Err(failure());
        }

        let plan: PlanResponse = response.json().await.map_err(|e| {
            warn!(tenant, error = %e, "plan fetch: could not decode plan");
            failure()
        })?;
        Ok(plan.data.request_limit.to_string())
    }
}
