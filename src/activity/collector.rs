use super::ActivityRecord;
use crate::config::{parse_url, FLUSH_TIMEOUT};
use crate::error::ConfigError;
use reqwest::{StatusCode, Url};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use thiserror::Error;
use tower_service::Service;

/// Destination for flushed activity batches.
///
/// Collectors are `tower::Service`s over a whole batch, so they compose with
/// standard tower combinators. A batch is delivered whole or not at all.
pub trait ActivityCollector:
    Service<Vec<ActivityRecord>, Response = (), Error = Self::CollectorError> + Send + 'static
{
    /// The error type for this collector.
    type CollectorError: std::error::Error + Send + 'static;
}

/// Errors from [`HttpCollector`].
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("collector request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code: {status}, body: {body}")]
    Status { status: u16, body: String },
}

/// Posts batches as a JSON array to the remote collector.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl HttpCollector {
    pub fn new(api_key: impl Into<String>, activity_address: &str) -> Result<Self, ConfigError> {
        let url = parse_url("activity_address", activity_address)?;
        let client = reqwest::Client::builder().timeout(FLUSH_TIMEOUT).build().map_err(|e| {
            ConfigError::Invalid { field: "activity_address", reason: e.to_string() }
        })?;
        Ok(Self { client, url, api_key: api_key.into() })
    }
}

impl Service<Vec<ActivityRecord>> for HttpCollector {
    type Response = ();
    type Error = CollectError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Vec<ActivityRecord>) -> Self::Future {
        let request = self
            .client
            .post(self.url.clone())
            .header("X-Api-Key", &self.api_key)
            .json(&batch);
        Box::pin(async move {
            let response = request.send().await?;
            let status = response.status();
            if status != StatusCode::OK {
                let body = response.text().await.unwrap_or_default();
                return Err(CollectError::Status { status: status.as_u16(), body });
            }
            Ok(())
        })
    }
}

impl ActivityCollector for HttpCollector {
    type CollectorError = CollectError;
}

/// A collector that keeps every batch in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryCollector {
    batches: Arc<Mutex<Vec<Vec<ActivityRecord>>>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches in delivery order.
    pub fn batches(&self) -> Vec<Vec<ActivityRecord>> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// All delivered records, flattened.
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn clear(&self) {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Service<Vec<ActivityRecord>> for MemoryCollector {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Vec<ActivityRecord>) -> Self::Future {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).push(batch);
        Box::pin(async { Ok(()) })
    }
}

impl ActivityCollector for MemoryCollector {
    type CollectorError = Infallible;
}
