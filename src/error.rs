//! Error types for the gatekeeper pipeline
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::Full;
use thiserror::Error;

/// Body text sent to callers for any server-side failure.
pub const GENERIC_FAILURE: &str = "something went wrong";

/// Unified error type for every stage of request admission.
///
/// `Display` carries the internal diagnostic and is meant for logs only; the
/// client-facing text comes from [`GateError::public_message`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    /// The request path did not yield a valid tenant identity.
    #[error("request path does not carry a valid tenant identity")]
    InvalidIdentity,
    /// The tenant used up its quota for the current window.
    #[error("quota exceeded ({count} requests, quota {quota})")]
    QuotaExceeded { count: i64, quota: i64 },
    /// The KV store or a remote service failed.
    #[error("backend failure: {0}")]
    Backend(String),
    /// Cached or remote data could not be interpreted.
    #[error("parse failure: {0}")]
    Parse(String),
    /// A cache envelope could not be encoded or decoded.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl GateError {
    /// HTTP status reported to the caller for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidIdentity => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Backend(_) | Self::Parse(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-safe message; never includes internal diagnostics.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidIdentity => "invalid identity",
            Self::QuotaExceeded { .. } => "too many requests",
            _ => GENERIC_FAILURE,
        }
    }

    /// Plain-text rejection sent to the caller.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from_static(
            self.public_message().as_bytes(),
        )));
        *response.status_mut() = self.status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }

    /// Check if this error is a user-caused identity rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidIdentity)
    }
    /// Check if this error is due to an exhausted quota
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
    /// Check if this error came from the store or a remote service
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
    /// Check if this error is due to malformed data
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
    /// Check if this error is due to envelope encoding
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// Access the count/quota pair of a quota rejection.
    pub fn quota_details(&self) -> Option<(i64, i64)> {
        match self {
            Self::QuotaExceeded { count, quota } => Some((*count, *quota)),
            _ => None,
        }
    }
}

/// Failure reported by a [`KvStore`](crate::store::KvStore) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the store.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The store rejected or failed a command.
    #[error("store command `{command}` failed: {message}")]
    Command { command: &'static str, message: String },
}

impl StoreError {
    /// Shorthand for a failed command.
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command { command, message: message.into() }
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        GateError::Backend(err.to_string())
    }
}

/// Construction-time configuration problems.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field was empty or zero.
    #[error("{0} can't be empty")]
    Missing(&'static str),
    /// A field was present but unusable.
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}
