//! Serialized form of a cached response.
//!
//! Stored as JSON with base64 for the raw parts, so header values that are
//! not valid UTF-8 and binary bodies survive the round trip byte for byte.

use crate::GateError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};

/// Upper bound on header fields in a stored envelope.
pub const MAX_CACHED_HEADERS: usize = 4096;

/// A fully buffered response: status, multi-valued headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body }
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<String, GateError> {
        if self.headers.len() > MAX_CACHED_HEADERS {
            return Err(GateError::Serialization(format!(
                "{} header fields exceed the limit of {MAX_CACHED_HEADERS}",
                self.headers.len()
            )));
        }
        let wire = Wire {
            status: self.status.as_u16(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), STANDARD.encode(value.as_bytes())))
                .collect(),
            body: STANDARD.encode(&self.body),
        };
        serde_json::to_string(&wire).map_err(|e| GateError::Serialization(e.to_string()))
    }

    /// Decode a stored envelope. Any malformed part fails the whole decode.
    pub fn decode(raw: &str) -> Result<Self, GateError> {
        let wire: Wire =
            serde_json::from_str(raw).map_err(|e| GateError::Serialization(e.to_string()))?;

        let status = StatusCode::from_u16(wire.status)
            .map_err(|e| GateError::Serialization(format!("status {}: {e}", wire.status)))?;

        if wire.headers.len() > MAX_CACHED_HEADERS {
            return Err(GateError::Serialization(format!(
                "{} header fields exceed the limit of {MAX_CACHED_HEADERS}",
                wire.headers.len()
            )));
        }

        let mut headers = HeaderMap::try_with_capacity(wire.headers.len())
            .map_err(|e| GateError::Serialization(format!("headers: {e}")))?;
        for (name, value) in wire.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GateError::Serialization(format!("header name {name:?}: {e}")))?;
            let raw_value = STANDARD
                .decode(value)
                .map_err(|e| GateError::Serialization(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_bytes(&raw_value)
                .map_err(|e| GateError::Serialization(format!("header {name}: {e}")))?;
            headers
                .try_append(name, value)
                .map_err(|e| GateError::Serialization(format!("headers: {e}")))?;
        }

        let body = STANDARD
            .decode(wire.body)
            .map_err(|e| GateError::Serialization(format!("body: {e}")))?;

        Ok(Self { status, headers, body: Bytes::from(body) })
    }

    /// Build the response handed back to the caller.
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}
