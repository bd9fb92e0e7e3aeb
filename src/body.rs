//! Request body snapshot and item metering.

use crate::GateError;
use bytes::{Bytes, BytesMut};
use http::header::HeaderValue;
use http_body::Body;
use http_body_util::BodyExt;
use serde::de::IgnoredAny;
use std::fmt::Display;

/// Media type whose bodies are metered per top-level array element.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Read `body` to the end, keeping at most `limit` bytes.
///
/// Bytes past `limit` are discarded and the stream is not read further.
/// Trailers are ignored. A read error is a backend failure.
pub async fn snapshot_body<B>(body: B, limit: usize) -> Result<Bytes, GateError>
where
    B: Body,
    B::Data: Into<Bytes>,
    B::Error: Display,
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();

    while buf.len() < limit {
        let Some(frame) = body.frame().await else { break };
        let frame = frame.map_err(|e| GateError::Backend(format!("error reading request body: {e}")))?;
        if let Ok(data) = frame.into_data() {
            let data: Bytes = data.into();
            let room = limit - buf.len();
            if data.len() > room {
                buf.extend_from_slice(&data[..room]);
            } else {
                buf.extend_from_slice(&data);
            }
        }
    }

    Ok(buf.freeze())
}

/// Number of items a request carries.
///
/// JSON bodies holding a top-level array count one per element; everything
/// else, including a JSON object or an unreadable array, counts as one.
pub fn count_items(content_type: Option<&HeaderValue>, body: &[u8]) -> usize {
    if !is_json(content_type) {
        return 1;
    }
    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Vec<IgnoredAny>>();
    match values.next() {
        Some(Ok(items)) => items.len(),
        _ => 1,
    }
}

fn is_json(content_type: Option<&HeaderValue>) -> bool {
    let Some(value) = content_type.and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let media_type = value.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case(JSON_MEDIA_TYPE)
}
