//! HTTP Boundary Helpers
//!
//! Adapters for the marketplace and PIM APIs speak HTTP; these helpers turn a
//! raw response into a [`BridgeError`] so that throttling reaches the core as
//! structured data instead of message text.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::time::Clock;

/// HTTP response as seen by an adapter.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Pass successful responses through, classify everything else.
    pub fn error_for_status(self, clock: &dyn Clock) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let body = String::from_utf8_lossy(&self.body).into_owned();
        Err(error_from_status(self.status, &self.headers, &body, clock))
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a `Retry-After` value.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). A date in the past yields a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Classify a non-success response.
///
/// - 429, and 503 carrying `Retry-After` → [`BridgeError::RateLimited`]
/// - other 5xx → [`BridgeError::Transient`]
/// - 404 → [`BridgeError::NotFound`]
/// - other 4xx → [`BridgeError::InvalidRequest`]
pub fn error_from_status(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
    clock: &dyn Clock,
) -> BridgeError {
    let retry_after = find_header(headers, "retry-after")
        .and_then(|value| parse_retry_after(value, clock.now()));
    let message = format!("HTTP {}: {}", status, truncate(body, 200));

    match status {
        429 => BridgeError::RateLimited {
            retry_after,
            message,
        },
        503 if retry_after.is_some() => BridgeError::RateLimited {
            retry_after,
            message,
        },
        500..=599 => BridgeError::Transient(message),
        404 => BridgeError::NotFound(message),
        400..=499 => BridgeError::InvalidRequest(message),
        _ => BridgeError::OperationFailed(message),
    }
}

fn truncate(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
