//! Transport-agnostic synthetic responses.
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, header::CONTENT_TYPE};

use crate::config::models::Rule;

/// Marker header attached to every synthetic response.
pub const MOCK_MARKER_HEADER: &str = "x-mock-helper";

/// Response fabricated from a rule; adapters render it in their own shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Bytes,
    pub headers: HeaderMap,
}

impl SyntheticResponse {
    /// Body as text. Synthetic bodies always originate from strings.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Build the response for a matched rule.
///
/// Headers start from `Content-Type` and the mock marker, then the rule's own
/// headers are laid over them (case-insensitive, rule wins). Entries that are
/// not valid HTTP headers are skipped.
pub fn synthesize(rule: &Rule) -> SyntheticResponse {
    let mut headers = HeaderMap::new();

    match HeaderValue::from_str(rule.effective_content_type()) {
        Ok(value) => {
            headers.insert(CONTENT_TYPE, value);
        }
        Err(_) => {
            tracing::warn!(
                content_type = rule.effective_content_type(),
                "invalid content type, falling back to application/json"
            );
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
    }
    headers.insert(
        HeaderName::from_static(MOCK_MARKER_HEADER),
        HeaderValue::from_static("true"),
    );

    for (name, value) in &rule.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid header on mock rule"),
        }
    }

    SyntheticResponse {
        status: rule.effective_status(),
        status_text: rule.effective_status_text().to_string(),
        body: Bytes::from(rule.body_text()),
        headers,
    }
}
