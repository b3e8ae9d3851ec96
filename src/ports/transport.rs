use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;

/// Custom error type for real transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Error when the connection could not be made or broke mid-exchange
    #[error("Network error: {0}")]
    Network(String),

    /// Error when the request times out
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// Error when the request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A request as handed to the real transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// URL exactly as the caller supplied it (may be relative)
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// A fully buffered response from the real transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Transport defines the port for the real network primitive an interceptor
/// adapter forwards to on a miss.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the exchange.
    ///
    /// # Arguments
    /// * `request` - The request, unmodified from what the caller issued
    ///
    /// # Returns
    /// The buffered response, or the transport-level failure
    async fn execute(&self, request: OutboundRequest) -> TransportResult<TransportResponse>;
}
