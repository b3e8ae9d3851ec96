use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::Client;
use url::Url;

use crate::ports::transport::{
    OutboundRequest, Transport, TransportError, TransportResponse, TransportResult,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Real network transport backed by `reqwest`.
///
/// Relative request URLs (`/api/users`) are joined onto `base` when one is
/// configured, mirroring how a page resolves them against its own origin.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base: Option<Url>,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(base: Option<&str>) -> Result<Self> {
        Self::with_timeout(base, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base: Option<&str>, timeout: Duration) -> Result<Self> {
        let base = base
            .map(|b| Url::parse(b).wrap_err_with(|| format!("Invalid upstream base URL: {b}")))
            .transpose()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    fn absolute_url(&self, raw: &str) -> TransportResult<Url> {
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base {
                Some(base) => base
                    .join(raw)
                    .map_err(|e| TransportError::InvalidRequest(format!("{raw}: {e}"))),
                None => Err(TransportError::InvalidRequest(format!(
                    "relative URL {raw} with no upstream base configured"
                ))),
            },
            Err(e) => Err(TransportError::InvalidRequest(format!("{raw}: {e}"))),
        }
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: OutboundRequest) -> TransportResult<TransportResponse> {
        let url = self.absolute_url(&request.url)?;
        tracing::debug!(method = %request.method, %url, "forwarding to network");

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let url = response.url().to_string();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(TransportResponse {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
