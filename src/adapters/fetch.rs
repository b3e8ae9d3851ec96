//! Promise-style interceptor adapter.
//!
//! [`FetchInterceptor::fetch`] mirrors a `fetch(input, init)` call: the caller
//! gets a future resolving to a [`FetchResponse`]. The rule table is consulted
//! when `fetch` is *called*, not when the future is first polled, so the rule
//! selected for an exchange is fixed at call time.
use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::{
    core::{snapshot::SnapshotStore, synthesizer::SyntheticResponse, synthesize},
    ports::transport::{OutboundRequest, Transport, TransportResponse, TransportResult},
    tracing_setup::create_exchange_span,
};

/// A structured request argument.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// The first argument of a fetch call: a bare URL or a request object.
#[derive(Debug, Clone)]
pub enum FetchInput {
    Url(String),
    Request(FetchRequest),
}

impl FetchInput {
    /// The URL rules are resolved against.
    pub fn url(&self) -> &str {
        match self {
            FetchInput::Url(url) => url,
            FetchInput::Request(request) => &request.url,
        }
    }
}

impl From<&str> for FetchInput {
    fn from(url: &str) -> Self {
        FetchInput::Url(url.to_string())
    }
}

impl From<String> for FetchInput {
    fn from(url: String) -> Self {
        FetchInput::Url(url)
    }
}

impl From<FetchRequest> for FetchInput {
    fn from(request: FetchRequest) -> Self {
        FetchInput::Request(request)
    }
}

/// Optional overrides, the second argument of a fetch call.
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    pub method: Option<Method>,
    pub headers: Option<HeaderMap>,
    pub body: Option<Bytes>,
}

impl RequestInit {
    fn apply(self, input: FetchInput) -> OutboundRequest {
        let mut request = match input {
            FetchInput::Url(url) => OutboundRequest::get(url),
            FetchInput::Request(r) => OutboundRequest {
                method: r.method,
                url: r.url,
                headers: r.headers,
                body: r.body,
            },
        };
        if let Some(method) = self.method {
            request.method = method;
        }
        if let Some(headers) = self.headers {
            request.headers = headers;
        }
        if self.body.is_some() {
            request.body = self.body;
        }
        request
    }
}

/// Response handed back to a fetch caller, real or synthetic alike.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    url: String,
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: Bytes,
}

impl FetchResponse {
    fn synthetic(url: String, response: SyntheticResponse) -> Self {
        Self {
            url,
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl From<TransportResponse> for FetchResponse {
    fn from(response: TransportResponse) -> Self {
        Self {
            url: response.url,
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
        }
    }
}

/// Promise-style adapter wrapping a real transport delegate.
#[derive(Clone)]
pub struct FetchInterceptor {
    store: Arc<SnapshotStore>,
    delegate: Arc<dyn Transport>,
}

impl FetchInterceptor {
    pub fn new(store: Arc<SnapshotStore>, delegate: Arc<dyn Transport>) -> Self {
        Self { store, delegate }
    }

    /// Issue a request.
    ///
    /// On a miss the delegate receives the request untouched and its result,
    /// including any error, is returned as is. On a hit the future waits out
    /// the rule's delay and then always resolves to `Ok`.
    pub fn fetch(
        &self,
        input: impl Into<FetchInput>,
        init: Option<RequestInit>,
    ) -> impl Future<Output = TransportResult<FetchResponse>> + Send + 'static {
        let request = init.unwrap_or_default().apply(input.into());
        let span = create_exchange_span("fetch", request.method.as_str(), &request.url);
        let hit = span.in_scope(|| self.store.resolve(&request.url));
        let delegate = self.delegate.clone();

        async move {
            match hit {
                Some(hit) => {
                    let delay = hit.rule.effective_delay();
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    let response = synthesize(&hit.rule);
                    tracing::Span::current().record("http.status_code", response.status);
                    Ok(FetchResponse::synthetic(request.url, response))
                }
                None => {
                    tracing::debug!("no mock rule, passing through");
                    let result = delegate.execute(request).await;
                    if let Ok(response) = &result {
                        tracing::Span::current().record("http.status_code", response.status);
                    }
                    result.map(FetchResponse::from)
                }
            }
        }
        .instrument(span)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        config::models::{Rule, RuleSnapshot, RuleTable},
        ports::transport::TransportError,
    };

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<OutboundRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn execute(&self, request: OutboundRequest) -> TransportResult<TransportResponse> {
            self.seen.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(TransportError::Network("connection refused".to_string()));
            }
            Ok(TransportResponse {
                url: request.url,
                status: 200,
                status_text: "OK".to_string(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"real"),
            })
        }
    }

    fn store_with(entries: Vec<(&str, Rule)>) -> Arc<SnapshotStore> {
        let rules: RuleTable = entries
            .into_iter()
            .map(|(p, r)| (p.to_string(), r))
            .collect();
        Arc::new(SnapshotStore::with_snapshot(RuleSnapshot::new(rules, true)))
    }

    #[tokio::test]
    async fn test_hit_returns_synthetic_response() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_with(vec![(
            "/api/login",
            Rule::new(json!({"ok": true})).with_status(201),
        )]);
        let fetch = FetchInterceptor::new(store, transport.clone());

        let response = fetch.fetch("https://x.test/api/login?x=1", None).await.unwrap();
        assert_eq!(response.status(), 201);
        assert!(response.ok());
        assert_eq!(response.text(), r#"{"ok":true}"#);
        assert_eq!(response.headers()["x-mock-helper"], "true");
        assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({"ok": true}));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_miss_forwards_verbatim() {
        let transport = Arc::new(RecordingTransport::default());
        let store = store_with(vec![("/api/login", Rule::new("mock"))]);
        let fetch = FetchInterceptor::new(store, transport.clone());

        let mut request = FetchRequest::new(Method::POST, "/api/logout");
        request.headers.insert("x-token", "abc".parse().unwrap());
        request.body = Some(Bytes::from_static(b"payload"));

        let response = fetch.fetch(request, None).await.unwrap();
        assert_eq!(response.text(), "real");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].url, "/api/logout");
        assert_eq!(seen[0].headers["x-token"], "abc");
        assert_eq!(seen[0].body.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_init_overrides_request() {
        let transport = Arc::new(RecordingTransport::default());
        let fetch = FetchInterceptor::new(Arc::new(SnapshotStore::new()), transport.clone());

        let init = RequestInit {
            method: Some(Method::PUT),
            body: Some(Bytes::from_static(b"{}")),
            ..RequestInit::default()
        };
        fetch.fetch("/x", Some(init)).await.unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::PUT);
        assert_eq!(seen[0].body.as_deref(), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn test_miss_propagates_transport_error() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let fetch = FetchInterceptor::new(Arc::new(SnapshotStore::new()), transport);
        let err = fetch.fetch("/nothing", None).await.unwrap_err();
        assert_eq!(err, TransportError::Network("connection refused".to_string()));
    }

    #[tokio::test]
    async fn test_hit_never_rejects_even_with_odd_status() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let store = store_with(vec![("*", Rule::new("teapot").with_status(999))]);
        let fetch = FetchInterceptor::new(store, transport);
        let response = fetch.fetch("/anything", None).await.unwrap();
        assert_eq!(response.status(), 999);
        assert!(!response.ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_honoured() {
        let store = store_with(vec![("/slow", Rule::new("late").with_delay(50))]);
        let fetch = FetchInterceptor::new(store, Arc::new(RecordingTransport::default()));

        let started = tokio::time::Instant::now();
        let response = fetch.fetch("/slow", None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(response.text(), "late");
    }

    #[tokio::test]
    async fn test_rule_is_fixed_at_call_time() {
        let store = store_with(vec![("/r", Rule::new("before").with_delay(20))]);
        let fetch = FetchInterceptor::new(store.clone(), Arc::new(RecordingTransport::default()));

        let pending = fetch.fetch("/r", None);
        store.replace(RuleSnapshot::default());
        let response = pending.await.unwrap();
        assert_eq!(response.text(), "before");
    }
}
