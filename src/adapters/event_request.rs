//! Event-driven interceptor adapter.
//!
//! [`EventRequest`] is a two-phase request object: `open` records the method
//! and URL, `send` starts the exchange and lifecycle events follow later. It is
//! modelled as an explicit state machine over [`ReadyState`] whose exchange is
//! either a real one driven by the delegate transport or a synthetic one that
//! jumps from `Opened` straight to `Done`.
//!
//! Events for one object are dispatched through a per-object queue. A batch
//! enqueued while another batch is being dispatched (from another task, or
//! re-entrantly from a listener) runs after it, never in between. Once the
//! final fields of an exchange are committed the object stays busy until its
//! `loadend` listeners have run, so they cannot change mid-notification.
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;
use tracing::Instrument;

use crate::{
    config::models::Rule,
    core::{snapshot::SnapshotStore, synthesize},
    ports::transport::{OutboundRequest, Transport},
    tracing_setup::create_exchange_span,
};

/// Readiness of an [`EventRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

/// Lifecycle notifications an [`EventRequest`] can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    ReadyStateChange,
    LoadStart,
    Load,
    Error,
    LoadEnd,
}

impl fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestEvent::ReadyStateChange => "readystatechange",
            RequestEvent::LoadStart => "loadstart",
            RequestEvent::Load => "load",
            RequestEvent::Error => "error",
            RequestEvent::LoadEnd => "loadend",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// `open` was called before the sent exchange finished dispatching `loadend`
    #[error("An exchange is already in flight")]
    InFlight,

    #[error("No async runtime available to schedule the exchange")]
    NoRuntime,
}

/// Which kind of exchange the object is running.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exchange {
    Idle,
    Real,
    Synthetic { pattern: String },
}

struct Inner {
    state: ReadyState,
    method: Method,
    url: String,
    request_headers: HeaderMap,
    sent: bool,
    /// Final fields committed, `loadend` not yet dispatched
    completing: bool,
    exchange: Exchange,
    status: u16,
    status_text: String,
    response_headers: HeaderMap,
    body: Bytes,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ReadyState::Unsent,
            method: Method::GET,
            url: String::new(),
            request_headers: HeaderMap::new(),
            sent: false,
            completing: false,
            exchange: Exchange::Idle,
            status: 0,
            status_text: String::new(),
            response_headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn in_flight(&self) -> bool {
        self.completing || (self.sent && self.state != ReadyState::Done)
    }

    fn clear_response(&mut self) {
        self.status = 0;
        self.status_text.clear();
        self.response_headers.clear();
        self.body = Bytes::new();
    }
}

type Listener = Arc<dyn Fn(&EventRequest) + Send + Sync>;

#[derive(Default)]
struct EventQueue {
    pending: VecDeque<RequestEvent>,
    dispatching: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(RequestEvent, Listener)>>,
    queue: Mutex<EventQueue>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Factory for [`EventRequest`] objects sharing one store and delegate.
#[derive(Clone)]
pub struct EventInterceptor {
    store: Arc<SnapshotStore>,
    delegate: Arc<dyn Transport>,
}

impl EventInterceptor {
    pub fn new(store: Arc<SnapshotStore>, delegate: Arc<dyn Transport>) -> Self {
        Self { store, delegate }
    }

    pub fn create_request(&self) -> EventRequest {
        EventRequest {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
                listeners: Mutex::new(Vec::new()),
                queue: Mutex::new(EventQueue::default()),
            }),
            store: self.store.clone(),
            delegate: self.delegate.clone(),
        }
    }
}

/// A single event-driven request object. Clones share the same state.
#[derive(Clone)]
pub struct EventRequest {
    shared: Arc<Shared>,
    store: Arc<SnapshotStore>,
    delegate: Arc<dyn Transport>,
}

impl fmt::Debug for EventRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("EventRequest")
            .field("state", &inner.state)
            .field("method", &inner.method)
            .field("url", &inner.url)
            .field("exchange", &inner.exchange)
            .field("status", &inner.status)
            .finish()
    }
}

impl EventRequest {
    /// Register `listener` for `kind`. Listeners run in registration order.
    pub fn add_event_listener<F>(&self, kind: RequestEvent, listener: F)
    where
        F: Fn(&EventRequest) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).push((kind, Arc::new(listener)));
    }

    /// Initiate a request: record method and URL, reset request headers and
    /// response fields, move to `Opened`.
    pub fn open(&self, method: &str, url: &str) -> Result<(), RequestError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| RequestError::InvalidMethod(method.to_string()))?;
        {
            let mut inner = lock(&self.shared.inner);
            if inner.in_flight() {
                return Err(RequestError::InFlight);
            }
            inner.method = method;
            inner.url = url.to_string();
            inner.request_headers.clear();
            inner.sent = false;
            inner.exchange = Exchange::Idle;
            inner.clear_response();
            inner.state = ReadyState::Opened;
        }
        self.emit(&[RequestEvent::ReadyStateChange]);
        Ok(())
    }

    /// Add a request header. Repeated names are combined with `", "`.
    pub fn set_request_header(&self, name: &str, value: &str) -> Result<(), RequestError> {
        let mut inner = lock(&self.shared.inner);
        if inner.state != ReadyState::Opened || inner.sent {
            return Err(RequestError::InvalidState(
                "request headers can only be set after open and before send",
            ));
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RequestError::InvalidHeader(name.to_string()))?;
        let combined = match inner.request_headers.get(&name) {
            Some(existing) => {
                let mut bytes = existing.as_bytes().to_vec();
                bytes.extend_from_slice(b", ");
                bytes.extend_from_slice(value.as_bytes());
                bytes
            }
            None => value.as_bytes().to_vec(),
        };
        let value = HeaderValue::from_bytes(&combined)
            .map_err(|_| RequestError::InvalidHeader(name.to_string()))?;
        inner.request_headers.insert(name, value);
        Ok(())
    }

    /// Start the exchange.
    ///
    /// The rule is resolved here, against the URL captured by `open`. Either
    /// way the outcome is delivered from a spawned task, never from within
    /// this call.
    pub fn send(&self, body: Option<Bytes>) -> Result<(), RequestError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RequestError::NoRuntime)?;

        let (request, span, hit) = {
            let mut inner = lock(&self.shared.inner);
            if inner.state != ReadyState::Opened || inner.sent {
                return Err(RequestError::InvalidState("send requires an opened, unsent request"));
            }
            let span = create_exchange_span("event", inner.method.as_str(), &inner.url);
            let hit = span.in_scope(|| self.store.resolve(&inner.url));
            inner.sent = true;
            inner.exchange = match &hit {
                Some(hit) => Exchange::Synthetic {
                    pattern: hit.pattern.clone(),
                },
                None => Exchange::Real,
            };
            let request = OutboundRequest {
                method: inner.method.clone(),
                url: inner.url.clone(),
                headers: inner.request_headers.clone(),
                body,
            };
            (request, span, hit)
        };

        match hit {
            Some(hit) => {
                let this = self.clone();
                runtime.spawn(async move { this.deliver_synthetic(hit.rule).await }.instrument(span));
            }
            None => {
                self.emit(&[RequestEvent::LoadStart]);
                let this = self.clone();
                runtime.spawn(async move { this.run_real(request).await }.instrument(span));
            }
        }
        Ok(())
    }

    async fn deliver_synthetic(&self, rule: Arc<Rule>) {
        let delay = rule.effective_delay();
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        } else {
            tokio::task::yield_now().await;
        }

        let response = synthesize(&rule);
        {
            let mut inner = lock(&self.shared.inner);
            inner.status = response.status;
            inner.status_text = response.status_text;
            inner.response_headers = response.headers;
            inner.body = response.body;
            inner.state = ReadyState::Done;
            inner.completing = true;
        }
        tracing::Span::current().record("http.status_code", response.status);
        self.emit(&[
            RequestEvent::ReadyStateChange,
            RequestEvent::Load,
            RequestEvent::LoadEnd,
        ]);
    }

    async fn run_real(&self, request: OutboundRequest) {
        match self.delegate.execute(request).await {
            Ok(response) => {
                tracing::Span::current().record("http.status_code", response.status);
                self.transition(ReadyState::HeadersReceived, |inner| {
                    inner.status = response.status;
                    inner.status_text = response.status_text;
                    inner.response_headers = response.headers;
                });
                self.transition(ReadyState::Loading, |_| {});
                self.transition(ReadyState::Done, |inner| {
                    inner.body = response.body;
                    inner.completing = true;
                });
                self.emit(&[RequestEvent::Load, RequestEvent::LoadEnd]);
            }
            Err(err) => {
                tracing::debug!(error = %err, "pass-through exchange failed");
                self.transition(ReadyState::Done, |inner| {
                    inner.clear_response();
                    inner.completing = true;
                });
                self.emit(&[RequestEvent::Error, RequestEvent::LoadEnd]);
            }
        }
    }

    fn transition(&self, state: ReadyState, update: impl FnOnce(&mut Inner)) {
        {
            let mut inner = lock(&self.shared.inner);
            update(&mut inner);
            inner.state = state;
        }
        self.emit(&[RequestEvent::ReadyStateChange]);
    }

    /// Enqueue a batch and drain the queue unless someone else already is.
    fn emit(&self, events: &[RequestEvent]) {
        {
            let mut queue = lock(&self.shared.queue);
            queue.pending.extend(events.iter().copied());
            if queue.dispatching {
                return;
            }
            queue.dispatching = true;
        }

        loop {
            let event = {
                let mut queue = lock(&self.shared.queue);
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.dispatching = false;
                        return;
                    }
                }
            };
            let listeners: Vec<Listener> = lock(&self.shared.listeners)
                .iter()
                .filter(|(kind, _)| *kind == event)
                .map(|(_, listener)| listener.clone())
                .collect();
            for listener in listeners {
                listener(self);
            }
            if event == RequestEvent::LoadEnd {
                lock(&self.shared.inner).completing = false;
            }
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        lock(&self.shared.inner).state
    }

    pub fn method(&self) -> Method {
        lock(&self.shared.inner).method.clone()
    }

    pub fn url(&self) -> String {
        lock(&self.shared.inner).url.clone()
    }

    /// True when the running (or last) exchange was served by a mock rule.
    pub fn is_synthetic(&self) -> bool {
        matches!(lock(&self.shared.inner).exchange, Exchange::Synthetic { .. })
    }

    /// Pattern of the rule serving the exchange, if any.
    pub fn matched_pattern(&self) -> Option<String> {
        match &lock(&self.shared.inner).exchange {
            Exchange::Synthetic { pattern } => Some(pattern.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> u16 {
        lock(&self.shared.inner).status
    }

    pub fn status_text(&self) -> String {
        lock(&self.shared.inner).status_text.clone()
    }

    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&lock(&self.shared.inner).body).into_owned()
    }

    pub fn response(&self) -> Bytes {
        lock(&self.shared.inner).body.clone()
    }

    /// All values for `name`, joined with `", "`.
    pub fn response_header(&self, name: &str) -> Option<String> {
        let inner = lock(&self.shared.inner);
        let values: Vec<String> = inner
            .response_headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Response headers as `name: value` lines separated by CRLF.
    pub fn all_response_headers(&self) -> String {
        let inner = lock(&self.shared.inner);
        inner
            .response_headers
            .keys()
            .map(|name| {
                let values: Vec<String> = inner
                    .response_headers
                    .get_all(name)
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .collect();
                format!("{}: {}\r\n", name, values.join(", "))
            })
            .collect()
    }
}
