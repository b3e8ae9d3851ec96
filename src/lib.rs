//! mock-helper - intercept outbound HTTP calls and answer them with canned responses.
//!
//! A developer authors a table of URL patterns mapped to synthetic responses.
//! Requests issued through the interceptor adapters are resolved against that
//! table: the first enabled rule whose pattern matches wins and its response
//! is fabricated locally, everything else passes through to the real
//! transport untouched.
//!
//! # Features
//! - Literal and `*` wildcard patterns, matched against the raw URL and its
//!   path+query form
//! - First-match-wins resolution in insertion order, with a global on/off flag
//! - Two interceptor adapters over one rule table: a future-based `fetch` and
//!   an event-driven request object with an explicit ready-state machine
//! - Per-rule response delay
//! - Versioned, lock-free rule snapshots rebuilt from a shared slot on change
//! - Authoring service with a request/response command protocol, best-effort
//!   propagation to every live page, and an HTTP control API
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use mock_helper::{
//!     InterceptorRegistry, ReqwestTransport, SnapshotStore,
//!     config::{Rule, RuleSnapshot, RuleTable},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut rules = RuleTable::new();
//! rules.insert(
//!     "/api/login".to_string(),
//!     Rule::new(serde_json::json!({"ok": true})).with_status(201),
//! );
//! let store = Arc::new(SnapshotStore::with_snapshot(RuleSnapshot::new(rules, true)));
//! let registry = InterceptorRegistry::new(store, Arc::new(ReqwestTransport::new(None)?));
//!
//! let response = registry.fetch().fetch("https://x.test/api/login?x=1", None).await?;
//! assert_eq!(response.status(), 201);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping matching, resolution and synthesis inside `core`. The `sync`
//! module wires page contexts to the authoring side.
//!
//! # Error Handling
//! Every port has its own `thiserror` enum. Loaders and the binary use
//! `eyre::Result<T>` with `WrapErr` context. A rule hit is never reported as
//! a transport failure.
pub mod config;
pub mod ports;
pub mod sync;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        EventInterceptor, EventRequest, FetchInterceptor, FetchResponse, FileRuleStore, FileSlot,
        InterceptorRegistry, MemoryRuleStore, MemorySlot, ReqwestTransport,
    },
    core::{SnapshotStore, matches, resolve, synthesize},
    ports::transport::Transport,
    sync::{AuthoringService, PageContext},
};
