pub mod control_api;
pub mod event_request;
pub mod fetch;
pub mod registry;
pub mod reqwest_transport;
pub mod slots;
pub mod stores;

/// Re-export commonly used types from adapters
pub use event_request::{EventInterceptor, EventRequest, ReadyState, RequestError, RequestEvent};
pub use fetch::{FetchInput, FetchInterceptor, FetchRequest, FetchResponse, RequestInit};
pub use registry::InterceptorRegistry;
pub use reqwest_transport::ReqwestTransport;
pub use slots::{FileSlot, MemorySlot};
pub use stores::{FileRuleStore, MemoryRuleStore};
