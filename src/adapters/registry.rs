use std::sync::Arc;

use crate::{
    adapters::{event_request::EventInterceptor, fetch::FetchInterceptor},
    core::snapshot::SnapshotStore,
    ports::transport::Transport,
};

/// The set of interceptor adapters installed in one page context.
///
/// Each adapter wraps the real transport handed in at construction; nothing
/// global is patched, so independent registries (one per test, say) never
/// observe each other.
#[derive(Clone)]
pub struct InterceptorRegistry {
    store: Arc<SnapshotStore>,
    fetch: FetchInterceptor,
    events: EventInterceptor,
}

impl InterceptorRegistry {
    /// Build both adapters over one delegate.
    pub fn new(store: Arc<SnapshotStore>, delegate: Arc<dyn Transport>) -> Self {
        Self::with_delegates(store, delegate.clone(), delegate)
    }

    /// Build the adapters over separate real transports.
    pub fn with_delegates(
        store: Arc<SnapshotStore>,
        fetch_delegate: Arc<dyn Transport>,
        event_delegate: Arc<dyn Transport>,
    ) -> Self {
        Self {
            fetch: FetchInterceptor::new(store.clone(), fetch_delegate),
            events: EventInterceptor::new(store.clone(), event_delegate),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn fetch(&self) -> &FetchInterceptor {
        &self.fetch
    }

    pub fn events(&self) -> &EventInterceptor {
        &self.events
    }
}
