//! Page-execution side of rule synchronization.
//!
//! A [`PageContext`] owns the [`SnapshotStore`] its interceptors read from.
//! The store is only ever rebuilt from the shared slot: on a change
//! notification for the context's key, or on an explicit reload through the
//! [`DebugHandle`].
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    adapters::registry::InterceptorRegistry,
    config::{loader::parse_snapshot, models::RuleTable},
    core::snapshot::SnapshotStore,
    ports::{
        snapshot_slot::SnapshotSlot,
        subscriber::{DeliveryError, PageSubscriber},
        transport::Transport,
    },
    tracing_setup::configure_component_tracing,
};

/// Result of one reload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot was committed
    Applied { version: u64 },
    /// Nothing stored under the key yet; previous state kept
    Missing,
    /// The stored value could not be read or parsed; previous state kept
    Rejected,
}

/// One page-execution context and its local rule cache.
pub struct PageContext {
    id: Uuid,
    url: RwLock<String>,
    store: Arc<SnapshotStore>,
    slot: Arc<dyn SnapshotSlot>,
    key: String,
}

impl PageContext {
    pub fn new(
        url: impl Into<String>,
        slot: Arc<dyn SnapshotSlot>,
        key: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            url: RwLock::new(url.into()),
            store: Arc::new(SnapshotStore::new()),
            slot,
            key: key.into(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page_url(&self) -> String {
        self.url
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Record a navigation to `url`.
    pub fn navigate(&self, url: impl Into<String>) {
        *self
            .url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = url.into();
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Interceptors for this context, forwarding misses to `delegate`.
    pub fn interceptors(&self, delegate: Arc<dyn Transport>) -> InterceptorRegistry {
        InterceptorRegistry::new(self.store.clone(), delegate)
    }

    pub fn debug_handle(self: &Arc<Self>) -> DebugHandle {
        DebugHandle { page: self.clone() }
    }

    /// Re-read the slot and replace the local state. Never fails: anything
    /// short of a valid snapshot leaves the previous state authoritative.
    pub async fn reload(&self) -> ReloadOutcome {
        let text = match self.slot.read(&self.key).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!(key = %self.key, "no snapshot stored yet");
                return ReloadOutcome::Missing;
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to read rule snapshot, keeping previous rules");
                return ReloadOutcome::Rejected;
            }
        };

        match parse_snapshot(&text) {
            Ok(snapshot) => {
                let rules = snapshot.rules.len();
                let enabled = snapshot.enabled;
                let version = self.store.replace(snapshot);
                tracing::info!(version, rules, enabled, "mock rules loaded");
                ReloadOutcome::Applied { version }
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to parse rule snapshot, keeping previous rules");
                ReloadOutcome::Rejected
            }
        }
    }

    /// Subscribe to slot changes and reload on every change for this key.
    ///
    /// The subscription is taken before this returns, so no change announced
    /// afterwards can be missed.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.slot.subscribe();
        let page = self.clone();
        let span = configure_component_tracing("page");
        tokio::spawn(
            async move {
                loop {
                    match changes.recv().await {
                        Ok(change) if change.key == page.key => {
                            page.reload().await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "change notifications lagged, reloading");
                            page.reload().await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Start listening, then pull whatever snapshot is already published.
    pub async fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let listener = self.spawn_listener();
        self.reload().await;
        listener
    }
}

/// The debug surface exposed inside a page context.
#[derive(Clone)]
pub struct DebugHandle {
    page: Arc<PageContext>,
}

impl DebugHandle {
    /// Current rule table.
    pub fn rules(&self) -> RuleTable {
        self.page.store.load().snapshot().rules.clone()
    }

    /// Current global enabled flag.
    pub fn is_enabled(&self) -> bool {
        self.page.store.load().is_enabled()
    }

    /// Re-read the published snapshot.
    pub async fn reload(&self) -> ReloadOutcome {
        self.page.reload().await
    }
}

enum PageUrl {
    Live(Arc<PageContext>),
    Fixed(String),
}

/// Delivers snapshots to a page context through its shared slot: write the
/// value, then announce the key.
pub struct SlotSubscriber {
    id: Uuid,
    url: PageUrl,
    slot: Arc<dyn SnapshotSlot>,
    key: String,
}

impl SlotSubscriber {
    /// Subscriber for an in-process page context.
    pub fn for_page(page: &Arc<PageContext>) -> Arc<Self> {
        Arc::new(Self {
            id: page.id,
            url: PageUrl::Live(page.clone()),
            slot: page.slot.clone(),
            key: page.key.clone(),
        })
    }

    /// Subscriber for page contexts living elsewhere that share `slot`,
    /// e.g. other processes watching the same slot directory.
    pub fn detached(
        page_url: impl Into<String>,
        slot: Arc<dyn SnapshotSlot>,
        key: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            url: PageUrl::Fixed(page_url.into()),
            slot,
            key: key.into(),
        })
    }
}

#[async_trait]
impl PageSubscriber for SlotSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    fn page_url(&self) -> String {
        match &self.url {
            PageUrl::Live(page) => page.page_url(),
            PageUrl::Fixed(url) => url.clone(),
        }
    }

    async fn deliver(&self, snapshot: &str) -> Result<(), DeliveryError> {
        self.slot
            .write(&self.key, snapshot)
            .await
            .map_err(|e| DeliveryError::Refused(e.to_string()))?;
        self.slot.announce(&self.key).await;
        Ok(())
    }
}
