use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type for shared slot operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SlotError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when a key cannot be stored
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for shared slot operations
pub type SlotResult<T> = Result<T, SlotError>;

/// Invalidation signal for one key. Carries no payload: consumers re-read
/// the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

/// SnapshotSlot defines the port for the key/value area shared between the
/// authoring side and a page context.
#[async_trait]
pub trait SnapshotSlot: Send + Sync + 'static {
    /// Read the current value stored under `key`.
    async fn read(&self, key: &str) -> SlotResult<Option<String>>;

    /// Store `value` under `key`. Writing does not notify by itself.
    async fn write(&self, key: &str, value: &str) -> SlotResult<()>;

    /// Tell subscribers that `key` changed.
    async fn announce(&self, key: &str);

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}
