use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Error raised when a snapshot cannot be delivered into a page context.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeliveryError {
    /// The page context refused the injection
    #[error("Page refused delivery: {0}")]
    Refused(String),
}

/// PageSubscriber defines the port for one live page context that receives
/// rule snapshots from the authoring side.
#[async_trait]
pub trait PageSubscriber: Send + Sync + 'static {
    /// Stable identity of the page context
    fn id(&self) -> Uuid;

    /// URL of the document currently loaded in the page context
    fn page_url(&self) -> String;

    /// Hand a serialized snapshot to the page context and signal it to reload.
    async fn deliver(&self, snapshot: &str) -> Result<(), DeliveryError>;
}
