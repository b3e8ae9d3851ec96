use async_trait::async_trait;
use thiserror::Error;

use crate::config::models::{RuleSnapshot, RuleTable};

/// Error type for the persistent rule store
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt rule store: {0}")]
    Corrupt(String),
}

/// Result type for rule store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// RuleStore defines the port for the authoring side's persistent rules.
///
/// The store is owned by the authoring service; page contexts never see it.
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    /// Current rules and enabled flag. A fresh store reports an empty table
    /// with mocking enabled.
    async fn load(&self) -> StoreResult<RuleSnapshot>;

    /// Replace the rule table.
    async fn save_rules(&self, rules: &RuleTable) -> StoreResult<()>;

    /// Replace the global enabled flag.
    async fn set_enabled(&self, enabled: bool) -> StoreResult<()>;
}
