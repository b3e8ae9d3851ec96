use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{
    config::{
        loader::{parse_snapshot, snapshot_to_pretty_string},
        models::{RuleSnapshot, RuleTable},
    },
    ports::rule_store::{RuleStore, StoreError, StoreResult},
};

/// Rule store kept in memory. Starts empty with mocking enabled.
#[derive(Default)]
pub struct MemoryRuleStore {
    snapshot: RwLock<RuleSnapshot>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: RuleSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn load(&self) -> StoreResult<RuleSnapshot> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save_rules(&self, rules: &RuleTable) -> StoreResult<()> {
        self.snapshot.write().await.rules = rules.clone();
        Ok(())
    }

    async fn set_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.snapshot.write().await.enabled = enabled;
        Ok(())
    }
}

/// Rule store persisted as one snapshot document on disk.
///
/// A missing file reads as the initial state: no rules, mocking enabled.
pub struct FileRuleStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> StoreResult<RuleSnapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse_snapshot(&text).map_err(|e| {
                StoreError::Corrupt(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RuleSnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, snapshot: &RuleSnapshot) -> StoreResult<()> {
        let text = snapshot_to_pretty_string(snapshot)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update(&self, apply: impl FnOnce(&mut RuleSnapshot) + Send) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read().await?;
        apply(&mut snapshot);
        self.write(&snapshot).await?;
        tracing::debug!(path = %self.path.display(), rules = snapshot.rules.len(), "rule store saved");
        Ok(())
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn load(&self) -> StoreResult<RuleSnapshot> {
        self.read().await
    }

    async fn save_rules(&self, rules: &RuleTable) -> StoreResult<()> {
        let rules = rules.clone();
        self.update(move |snapshot| snapshot.rules = rules).await
    }

    async fn set_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.update(move |snapshot| snapshot.enabled = enabled).await
    }
}
