//! Versioned, single-writer store for the committed rule snapshot.
//!
//! Readers grab the latest committed [`RuleState`] lock-free and keep it for
//! as long as they need; a replacement never mutates a state in place, so an
//! exchange that resolved against version N keeps seeing version N.
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;

use crate::{
    config::models::RuleSnapshot,
    core::resolver::{CompiledTable, ResolvedRule},
};

/// One committed snapshot together with its compiled form.
#[derive(Debug)]
pub struct RuleState {
    version: u64,
    snapshot: RuleSnapshot,
    compiled: CompiledTable,
}

impl RuleState {
    fn new(version: u64, snapshot: RuleSnapshot) -> Self {
        let compiled = CompiledTable::compile(&snapshot);
        Self {
            version,
            snapshot,
            compiled,
        }
    }

    /// Monotonic version, 0 for the initial empty state.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> &RuleSnapshot {
        &self.snapshot
    }

    pub fn is_enabled(&self) -> bool {
        self.snapshot.enabled
    }

    pub fn resolve(&self, url: &str) -> Option<ResolvedRule> {
        self.compiled.resolve(url)
    }
}

/// Holder of the latest committed [`RuleState`].
pub struct SnapshotStore {
    current: ArcSwap<RuleState>,
    next_version: AtomicU64,
    writer: Mutex<()>,
}

impl SnapshotStore {
    /// Empty table, mocking enabled.
    pub fn new() -> Self {
        Self::with_snapshot(RuleSnapshot::default())
    }

    pub fn with_snapshot(snapshot: RuleSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleState::new(0, snapshot)),
            next_version: AtomicU64::new(1),
            writer: Mutex::new(()),
        }
    }

    /// Latest committed state.
    pub fn load(&self) -> Arc<RuleState> {
        self.current.load_full()
    }

    /// Replace the whole state and return the new version.
    pub fn replace(&self, snapshot: RuleSnapshot) -> u64 {
        // compile outside the writer section, commit under it
        let compiled = CompiledTable::compile(&snapshot);
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        self.current.store(Arc::new(RuleState {
            version,
            snapshot,
            compiled,
        }));
        tracing::debug!(version, "rule snapshot committed");
        version
    }

    /// Resolve against the latest committed state.
    pub fn resolve(&self, url: &str) -> Option<ResolvedRule> {
        self.current.load().resolve(url)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
