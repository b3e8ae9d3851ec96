use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::{fs, sync::broadcast};
use uuid::Uuid;

use crate::ports::snapshot_slot::{SlotError, SlotResult, SnapshotSlot, StorageChange};

const CHANGE_CAPACITY: usize = 64;
const VALUE_EXT: &str = "json";
const SIGNAL_EXT: &str = "signal";

fn check_key(key: &str) -> SlotResult<()> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SlotError::InvalidKey(key.to_string()))
    }
}

/// In-process slot, for a page context living next to its authoring side.
pub struct MemorySlot {
    values: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemorySlot {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for MemorySlot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotSlot for MemorySlot {
    async fn read(&self, key: &str) -> SlotResult<Option<String>> {
        check_key(key)?;
        let values = self
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> SlotResult<()> {
        check_key(key)?;
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn announce(&self, key: &str) {
        // no receivers is not an error
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Directory-backed slot shared between processes.
///
/// Each key is stored as `<dir>/<key>.json`, replaced atomically through a
/// temporary file unique to the write. `announce` touches `<dir>/<key>.signal`; a filesystem
/// watcher turns signal changes made by any process into [`StorageChange`]
/// events, so a process may see its own announcements twice.
pub struct FileSlot {
    dir: PathBuf,
    changes: broadcast::Sender<StorageChange>,
    // kept alive for as long as the slot exists
    _watcher: Option<notify::RecommendedWatcher>,
}

impl FileSlot {
    /// Open (creating if needed) the slot directory and start watching it.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut slot = Self::open(dir)?;
        slot.init_watcher()?;
        Ok(slot)
    }

    /// Open the slot without a watcher. Only local announcements are seen.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("Failed to create slot directory {}", dir.display()))?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            dir,
            changes,
            _watcher: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{VALUE_EXT}"))
    }

    fn signal_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{SIGNAL_EXT}"))
    }

    fn init_watcher(&mut self) -> Result<()> {
        let tx = self.changes.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !(event.kind.is_modify() || event.kind.is_create()) {
                            return;
                        }
                        for path in &event.paths {
                            if path.extension().and_then(|e| e.to_str()) != Some(SIGNAL_EXT) {
                                continue;
                            }
                            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                                tracing::debug!(key, "slot signal changed: {:?}", event.kind);
                                let _ = tx.send(StorageChange {
                                    key: key.to_string(),
                                });
                            }
                        }
                    }
                    Err(e) => tracing::error!("Slot watch error: {:?}", e),
                }
            })?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch slot directory")?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl SnapshotSlot for FileSlot {
    async fn read(&self, key: &str) -> SlotResult<Option<String>> {
        check_key(key)?;
        match fs::read_to_string(self.value_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> SlotResult<()> {
        check_key(key)?;
        let target = self.value_path(key);
        // writers in other processes share the directory
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, value).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn announce(&self, key: &str) {
        if check_key(key).is_err() {
            tracing::warn!(key, "not announcing change for invalid slot key");
            return;
        }
        if self._watcher.is_none() {
            let _ = self.changes.send(StorageChange {
                key: key.to_string(),
            });
        }
        let stamp = chrono::Utc::now().to_rfc3339();
        if let Err(e) = fs::write(self.signal_path(key), stamp).await {
            tracing::warn!(key, error = %e, "failed to write slot signal");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_memory_slot_read_write() {
        let slot = MemorySlot::new();
        assert_eq!(slot.read("k").await.unwrap(), None);
        slot.write("k", "v1").await.unwrap();
        slot.write("k", "v2").await.unwrap();
        assert_eq!(slot.read("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let slot = MemorySlot::new();
        assert!(matches!(slot.write("", "x").await, Err(SlotError::InvalidKey(_))));
        assert!(matches!(slot.read("../etc").await, Err(SlotError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_memory_slot_write_does_not_notify() {
        let slot = MemorySlot::new();
        let mut rx = slot.subscribe();
        slot.write("k", "v").await.unwrap();
        assert!(rx.try_recv().is_err());

        slot.announce("k").await;
        assert_eq!(
            rx.recv().await.unwrap(),
            StorageChange {
                key: "k".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_file_slot_round_trip() {
        let dir = tempdir().unwrap();
        let slot = FileSlot::open(dir.path().join("slot")).unwrap();
        assert_eq!(slot.read("mock_helper_rules").await.unwrap(), None);

        slot.write("mock_helper_rules", r#"{"rules":{}}"#).await.unwrap();
        assert_eq!(
            slot.read("mock_helper_rules").await.unwrap().as_deref(),
            Some(r#"{"rules":{}}"#)
        );
        assert!(dir.path().join("slot/mock_helper_rules.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_slot_concurrent_writers_do_not_collide() {
        let dir = tempdir().unwrap();
        let mut writers = Vec::new();
        for i in 0..8 {
            // separate handles stand in for separate processes
            let slot = FileSlot::open(dir.path()).unwrap();
            writers.push(tokio::spawn(async move {
                for round in 0..10 {
                    slot.write("rules", &format!("{{\"writer\":{i},\"round\":{round}}}"))
                        .await
                        .unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        let slot = FileSlot::open(dir.path()).unwrap();
        let value = slot.read("rules").await.unwrap().unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&value).is_ok(), "{value}");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_file_slot_without_watcher_announces_locally() {
        let dir = tempdir().unwrap();
        let slot = FileSlot::open(dir.path()).unwrap();
        let mut rx = slot.subscribe();
        slot.announce("rules").await;
        assert_eq!(rx.recv().await.unwrap().key, "rules");
        assert!(dir.path().join("rules.signal").exists());
    }

    #[tokio::test]
    async fn test_file_slot_sees_other_writer() {
        let dir = tempdir().unwrap();
        let reader = FileSlot::new(dir.path()).unwrap();
        let mut rx = reader.subscribe();

        // a second handle on the same directory stands in for another process
        let writer = FileSlot::open(dir.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.write("rules", "{}").await.unwrap();
        writer.announce("rules").await;

        let change = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Ok(change) if change.key == "rules" => return change,
                    Ok(_) => continue,
                    Err(e) => panic!("channel error: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for slot change");
        assert_eq!(change.key, "rules");
        assert_eq!(reader.read("rules").await.unwrap().as_deref(), Some("{}"));
    }
}
