//! Local file-based state storage backend.
//!
//! Each resource is stored as its own JSON document under the state
//! directory, so every save and delete is independently atomic
//! (temp file + rename). Suitable for local development and
//! single-machine deployments.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{GroundplanError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{ResourceState, StateSnapshot};

/// Default state directory name.
const STATE_DIR: &str = ".groundplan";

/// Subdirectory holding one JSON document per resource.
const RESOURCES_DIR: &str = "resources";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Directory holding per-resource documents.
    resources_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store rooted in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                GroundplanError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let resources_dir = base_dir.join(RESOURCES_DIR);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            resources_dir,
            lock_path,
        }
    }

    /// Returns the path of the document for a resource identifier.
    fn resource_path(&self, id: &str) -> PathBuf {
        self.resources_dir.join(format!("{id}.json"))
    }

    /// Ensures the state directories exist.
    async fn ensure_dirs(&self) -> Result<()> {
        if !self.resources_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.resources_dir).await.map_err(|e| {
                GroundplanError::State(StateError::BackendError {
                    message: format!("Failed to create state directory: {e}"),
                })
            })?;
        }
        Ok(())
    }

    /// Writes content to a path atomically (temp file, fsync, rename).
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            GroundplanError::State(StateError::BackendError {
                message: format!("Failed to create temp state file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            GroundplanError::State(StateError::BackendError {
                message: format!("Failed to write state file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            GroundplanError::State(StateError::BackendError {
                message: format!("Failed to sync state file: {e}"),
            })
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            GroundplanError::State(StateError::BackendError {
                message: format!("Failed to rename state file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            GroundplanError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            GroundplanError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dirs().await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            GroundplanError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        Self::write_atomic(&self.lock_path, &content).await
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                GroundplanError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let mut snapshot = StateSnapshot::new();

        if !self.resources_dir.exists() {
            debug!(
                "State directory does not exist: {}",
                self.resources_dir.display()
            );
            return Ok(snapshot);
        }

        let mut entries = fs::read_dir(&self.resources_dir).await.map_err(|e| {
            GroundplanError::State(StateError::BackendError {
                message: format!("Failed to read state directory: {e}"),
            })
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            GroundplanError::State(StateError::BackendError {
                message: format!("Failed to read state directory entry: {e}"),
            })
        })? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let content = fs::read_to_string(&path).await.map_err(|e| {
                GroundplanError::State(StateError::Corrupted {
                    message: format!("Failed to read state file {}: {e}", path.display()),
                })
            })?;

            let state: ResourceState = serde_json::from_str(&content).map_err(|e| {
                GroundplanError::State(StateError::Corrupted {
                    message: format!("Failed to parse state file {}: {e}", path.display()),
                })
            })?;

            snapshot.insert(state.id.clone(), state);
        }

        info!(
            "Loaded {} resource state entries from {}",
            snapshot.len(),
            self.base_dir.display()
        );

        Ok(snapshot)
    }

    async fn save(&self, state: &ResourceState) -> Result<()> {
        self.ensure_dirs().await?;

        let path = self.resource_path(&state.id);
        debug!("Saving state entry: {}", path.display());

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            GroundplanError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        Self::write_atomic(&path, &content).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.resource_path(id);

        if path.exists() {
            debug!("Deleting state entry: {}", path.display());
            fs::remove_file(&path).await.map_err(|e| {
                GroundplanError::State(StateError::BackendError {
                    message: format!("Failed to delete state file: {e}"),
                })
            })?;
        }

        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        // Check for existing lock
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(GroundplanError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            // Lock is expired, we can take it
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn sample_state(id: &str) -> ResourceState {
        let mut properties = Properties::new();
        properties.insert(String::from("cidr"), serde_json::json!("10.1.0.0/19"));
        ResourceState::applied(id, "network", properties, format!("ext-{id}"), vec![])
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        store
            .save(&sample_state("platform-vpc"))
            .await
            .expect("Failed to save state");
        store
            .save(&sample_state("platform-sg"))
            .await
            .expect("Failed to save state");

        let snapshot = store.load().await.expect("Failed to load state");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot
                .get("platform-vpc")
                .and_then(|s| s.external_id.as_deref()),
            Some("ext-platform-vpc")
        );
    }

    #[tokio::test]
    async fn test_load_empty() {
        let (store, _temp) = create_test_store();

        let snapshot = store.load().await.expect("Load should not fail");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let (store, _temp) = create_test_store();

        let state = sample_state("platform-vpc");
        store.save(&state).await.expect("first save");
        store.save(&state).await.expect("second save");

        let snapshot = store.load().await.expect("load");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("platform-vpc"), Some(&state));
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let (store, _temp) = create_test_store();

        store.save(&sample_state("platform-vpc")).await.expect("save");
        store.delete("platform-vpc").await.expect("delete");
        // Deleting again is a no-op
        store.delete("platform-vpc").await.expect("delete again");

        let snapshot = store.load().await.expect("load");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(result.is_err());
    }
}
