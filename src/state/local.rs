//! Local file-based state storage backend.
//!
//! All resources live in one pretty-printed JSON document, `state.json`,
//! inside the state directory. The document is cached in memory and every
//! mutation rewrites the file through a temp file, `fsync`, and an atomic
//! rename before returning.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, RiggingError, StateError};
use crate::graph::ResourceId;

use super::lock::{LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{HistoryEntry, ResourceState, StateDocument, STATE_VERSION};

/// State file name.
pub const STATE_FILE: &str = "state.json";

/// Lock file name.
pub const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Cached copy of the state document.
    document: Mutex<StateDocument>,
}

impl LocalStateStore {
    /// Opens the store in `base_dir`, loading any existing state.
    ///
    /// The directory is created lazily on the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing state file cannot be read, parsed, or
    /// has an unsupported version.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        let document = Self::load(&state_path).await?.unwrap_or_default();
        debug!(
            "Opened local state at {} ({} resources, serial {})",
            state_path.display(),
            document.resources.len(),
            document.serial
        );

        Ok(Self {
            base_dir,
            state_path,
            lock_path,
            document: Mutex::new(document),
        })
    }

    /// Returns the state directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Returns the serial of the cached document.
    pub async fn serial(&self) -> u64 {
        self.document.lock().await.serial
    }

    async fn load(state_path: &Path) -> Result<Option<StateDocument>> {
        if !state_path.exists() {
            debug!("State file does not exist: {}", state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", state_path.display());

        let content = fs::read_to_string(state_path).await.map_err(|e| {
            RiggingError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let document: StateDocument = serde_json::from_str(&content).map_err(|e| {
            RiggingError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if document.version != STATE_VERSION {
            return Err(RiggingError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: document.version,
            }));
        }

        Ok(Some(document))
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                RiggingError::State(StateError::io(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Writes the document to disk atomically.
    async fn persist(&self, document: &StateDocument) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(document).map_err(|e| {
            RiggingError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            RiggingError::State(StateError::io(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            RiggingError::State(StateError::io(format!("Failed to write state file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            RiggingError::State(StateError::io(format!("Failed to sync state file: {e}")))
        })?;
        drop(file);

        fs::rename(&temp_path, &self.state_path).await.map_err(|e| {
            RiggingError::State(StateError::io(format!("Failed to rename state file: {e}")))
        })?;

        self.sync_dir().await?;

        debug!("State saved (serial {})", document.serial);
        Ok(())
    }

    /// Flushes the directory entry so the rename survives a crash.
    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<()> {
        let dir = fs::File::open(&self.base_dir).await.map_err(|e| {
            RiggingError::State(StateError::io(format!("Failed to open state directory: {e}")))
        })?;
        dir.sync_all().await.map_err(|e| {
            RiggingError::State(StateError::io(format!("Failed to sync state directory: {e}")))
        })
    }

    #[cfg(not(unix))]
    async fn sync_dir(&self) -> Result<()> {
        Ok(())
    }

    /// Applies a mutation and persists it. The cache only changes once the
    /// file is written.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StateDocument) + Send,
    {
        let mut cached = self.document.lock().await;
        let mut next = cached.clone();
        change(&mut next);
        self.persist(&next).await?;
        *cached = next;
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            RiggingError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            RiggingError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            RiggingError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| {
            RiggingError::State(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            RiggingError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            RiggingError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                RiggingError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceState>> {
        Ok(self.document.lock().await.get(id).cloned())
    }

    async fn put(&self, state: ResourceState) -> Result<()> {
        debug!("Recording state of {}", state.id);
        self.mutate(move |document| document.set(state)).await
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        if self.document.lock().await.get(id).is_none() {
            return Ok(());
        }
        debug!("Removing state of {id}");
        self.mutate(|document| {
            document.remove(id);
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        Ok(self.document.lock().await.resources.values().cloned().collect())
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.document.lock().await.history.clone())
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        self.mutate(move |document| document.add_history(entry)).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let existing = self.read_lock_file().await?;
        LockInfo::ensure_free(existing.as_ref())?;
        if existing.is_some() {
            debug!("Expired lock found, taking over");
        }

        let lock_info = LockInfo::new(holder);
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

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut lock = match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => existing,
            _ => {
                return Err(StateError::LockFailed {
                    message: format!("lock {lock_id} is no longer held"),
                }
                .into())
            }
        };

        lock.refresh();
        self.write_lock_file(&lock).await?;
        Ok(lock)
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
