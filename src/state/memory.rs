//! In-process state store.
//!
//! Nothing is persisted. Used by tests and by embedders that keep state
//! elsewhere.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{Result, StateError};
use crate::graph::ResourceId;

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{HistoryEntry, ResourceState, MAX_HISTORY};

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<ResourceId, ResourceState>,
    history: Vec<HistoryEntry>,
    lock: Option<LockInfo>,
}

/// State store backed by an in-process map.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given records.
    #[must_use]
    pub fn with_resources(resources: impl IntoIterator<Item = ResourceState>) -> Self {
        let inner = Inner {
            resources: resources.into_iter().map(|s| (s.id.clone(), s)).collect(),
            ..Inner::default()
        };
        Self {
            inner: RwLock::new(inner),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceState>> {
        Ok(self.inner.read().await.resources.get(id).cloned())
    }

    async fn put(&self, state: ResourceState) -> Result<()> {
        self.inner
            .write()
            .await
            .resources
            .insert(state.id.clone(), state);
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        self.inner.write().await.resources.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        Ok(self.inner.read().await.resources.values().cloned().collect())
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.inner.read().await.history.clone())
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.history.len() >= MAX_HISTORY {
            inner.history.remove(0);
        }
        inner.history.push(entry);
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut inner = self.inner.write().await;
        LockInfo::ensure_free(inner.lock.as_ref())?;
        let lock = LockInfo::new(holder);
        inner.lock = Some(lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            inner.lock = None;
        }
        Ok(())
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut inner = self.inner.write().await;
        match inner.lock.as_mut() {
            Some(lock) if lock.lock_id == lock_id => {
                lock.refresh();
                Ok(lock.clone())
            }
            _ => Err(StateError::LockFailed {
                message: format!("lock {lock_id} is no longer held"),
            }
            .into()),
        }
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.inner.read().await.lock.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
