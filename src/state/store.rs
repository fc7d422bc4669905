//! State store trait definition.
//!
//! The plan and apply engines only see this trait. A single store instance is
//! opened at process start and passed to both.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{HistoryEntry, ResourceState};
use crate::error::Result;
use crate::graph::ResourceId;

/// Trait for state storage backends.
///
/// Writes are durable before they return, and a `get` issued after a `put`
/// on the same instance observes it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Gets the recorded state of a resource.
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceState>>;

    /// Records the state of a resource, replacing any previous record.
    async fn put(&self, state: ResourceState) -> Result<()>;

    /// Removes the record of a resource. Removing a missing record is a no-op.
    async fn delete(&self, id: &ResourceId) -> Result<()>;

    /// Lists every recorded resource, ordered by identifier.
    async fn list(&self) -> Result<Vec<ResourceState>>;

    /// Returns the run history, oldest first.
    async fn history(&self) -> Result<Vec<HistoryEntry>>;

    /// Appends a run to the history.
    async fn append_history(&self, entry: HistoryEntry) -> Result<()>;

    /// Acquires the state lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the state lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the expiry of the lock held as `lock_id`.
    ///
    /// Fails if the lock is gone or held by someone else.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
