//! State management for the reconciler.
//!
//! This module records what the reconciler last applied: one
//! [`ResourceState`] per resource, plus run history and a lock that keeps
//! concurrent runs apart.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::{LocalStateStore, LOCK_FILE, STATE_FILE};
pub use lock::{generate_holder_id, keep_alive, LockInfo, LOCK_EXPIRY_SECS, LOCK_REFRESH_SECS};
pub use memory::MemoryStateStore;
#[cfg(test)]
pub use store::MockStateStore;
pub use store::StateStore;
pub use types::{HistoryEntry, ResourceState, RunOperation, StateDocument, MAX_HISTORY, STATE_VERSION};
