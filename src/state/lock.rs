//! Run locks.
//!
//! Apply and destroy take the lock for the whole run so two processes never
//! mutate the same state at once. A lock that outlives its expiry is treated
//! as abandoned and may be taken over. Long runs keep their lock alive with
//! [`keep_alive`], which pushes the expiry forward on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::StateStore;
use crate::error::StateError;

/// Seconds before an unreleased lock counts as abandoned.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Seconds between keep-alive refreshes of a held lock.
pub const LOCK_REFRESH_SECS: u64 = 60;

/// A held run lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier, required to release the lock.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for `holder`. An empty holder gets a generated one.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Pushes the expiry a full period past now.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Fails if `current` is a live lock.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockedByOther`] naming the current holder.
    pub fn ensure_free(current: Option<&Self>) -> Result<(), StateError> {
        match current {
            Some(lock) if !lock.is_expired() => Err(StateError::LockedByOther {
                holder: lock.holder.clone(),
                since: lock.acquired_at.to_rfc3339(),
            }),
            _ => Ok(()),
        }
    }
}

/// Refreshes the lock `lock_id` every `period` until `stop` is cancelled.
///
/// A failed refresh is logged and retried on the next tick; the run itself
/// decides what to do when the lock is gone.
pub fn keep_alive(
    store: Arc<dyn StateStore>,
    lock_id: String,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => match store.refresh_lock(&lock_id).await {
                    Ok(lock) => debug!("Refreshed state lock {lock_id} until {}", lock.expires_at),
                    Err(e) => warn!("Failed to refresh state lock {lock_id}: {e}"),
                },
            }
        }
    })
}

/// Generates a holder identifier for the current process:
/// `<hostname>-<pid>-<random>`.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{hostname}-{}-{}", std::process::id(), &suffix[..8])
}
