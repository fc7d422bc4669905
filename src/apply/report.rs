//! Apply outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::graph::ResourceId;
use crate::planner::{Action, ChangeSetEntry};
use crate::state::{HistoryEntry, RunOperation};

/// Final status of one change-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    /// The entry was applied and recorded.
    Succeeded,
    /// The provider operation failed.
    Failed,
    /// A dependency did not succeed, so the entry was never started.
    SkippedDueToDependency,
    /// The run was cancelled before the entry started.
    Cancelled,
}

/// Outcome of one change-set entry.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceOutcome {
    /// Target resource.
    pub id: ResourceId,
    /// Planned action.
    pub action: Action,
    /// Final status.
    pub status: OutcomeStatus,
    /// Provider calls made, retries included.
    pub attempts: u32,
    /// Failure message, if any.
    pub error: Option<String>,
    /// Wall-clock time spent on the entry.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

/// Result of executing a change set.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Kind of run.
    pub operation: RunOperation,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
    /// One outcome per change-set entry, in change-set order.
    pub outcomes: Vec<ResourceOutcome>,
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl ResourceOutcome {
    fn new(entry: &ChangeSetEntry, status: OutcomeStatus) -> Self {
        Self {
            id: entry.id.clone(),
            action: entry.action,
            status,
            attempts: 0,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn succeeded(entry: &ChangeSetEntry, attempts: u32, duration: Duration) -> Self {
        Self {
            attempts,
            duration,
            ..Self::new(entry, OutcomeStatus::Succeeded)
        }
    }

    pub(crate) fn failed(
        entry: &ChangeSetEntry,
        attempts: u32,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            attempts,
            error: Some(error.into()),
            duration,
            ..Self::new(entry, OutcomeStatus::Failed)
        }
    }

    pub(crate) fn skipped(entry: &ChangeSetEntry, blocked_by: &ResourceId) -> Self {
        Self {
            error: Some(format!("dependency {blocked_by} did not succeed")),
            ..Self::new(entry, OutcomeStatus::SkippedDueToDependency)
        }
    }

    pub(crate) fn cancelled(entry: &ChangeSetEntry) -> Self {
        Self::new(entry, OutcomeStatus::Cancelled)
    }
}

impl ApplyReport {
    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Number of entries that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(OutcomeStatus::Succeeded)
    }

    /// Number of entries that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    /// Number of entries skipped because of a failed dependency.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::SkippedDueToDependency)
    }

    /// Number of entries never started because of cancellation.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(OutcomeStatus::Cancelled)
    }

    /// Returns true if every entry succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Succeeded)
    }

    /// Gets the outcome for a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.id == *id)
    }

    /// Builds the history entry recorded for this run.
    #[must_use]
    pub fn history_entry(&self, config_hash: &str) -> HistoryEntry {
        let mut entry = HistoryEntry::new(self.operation, config_hash);
        entry.timestamp = self.finished_at;
        entry.succeeded = self.succeeded();
        entry.failed = self.failed();
        entry.skipped = self.skipped();
        entry.cancelled = self.cancelled();
        entry.success = self.is_success();
        if !entry.success {
            entry.error = self
                .outcomes
                .iter()
                .find(|o| o.status == OutcomeStatus::Failed)
                .and_then(|o| o.error.as_ref())
                .map(|e| format!("first failure: {e}"));
        }
        entry
    }

    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped, {} cancelled",
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.cancelled()
        )
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SkippedDueToDependency => "skipped-due-to-dependency",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}
