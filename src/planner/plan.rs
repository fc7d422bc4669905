//! Change-set types.
//!
//! A change set is an ordered list of entries. Every entry's dependencies
//! appear before it, so executing entries front to back (or in parallel,
//! honoring `depends_on`) is always safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::PlanError;
use crate::graph::{ResourceId, ResourceSpec};
use crate::state::{ResourceState, RunOperation};

use super::diff::DiffDetail;

/// What the apply engine will do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Delete the resource.
    Delete,
    /// Nothing to do.
    NoOp,
}

/// One step of a change set.
#[derive(Debug, Clone)]
pub struct ChangeSetEntry {
    /// Target resource.
    pub id: ResourceId,
    /// Action to take.
    pub action: Action,
    /// Entries that must succeed first.
    pub depends_on: Vec<ResourceId>,
    /// Desired spec, for create, update, and no-op.
    pub desired: Option<ResourceSpec>,
    /// Prior state, for update, delete, and no-op.
    pub prior: Option<ResourceState>,
    /// Attribute differences, for display.
    pub details: Vec<DiffDetail>,
}

/// An ordered set of changes.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// When the change set was computed.
    pub created_at: DateTime<Utc>,
    /// What kind of run this change set is for.
    pub operation: RunOperation,
    /// Fingerprint of the document this change set is based on.
    pub config_hash: String,
    /// Entries in execution order.
    pub entries: Vec<ChangeSetEntry>,
}

impl ChangeSet {
    /// Creates a change set.
    #[must_use]
    pub fn new(operation: RunOperation, entries: Vec<ChangeSetEntry>) -> Self {
        Self {
            created_at: Utc::now(),
            operation,
            config_hash: String::new(),
            entries,
        }
    }

    /// Sets the document fingerprint.
    #[must_use]
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there is nothing but no-ops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_changes()
    }

    /// Returns true if any entry changes something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action != Action::NoOp)
    }

    /// Gets the entry for a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ChangeSetEntry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Returns the number of create entries.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(Action::Create)
    }

    /// Returns the number of update entries.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(Action::Update)
    }

    /// Returns the number of delete entries.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(Action::Delete)
    }

    /// Returns the number of no-op entries.
    #[must_use]
    pub fn noop_count(&self) -> usize {
        self.count(Action::NoOp)
    }

    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create_count(),
            self.update_count(),
            self.delete_count(),
            self.noop_count()
        )
    }

    /// Checks that every dependency precedes its dependent.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidOrder`] for the first misplaced dependency.
    pub fn verify_order(&self) -> Result<(), PlanError> {
        let mut seen: HashSet<&ResourceId> = HashSet::new();
        for entry in &self.entries {
            for dep in &entry.depends_on {
                if !seen.contains(dep) {
                    return Err(PlanError::InvalidOrder {
                        id: entry.id.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
            seen.insert(&entry.id);
        }
        Ok(())
    }
}

impl ChangeSetEntry {
    /// Returns a human-readable description of the entry.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {}", self.id),
            Action::Update => format!("Update {} ({} attributes)", self.id, self.details.len()),
            Action::Delete => format!("Delete {}", self.id),
            Action::NoOp => format!("No change for {}", self.id),
        }
    }
}

impl Action {
    /// Returns the symbol used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::NoOp => "=",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChangeSetEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.id)?;
        if !self.depends_on.is_empty() {
            let deps: Vec<String> = self.depends_on.iter().map(ToString::to_string).collect();
            write!(f, " (after {})", deps.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Change set ({}):", self.summary())?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f, "  {i}. {entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, action: Action, deps: &[&str]) -> ChangeSetEntry {
        ChangeSetEntry {
            id: ResourceId::parse(id).unwrap(),
            action,
            depends_on: deps.iter().map(|d| ResourceId::parse(d).unwrap()).collect(),
            desired: None,
            prior: None,
            details: Vec::new(),
        }
    }

    #[test]
    fn test_counts_and_emptiness() {
        let set = ChangeSet::new(
            RunOperation::Apply,
            vec![
                entry("topic.a", Action::NoOp, &[]),
                entry("topic.b", Action::NoOp, &["topic.a"]),
            ],
        );
        assert!(set.is_empty());
        assert!(!set.has_changes());
        assert_eq!(set.noop_count(), 2);

        let set = ChangeSet::new(
            RunOperation::Apply,
            vec![
                entry("topic.old", Action::Delete, &[]),
                entry("topic.a", Action::Create, &[]),
                entry("topic.b", Action::Update, &["topic.a"]),
            ],
        );
        assert!(set.has_changes());
        assert_eq!(set.summary(), "1 to create, 1 to update, 1 to delete, 0 unchanged");
    }

    #[test]
    fn test_verify_order() {
        let good = ChangeSet::new(
            RunOperation::Apply,
            vec![
                entry("bucket.b", Action::Create, &[]),
                entry("policy.p", Action::Create, &["bucket.b"]),
            ],
        );
        assert!(good.verify_order().is_ok());

        let bad = ChangeSet::new(
            RunOperation::Apply,
            vec![
                entry("policy.p", Action::Create, &["bucket.b"]),
                entry("bucket.b", Action::Create, &[]),
            ],
        );
        assert!(matches!(
            bad.verify_order(),
            Err(PlanError::InvalidOrder { .. })
        ));
    }

    #[test]
    fn test_verify_order_delete_waits_for_update() {
        let early = ChangeSet::new(
            RunOperation::Apply,
            vec![
                entry("bucket.old", Action::Delete, &["policy.p"]),
                entry("bucket.new", Action::Create, &[]),
                entry("policy.p", Action::Update, &["bucket.new"]),
            ],
        );
        assert!(matches!(
            early.verify_order(),
            Err(PlanError::InvalidOrder { ref id, .. }) if id == "bucket.old"
        ));

        let late = ChangeSet::new(
            RunOperation::Apply,
            vec![
                entry("bucket.new", Action::Create, &[]),
                entry("policy.p", Action::Update, &["bucket.new"]),
                entry("bucket.old", Action::Delete, &["policy.p"]),
            ],
        );
        assert!(late.verify_order().is_ok());
    }

    #[test]
    fn test_action_serde_and_display() {
        assert_eq!(serde_json::to_string(&Action::NoOp).unwrap(), "\"no-op\"");
        assert_eq!(Action::NoOp.to_string(), "no-op");
        assert_eq!(Action::Delete.symbol(), "-");
    }
}
