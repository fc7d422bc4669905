//! Recorded state types.
//!
//! A [`ResourceState`] is what the reconciler last knew about one resource
//! after a successful provider call. The [`StateDocument`] is the on-disk
//! layout used by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::graph::ResourceId;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// Attribute path that resolves to the external ID.
const ID_ATTRIBUTE: &str = "id";

/// Recorded state of a single resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource identifier.
    pub id: ResourceId,
    /// Identifier assigned by the provider.
    pub external_id: String,
    /// Resolved attributes, including provider-computed outputs.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Dependencies at the time of the last apply.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Hash of the desired attributes that produced this state.
    #[serde(default)]
    pub attributes_hash: String,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last written.
    pub updated_at: DateTime<Utc>,
}

/// The complete on-disk state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    /// State format version.
    pub version: String,
    /// Incremented on every write.
    pub serial: u64,
    /// Resources keyed by `kind.name`.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// When the document was last written.
    pub last_updated: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Document fingerprint at the time of the run.
    pub config_hash: String,
    /// Entries that succeeded.
    pub succeeded: usize,
    /// Entries that failed.
    pub failed: usize,
    /// Entries skipped because a dependency did not succeed.
    pub skipped: usize,
    /// Entries not started because the run was cancelled.
    #[serde(default)]
    pub cancelled: usize,
    /// Whether every entry succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Converge to the document.
    Apply,
    /// Remove every tracked resource.
    Destroy,
}

impl ResourceState {
    /// Creates a state record stamped with the current time.
    #[must_use]
    pub fn new(
        id: ResourceId,
        external_id: impl Into<String>,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            external_id: external_id.into(),
            attributes,
            dependencies: Vec::new(),
            attributes_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Looks up an output value by attribute path.
    ///
    /// An empty path, or the single segment `id`, yields the external ID.
    /// Later segments index into objects by key and arrays by position.
    #[must_use]
    pub fn output(&self, path: &[String]) -> Option<Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(Value::String(self.external_id.clone()));
        };

        if rest.is_empty() && first == ID_ATTRIBUTE && !self.attributes.contains_key(ID_ATTRIBUTE) {
            return Some(Value::String(self.external_id.clone()));
        }

        let mut current = self.attributes.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

impl StateDocument {
    /// Creates a new empty state document.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            serial: 0,
            resources: BTreeMap::new(),
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Gets a resource by identifier.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.get(&id.to_string())
    }

    /// Adds or replaces a resource.
    pub fn set(&mut self, state: ResourceState) {
        self.resources.insert(state.id.to_string(), state);
        self.touch();
    }

    /// Removes a resource by identifier.
    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let result = self.resources.remove(&id.to_string());
        if result.is_some() {
            self.touch();
        }
        result
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.touch();
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

impl Default for StateDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            success: true,
            error: None,
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
