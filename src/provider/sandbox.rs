//! Directory-backed sandbox provider.
//!
//! Simulates remote infrastructure on the local filesystem: each resource is
//! one JSON file at `<root>/<kind>/<name>.json`. External IDs are UUIDs and
//! every resource gets a computed `urn` output.
//!
//! Fault injection for drills: an attribute `_fail` set to `permanent` or
//! `transient` makes create and update fail with that class.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::state::ResourceState;

use super::capability::{ProviderCapability, ResolvedSpec};

/// Attribute that triggers an injected failure.
pub const FAIL_ATTRIBUTE: &str = "_fail";

/// Computed output attribute.
pub const URN_ATTRIBUTE: &str = "urn";

/// What the sandbox keeps on disk for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxRecord {
    external_id: String,
    attributes: BTreeMap<String, Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Provider that stores resources as files under a root directory.
#[derive(Debug, Clone)]
pub struct SandboxProvider {
    root: PathBuf,
}

impl SandboxProvider {
    /// Creates a sandbox rooted at `root`. The directory is created on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the sandbox root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &ResourceId) -> PathBuf {
        self.root.join(id.kind()).join(format!("{}.json", id.name()))
    }

    async fn read_record(&self, id: &ResourceId) -> Result<Option<SandboxRecord>, ProviderError> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProviderError::transient(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            ProviderError::permanent(format!("Sandbox record {} is corrupted: {e}", path.display()))
        })
    }

    async fn write_record(&self, id: &ResourceId, record: &SandboxRecord) -> Result<(), ProviderError> {
        let path = self.record_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ProviderError::transient(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| ProviderError::permanent(format!("Failed to encode record: {e}")))?;

        let temp = path.with_extension("json.tmp");
        fs::write(&temp, content).await.map_err(|e| {
            ProviderError::transient(format!("Failed to write {}: {e}", temp.display()))
        })?;
        fs::rename(&temp, &path).await.map_err(|e| {
            ProviderError::transient(format!("Failed to rename {}: {e}", temp.display()))
        })
    }

    fn state_of(id: &ResourceId, record: SandboxRecord) -> ResourceState {
        let mut state = ResourceState::new(id.clone(), record.external_id, record.attributes);
        state.created_at = record.created_at;
        state.updated_at = record.updated_at;
        state
    }
}

/// Returns the failure requested through [`FAIL_ATTRIBUTE`], if any.
fn injected_failure(spec: &ResolvedSpec) -> Option<ProviderError> {
    match spec.attributes.get(FAIL_ATTRIBUTE).and_then(Value::as_str) {
        Some("permanent") => Some(ProviderError::permanent(format!(
            "Injected permanent failure for {}",
            spec.id
        ))),
        Some("transient") => Some(ProviderError::transient(format!(
            "Injected transient failure for {}",
            spec.id
        ))),
        _ => None,
    }
}

fn urn(id: &ResourceId, external_id: &str) -> Value {
    Value::String(format!("urn:rigging:{}:{external_id}", id.kind()))
}

#[async_trait]
impl ProviderCapability for SandboxProvider {
    async fn create(&self, spec: &ResolvedSpec) -> Result<ResourceState, ProviderError> {
        if let Some(failure) = injected_failure(spec) {
            return Err(failure);
        }

        if self.read_record(&spec.id).await?.is_some() {
            return Err(ProviderError::permanent(format!("{} already exists", spec.id)));
        }

        let external_id = Uuid::new_v4().to_string();
        let mut attributes = spec.attributes.clone();
        attributes.insert(URN_ATTRIBUTE.to_string(), urn(&spec.id, &external_id));

        let now = Utc::now();
        let record = SandboxRecord {
            external_id,
            attributes,
            created_at: now,
            updated_at: now,
        };
        self.write_record(&spec.id, &record).await?;

        debug!("Sandbox created {} ({})", spec.id, record.external_id);
        Ok(Self::state_of(&spec.id, record))
    }

    async fn read(
        &self,
        id: &ResourceId,
        _recorded: Option<&ResourceState>,
    ) -> Result<Option<ResourceState>, ProviderError> {
        Ok(self
            .read_record(id)
            .await?
            .map(|record| Self::state_of(id, record)))
    }

    async fn update(
        &self,
        spec: &ResolvedSpec,
        current: &ResourceState,
    ) -> Result<ResourceState, ProviderError> {
        if let Some(failure) = injected_failure(spec) {
            return Err(failure);
        }

        let Some(existing) = self.read_record(&spec.id).await? else {
            return Err(ProviderError::permanent(format!(
                "{} ({}) does not exist",
                spec.id, current.external_id
            )));
        };

        let mut attributes = spec.attributes.clone();
        attributes.insert(URN_ATTRIBUTE.to_string(), urn(&spec.id, &existing.external_id));

        let record = SandboxRecord {
            external_id: existing.external_id,
            attributes,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        self.write_record(&spec.id, &record).await?;

        debug!("Sandbox updated {} ({})", spec.id, record.external_id);
        Ok(Self::state_of(&spec.id, record))
    }

    async fn delete(&self, current: &ResourceState) -> Result<(), ProviderError> {
        let path = self.record_path(&current.id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Sandbox deleted {} ({})", current.id, current.external_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::transient(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}
