//! Document types for the reconciler.
//!
//! These structs map one-to-one onto `rigging.yaml`. They describe the
//! desired state only; nothing here talks to providers or the state store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::graph::ResourceId;

/// The root of a Rigging document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Document {
    /// Run settings.
    #[serde(default)]
    pub settings: Settings,
    /// Kind to driver bindings.
    #[serde(default)]
    pub providers: Vec<ProviderBinding>,
    /// Values available to `${var.NAME}` placeholders.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Declared resources, in document order.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// Run settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// State store settings.
    #[serde(default)]
    pub state: StateSettings,
    /// Apply engine settings.
    #[serde(default)]
    pub apply: ApplySettings,
}

/// State store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StateSettings {
    /// State directory, relative to the document.
    #[serde(default = "default_state_path")]
    pub path: String,
}

/// Apply engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplySettings {
    /// Maximum number of provider operations in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Additional attempts after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Timeout of a single provider call, in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

/// Binds a resource kind to a provider driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderBinding {
    /// Resource kind handled by this binding.
    pub kind: String,
    /// Driver implementation.
    #[serde(default)]
    pub driver: ProviderDriver,
    /// Driver root directory, relative to the state directory.
    #[serde(default)]
    pub root: Option<String>,
}

/// Built-in provider drivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderDriver {
    /// Directory-backed simulation of remote infrastructure.
    #[default]
    Sandbox,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    /// Resource kind.
    pub kind: String,
    /// Resource name, unique within the kind.
    pub name: String,
    /// Raw attributes, possibly containing placeholders.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Explicit dependencies as `KIND.NAME`.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_state_path() -> String {
    String::from(".rigging")
}

const fn default_concurrency() -> usize {
    4
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5000
}

const fn default_operation_timeout_secs() -> u64 {
    30
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl Document {
    /// Returns the kinds bound to a provider.
    #[must_use]
    pub fn provider_kinds(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.kind.as_str()).collect()
    }

    /// Returns the declared resource identifiers.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.iter().map(ResourceDecl::id).collect()
    }
}

impl ResourceDecl {
    /// Returns the identifier of this declaration.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.kind, &self.name)
    }
}

impl std::fmt::Display for ProviderDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.state.path, ".rigging");
        assert_eq!(settings.apply.concurrency, 4);
        assert_eq!(settings.apply.max_retries, 3);
        assert_eq!(settings.apply.initial_backoff_ms, 200);
        assert_eq!(settings.apply.max_backoff_ms, 5000);
        assert_eq!(settings.apply.operation_timeout_secs, 30);
    }

    #[test]
    fn test_resource_decl_id() {
        let decl = ResourceDecl {
            kind: String::from("object-store-bucket"),
            name: String::from("trail"),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
        };
        assert_eq!(decl.id().to_string(), "object-store-bucket.trail");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<ResourceDecl, _> =
            serde_json::from_str(r#"{"kind":"a","name":"b","attrs":{}}"#);
        assert!(result.is_err());
    }
}
