//! The uniform capability every provider implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::graph::{ResourceId, ResourceRef, ResourceSpec};
use crate::state::ResourceState;

/// A resource spec with every reference replaced by a concrete value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSpec {
    /// Resource identifier.
    pub id: ResourceId,
    /// Fully resolved attributes.
    pub attributes: BTreeMap<String, Value>,
}

/// Provider operations, for logging and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOperation {
    /// Create a resource.
    Create,
    /// Read observed state.
    Read,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
}

/// Create, read, update, and delete for one resource kind.
///
/// Implementations must be safe to call concurrently for different
/// resources. `delete` of a resource that no longer exists succeeds.
#[async_trait]
pub trait ProviderCapability: Send + Sync {
    /// Creates the resource and returns its recorded state.
    async fn create(&self, spec: &ResolvedSpec) -> Result<ResourceState, ProviderError>;

    /// Reads the observed state. `None` means the resource does not exist.
    async fn read(
        &self,
        id: &ResourceId,
        recorded: Option<&ResourceState>,
    ) -> Result<Option<ResourceState>, ProviderError>;

    /// Updates the resource in place.
    async fn update(
        &self,
        spec: &ResolvedSpec,
        current: &ResourceState,
    ) -> Result<ResourceState, ProviderError>;

    /// Deletes the resource.
    async fn delete(&self, current: &ResourceState) -> Result<(), ProviderError>;
}

impl ResolvedSpec {
    /// Creates a resolved spec.
    #[must_use]
    pub const fn new(id: ResourceId, attributes: BTreeMap<String, Value>) -> Self {
        Self { id, attributes }
    }

    /// Resolves a spec's attributes with `lookup`.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` could not resolve.
    pub fn resolve<F>(spec: &ResourceSpec, lookup: &F) -> Result<Self, ResourceRef>
    where
        F: Fn(&ResourceRef) -> Option<Value>,
    {
        let mut attributes = BTreeMap::new();
        for (key, value) in spec.attributes() {
            attributes.insert(key.clone(), value.resolve(lookup)?);
        }
        Ok(Self::new(spec.id().clone(), attributes))
    }
}

impl std::fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrValue;
    use serde_json::json;

    #[test]
    fn test_resolve_spec() {
        let bucket = ResourceId::new("object-store-bucket", "trail");
        let spec = ResourceSpec::new(
            ResourceId::new("key-value-policy", "p"),
            BTreeMap::from([
                (String::from("effect"), AttrValue::Literal(json!("allow"))),
                (
                    String::from("bucket"),
                    AttrValue::Reference(ResourceRef {
                        target: bucket.clone(),
                        attribute: Vec::new(),
                    }),
                ),
            ]),
            vec![bucket],
            1,
        );

        let resolved = ResolvedSpec::resolve(&spec, &|_: &ResourceRef| Some(json!("b-1"))).unwrap();
        assert_eq!(resolved.attributes.get("bucket"), Some(&json!("b-1")));
        assert_eq!(resolved.attributes.get("effect"), Some(&json!("allow")));

        let missing = ResolvedSpec::resolve(&spec, &|_: &ResourceRef| None).unwrap_err();
        assert_eq!(missing.target.to_string(), "object-store-bucket.trail");
    }
}
