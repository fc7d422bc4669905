//! Provider registry: resource kind to capability.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ProviderBinding, ProviderDriver};
use crate::error::{RegistryError, Result};
use crate::graph::Graph;

use super::capability::ProviderCapability;
use super::sandbox::SandboxProvider;

/// Default sandbox root, relative to the state directory.
pub const DEFAULT_SANDBOX_ROOT: &str = "sandbox";

/// Maps resource kinds to provider implementations.
///
/// Populated once at process start, then shared read-only.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ProviderCapability>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from document bindings.
    ///
    /// Sandbox roots are resolved against `state_dir`. Bindings with the same
    /// root share one provider instance.
    #[must_use]
    pub fn from_bindings(bindings: &[ProviderBinding], state_dir: &Path) -> Self {
        let mut registry = Self::new();
        let mut sandboxes: BTreeMap<PathBuf, Arc<SandboxProvider>> = BTreeMap::new();

        for binding in bindings {
            match binding.driver {
                ProviderDriver::Sandbox => {
                    let root = state_dir
                        .join(binding.root.as_deref().unwrap_or(DEFAULT_SANDBOX_ROOT));
                    let provider = sandboxes
                        .entry(root.clone())
                        .or_insert_with(|| Arc::new(SandboxProvider::new(root)))
                        .clone();
                    registry.register(&binding.kind, provider);
                }
            }
        }

        info!("Registered providers for {} kinds", registry.len());
        registry
    }

    /// Registers a provider for a kind, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        provider: Arc<dyn ProviderCapability>,
    ) -> Option<Arc<dyn ProviderCapability>> {
        let kind = kind.into();
        debug!("Registering provider for kind '{kind}'");
        self.providers.insert(kind, provider)
    }

    /// Looks up the provider for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`] if nothing is registered.
    pub fn lookup(&self, kind: &str) -> Result<Arc<dyn ProviderCapability>> {
        self.providers.get(kind).cloned().ok_or_else(|| {
            RegistryError::UnknownKind {
                kind: kind.to_string(),
            }
            .into()
        })
    }

    /// Checks that every kind in the graph has a provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`] for the first unregistered kind.
    pub fn ensure_kinds(&self, graph: &Graph) -> Result<()> {
        for kind in graph.kinds() {
            self.lookup(kind)?;
        }
        Ok(())
    }

    /// Returns true if a provider is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    /// Returns the registered kinds in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Returns the number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
