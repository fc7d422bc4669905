//! Error types for the Rigging reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! document loading, graph construction, provider lookup, provider calls,
//! state persistence, planning, and apply.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Rigging reconciler.
#[derive(Debug, Error)]
pub enum RiggingError {
    /// Document and graph construction errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Provider registry errors.
    #[error("Provider registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Provider operation errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document loading and graph construction errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document was not found.
    #[error("Document not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The document could not be parsed.
    #[error("Failed to parse document: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Document validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An attribute uses a variable that is not defined.
    #[error("Undefined variable '{name}' referenced by {resource}")]
    UndefinedVariable {
        /// Name of the missing variable.
        name: String,
        /// Resource whose attribute uses it.
        resource: String,
    },

    /// Two declarations share an identifier.
    #[error("Duplicate resource declaration: {id}")]
    DuplicateResource {
        /// The duplicated identifier.
        id: String,
    },

    /// A declaration references an identifier absent from the input set.
    #[error("Unresolved reference from {from} to {target}")]
    UnresolvedReference {
        /// Resource holding the reference.
        from: String,
        /// Identifier that does not exist.
        target: String,
    },

    /// Dependency edges form a cycle.
    #[error("Dependency cycle detected: {path}")]
    Cycle {
        /// The cycle, rendered as `a -> b -> a`.
        path: String,
    },
}

/// Provider registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No provider is registered for a resource kind.
    #[error("No provider registered for resource kind '{kind}'")]
    UnknownKind {
        /// The unregistered kind.
        kind: String,
    },
}

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorClass {
    /// The operation may succeed if retried.
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// Failure reported by a provider capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{class} failure: {message}")]
pub struct ProviderError {
    /// Retry classification.
    pub class: ProviderErrorClass,
    /// Description of the failure.
    pub message: String,
}

/// State store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted or unreadable.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("State storage failure: {message}")]
    Io {
        /// Description of the storage failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The topological sort could not complete.
    #[error("Topological sort stalled with {remaining} resources left; the graph has a cycle")]
    CycleDetected {
        /// Number of nodes that could not be ordered.
        remaining: usize,
    },

    /// A change-set entry depends on an entry that does not precede it.
    #[error("Change-set entry {id} depends on {dependency}, which does not precede it")]
    InvalidOrder {
        /// Entry with the misplaced dependency.
        id: String,
        /// The dependency.
        dependency: String,
    },

    /// Reading observed state failed.
    #[error("Failed to read observed state of {id}: {source}")]
    Provider {
        /// Resource being read.
        id: String,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The run was aborted before completion.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Rigging operations.
pub type Result<T> = std::result::Result<T, RiggingError>;

impl RiggingError {
    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError {
                class: ProviderErrorClass::Transient,
                ..
            })
        )
    }

    /// Returns the process exit code for this error.
    ///
    /// Errors caught before any provider call (parse, reference, cycle,
    /// unknown kind) map to 2; everything else maps to 1.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Registry(_) | Self::Plan(PlanError::CycleDetected { .. }) => 2,
            _ => 1,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl ProviderError {
    /// Creates a transient (retryable) provider error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ProviderErrorClass::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent provider error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ProviderErrorClass::Permanent,
            message: message.into(),
        }
    }

    /// Returns true if the failure may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class, ProviderErrorClass::Transient)
    }
}

impl StateError {
    /// Creates a storage failure with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProviderErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}
