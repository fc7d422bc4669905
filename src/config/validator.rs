//! Document validation.
//!
//! Structural checks that do not need the dependency graph: naming rules,
//! settings sanity, provider bindings. Reference and cycle checks happen in
//! the graph builder.

use crate::error::{ConfigError, Result, RiggingError};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::graph::ResourceId;
use crate::graph::reference::{Piece, VAR_PREFIX, parse_pieces};

use super::spec::{ApplySettings, Document, ProviderBinding, ResourceDecl};

/// Validator for Rigging documents.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a document.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, document: &Document) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_settings(&document.settings.apply, &mut result);
        if document.settings.state.path.trim().is_empty() {
            result.error("settings.state.path", "State path cannot be empty");
        }
        Self::validate_providers(&document.providers, &mut result);
        Self::validate_variables(document, &mut result);
        Self::validate_resources(document, &mut result);

        if result.errors.is_empty() {
            debug!("Document validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(RiggingError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_settings(apply: &ApplySettings, result: &mut ValidationResult) {
        if apply.concurrency == 0 {
            result.error(
                "settings.apply.concurrency",
                "Concurrency must be at least 1",
            );
        }

        if apply.operation_timeout_secs == 0 {
            result.error(
                "settings.apply.operation_timeout_secs",
                "Operation timeout must be at least 1 second",
            );
        }

        if apply.max_backoff_ms < apply.initial_backoff_ms {
            result.error(
                "settings.apply.max_backoff_ms",
                format!(
                    "Maximum backoff ({} ms) is lower than the initial backoff ({} ms)",
                    apply.max_backoff_ms, apply.initial_backoff_ms
                ),
            );
        }

        if apply.max_retries > 10 {
            result.warnings.push(format!(
                "max_retries is {}; long retry chains delay failure reporting",
                apply.max_retries
            ));
        }
    }

    fn validate_providers(providers: &[ProviderBinding], result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, binding) in providers.iter().enumerate() {
            let field = format!("providers[{i}].kind");

            if !is_valid_kind(&binding.kind) {
                result.error(
                    &field,
                    format!(
                        "Kind '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        binding.kind
                    ),
                );
            } else if binding.kind == VAR_PREFIX {
                result.error(&field, reserved_kind_message());
            }

            if !seen.insert(binding.kind.as_str()) {
                result.error(&field, format!("Kind '{}' is bound more than once", binding.kind));
            }

            if binding.root.as_ref().is_some_and(|r| r.trim().is_empty()) {
                result.error(format!("providers[{i}].root"), "Provider root cannot be empty");
            }
        }
    }

    fn validate_variables(document: &Document, result: &mut ValidationResult) {
        for name in document.variables.keys() {
            if !is_valid_variable(name) {
                result.error(
                    format!("variables.{name}"),
                    format!(
                        "Variable name '{name}' is invalid. Must be alphanumeric with underscores or hyphens."
                    ),
                );
            }
        }

        let mut used = BTreeSet::new();
        for decl in &document.resources {
            for value in decl.attributes.values() {
                collect_variables(value, &mut used);
            }
        }

        for name in document.variables.keys() {
            if !used.contains(name.as_str()) {
                result
                    .warnings
                    .push(format!("Variable '{name}' is defined but never used"));
            }
        }
    }

    fn validate_resources(document: &Document, result: &mut ValidationResult) {
        let bound: HashSet<&str> = document.providers.iter().map(|p| p.kind.as_str()).collect();

        if document.resources.is_empty() {
            result.warnings.push(String::from("Document declares no resources"));
        }

        for (i, decl) in document.resources.iter().enumerate() {
            Self::validate_resource(i, decl, result);

            if is_valid_kind(&decl.kind) && !bound.contains(decl.kind.as_str()) {
                result.warnings.push(format!(
                    "Resource {} has kind '{}' with no provider binding",
                    decl.id(),
                    decl.kind
                ));
            }
        }
    }

    fn validate_resource(index: usize, decl: &ResourceDecl, result: &mut ValidationResult) {
        let prefix = format!("resources[{index}]");

        if !is_valid_kind(&decl.kind) {
            result.error(
                format!("{prefix}.kind"),
                format!(
                    "Kind '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    decl.kind
                ),
            );
        } else if decl.kind == VAR_PREFIX {
            result.error(format!("{prefix}.kind"), reserved_kind_message());
        }

        if !is_valid_name(&decl.name) {
            result.error(
                format!("{prefix}.name"),
                format!(
                    "Name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                    decl.name
                ),
            );
        }

        for (j, dep) in decl.depends_on.iter().enumerate() {
            if let Err(e) = ResourceId::parse(dep) {
                result.error(format!("{prefix}.depends_on[{j}]"), e);
            }
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Records every `${var.NAME}` used in a raw value.
fn collect_variables(value: &Value, used: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if let Ok(pieces) = parse_pieces(s) {
                for piece in pieces {
                    if let Piece::Var(name) = piece {
                        used.insert(name);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_variables(item, used);
            }
        }
        Value::Object(entries) => {
            for item in entries.values() {
                collect_variables(item, used);
            }
        }
        _ => {}
    }
}

fn reserved_kind_message() -> String {
    format!("Kind '{VAR_PREFIX}' is reserved for variable placeholders")
}

/// Kinds are lowercase alphanumeric with single hyphens, starting with a letter.
fn is_valid_kind(kind: &str) -> bool {
    let mut chars = kind.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !kind.ends_with('-') && !kind.contains("--")
}

/// Names follow the kind rules but may also contain underscores.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !name.ends_with('-')
}

fn is_valid_variable(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
