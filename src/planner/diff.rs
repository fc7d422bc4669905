//! Attribute-level comparison of desired and observed state.
//!
//! Only keys present in the desired spec are compared, so outputs computed
//! by the provider never cause a difference. A desired value that depends on
//! something not known until apply always counts as a difference.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::graph::{ResourceRef, ResourceSpec};
use crate::state::ResourceState;

/// Compares specs against observed state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Difference in one attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Observed value, if the attribute exists.
    pub old_value: Option<Value>,
    /// Desired value. `None` means known only after apply.
    pub new_value: Option<Value>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Lists the attributes of `spec` whose desired value differs from
    /// `observed`. `lookup` resolves references against predicted state.
    pub fn compare<F>(&self, spec: &ResourceSpec, observed: &ResourceState, lookup: &F) -> Vec<DiffDetail>
    where
        F: Fn(&ResourceRef) -> Option<Value>,
    {
        let mut details = Vec::new();

        for (field, desired) in spec.attributes() {
            let old_value = observed.attributes.get(field).cloned();
            match desired.resolve(lookup) {
                Ok(new_value) => {
                    if old_value.as_ref() != Some(&new_value) {
                        details.push(DiffDetail {
                            field: field.clone(),
                            old_value,
                            new_value: Some(new_value),
                        });
                    }
                }
                Err(unknown) => {
                    debug!("{}.{field} depends on {unknown}, known after apply", spec.id());
                    details.push(DiffDetail {
                        field: field.clone(),
                        old_value,
                        new_value: None,
                    });
                }
            }
        }

        details
    }

    /// Describes every desired attribute of a resource about to be created.
    pub fn describe_create<F>(&self, spec: &ResourceSpec, lookup: &F) -> Vec<DiffDetail>
    where
        F: Fn(&ResourceRef) -> Option<Value>,
    {
        spec.attributes()
            .iter()
            .map(|(field, desired)| DiffDetail {
                field: field.clone(),
                old_value: None,
                new_value: desired.resolve(lookup).ok(),
            })
            .collect()
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let render = |value: &Option<Value>, missing: &str| {
            value
                .as_ref()
                .map_or_else(|| missing.to_string(), Value::to_string)
        };
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            render(&self.old_value, "(none)"),
            render(&self.new_value, "(known after apply)")
        )
    }
}
