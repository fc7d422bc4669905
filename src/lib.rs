// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Rigging
//!
//! A declarative, dependency-aware resource reconciler.
//!
//! ## Overview
//!
//! Rigging reads a document of resources, works out how they depend on each
//! other, and converges real infrastructure to match:
//!
//! - Resources reference each other with `${kind.name.attribute}`; every
//!   reference becomes a dependency edge
//! - Each resource kind is handled by a provider looked up in a registry
//! - `plan` compares the document with observed state and prints the change set
//! - `apply` executes it in dependency order, retrying transient failures and
//!   skipping dependents of failed resources
//! - Applied state is written after every operation, so an interrupted run
//!   never loses track of what it created
//!
//! ## Pipeline
//!
//! 1. **Graph**: declarations are parsed into an acyclic resource graph
//! 2. **Plan**: the graph is diffed against stored and observed state
//! 3. **Apply**: the change set is executed against the provider registry
//!
//! ## Modules
//!
//! - [`config`]: Document parsing, overrides, validation, and hashing
//! - [`graph`]: Resource identifiers, references, and the dependency graph
//! - [`provider`]: The provider capability, registry, and built-in providers
//! - [`planner`]: Diffing and change-set construction
//! - [`apply`]: Change-set execution
//! - [`state`]: State storage backends and locking
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! providers:
//!   - kind: object-store-bucket
//!     driver: sandbox
//!   - kind: key-value-policy
//!     driver: sandbox
//!
//! variables:
//!   bucket_name: audit-trail-logs
//!
//! resources:
//!   - kind: object-store-bucket
//!     name: trail
//!     attributes:
//!       bucket: "${var.bucket_name}"
//!   - kind: key-value-policy
//!     name: trail-policy
//!     attributes:
//!       bucket: "${object-store-bucket.trail}"
//!       resource: "${object-store-bucket.trail.urn}/*"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod apply;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use apply::{ApplyEngine, ApplyOptions, ApplyReport, OutcomeStatus, ResourceOutcome};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Document};
pub use error::{Result, RiggingError};
pub use graph::{Graph, GraphBuilder, ResourceId, ResourceSpec};
pub use planner::{Action, ChangeSet, ChangeSetEntry, PlanEngine};
pub use provider::{ProviderCapability, ProviderRegistry, SandboxProvider};
pub use state::{LocalStateStore, MemoryStateStore, ResourceState, StateStore};
