//! Change-set planning.
//!
//! Compares the desired graph against observed state and produces an
//! ordered change set for the apply engine.

mod diff;
mod engine;
mod plan;

pub use diff::{DiffDetail, DiffEngine};
pub use engine::PlanEngine;
pub use plan::{Action, ChangeSet, ChangeSetEntry};
