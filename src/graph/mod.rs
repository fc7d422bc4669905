//! Resource graph construction.
//!
//! Declarations go in, an acyclic [`Graph`] of [`ResourceSpec`]s comes out.
//! Every `${KIND.NAME...}` reference found in an attribute becomes an edge.

mod builder;
mod dag;
pub(crate) mod reference;
mod types;

pub use builder::GraphBuilder;
pub use dag::{topological_sort, Graph};
pub use types::{render_scalar, AttrValue, ResourceId, ResourceRef, ResourceSpec, Segment};
