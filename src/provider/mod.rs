//! Providers: the opaque implementations that create, read, update, and
//! delete resources of one kind.
//!
//! The registry maps kinds to implementations. [`SandboxProvider`] is the
//! built-in driver; [`MemoryProvider`] backs tests and embedders.

mod capability;
mod memory;
mod registry;
mod sandbox;

pub use capability::{ProviderCapability, ProviderOperation, ResolvedSpec};
pub use memory::{MemoryProvider, ProviderCall};
pub use registry::{ProviderRegistry, DEFAULT_SANDBOX_ROOT};
pub use sandbox::{SandboxProvider, FAIL_ATTRIBUTE, URN_ATTRIBUTE};
