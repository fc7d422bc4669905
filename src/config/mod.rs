//! Document handling for the reconciler.
//!
//! This module handles everything about the input document:
//! - Parsing `rigging.yaml` (or JSON) into typed structs
//! - Environment and `--var` overrides
//! - Structural validation
//! - Hashing for history and change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    find_config_file, parse_var_assignment, ConfigParser, DEFAULT_CONFIG_FILES, VAR_ENV_PREFIX,
};
pub use spec::{
    ApplySettings, Document, ProviderBinding, ProviderDriver, ResourceDecl, Settings,
    StateSettings,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
