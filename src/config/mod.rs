//! Configuration module for the Groundplan reconciler.
//!
//! This module handles all manifest-related functionality:
//! - Parsing and deserializing `groundplan.yaml`
//! - Validation of manifest values
//! - Computing manifest hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ManifestHasher;
pub use parser::{DEFAULT_MANIFEST_FILES, ManifestParser, find_manifest_file};
pub use spec::{
    ApplyConfig, Manifest, ProjectConfig, Properties, ProviderConfig, ResourceSpec, StateBackend,
    StateConfig,
};
pub use validator::{ManifestValidator, ValidationError, ValidationResult};
