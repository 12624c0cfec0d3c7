// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![cfg_attr(test, allow(missing_docs))] // Generated test doubles are exempt
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
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
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Groundplan
//!
//! A declarative, dependency-aware infrastructure reconciler.
//!
//! ## Overview
//!
//! Groundplan converges a declared set of resources against an idempotent
//! provider API:
//!
//! - Declare resources as data in a YAML manifest: an identifier, a kind
//!   tag, a property map, and the identifiers the resource depends on
//! - Diff the declaration against recorded state to get a minimal plan
//! - Apply the plan concurrently, dependencies first, with bounded retries
//! - Persist every confirmed result so partial progress is never lost
//!
//! ## Architecture
//!
//! A run flows through four stages:
//!
//! 1. **Graph**: declared resources become a DAG; cycles and unknown
//!    references are configuration errors
//! 2. **Planner**: the DAG is diffed against the state store; creates and
//!    updates are ordered dependencies-first, deletes dependents-first
//! 3. **Executor**: a dataflow scheduler dispatches actions as their
//!    dependencies succeed, bounded by `max_parallel`
//! 4. **State store**: per-resource entries committed atomically after
//!    each confirmed provider response
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing, validation, and hashing
//! - [`graph`]: Resource dependency graph
//! - [`planner`]: Diff computation, plan construction, and execution
//! - [`provider`]: Provider API abstraction and HTTP client
//! - [`state`]: State storage backends (local, S3) and locking
//! - [`reconciler`]: Run orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: bi-platform
//!
//! state:
//!   backend: local
//!
//! provider:
//!   endpoint: https://provider.internal/api
//!
//! resources:
//!   - id: platform-vpc
//!     kind: network
//!     properties:
//!       cidr: 10.1.0.0/19
//!   - id: platform-sg
//!     kind: security-group
//!     depends_on: [platform-vpc]
//!     properties:
//!       ingress:
//!         - cidr: 10.1.0.0/19
//!           port: 5432
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Manifest, ManifestHasher, ManifestParser, ManifestValidator, ResourceSpec};
pub use error::{GroundplanError, Result};
pub use graph::ResourceGraph;
pub use planner::{
    ActionOutcome, CancelToken, DiffEngine, ExecutionResult, ExecutionSummary, Executor, Plan,
};
pub use provider::{HttpProvider, ProviderApi};
pub use reconciler::{Reconciler, RunReport};
pub use state::{LocalStateStore, ResourceState, S3StateStore, StateStore};
