//! Planning module for reconciliation runs.
//!
//! This module compares desired specs against recorded state, turns the
//! differences into a dependency-ordered plan, and executes that plan
//! against the provider with bounded concurrency.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{
    ActionOutcome, CancelToken, ExecutionHandle, ExecutionOptions, ExecutionResult,
    ExecutionSummary, Executor,
};
pub use plan::{Action, ActionOp, Plan};
