//! State management module for the Groundplan reconciler.
//!
//! This module provides persistent storage for recorded resource state:
//! per-resource entries keyed by identifier, a run-level exclusive lock,
//! and local/S3 backends.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{ResourceState, ResourceStatus, STATE_VERSION, StateSnapshot, empty_snapshot};
