//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Entries are keyed by resource identifier, and every `save`/`delete` is
//! a single atomic unit: a crash between two commits never leaves an entry
//! half-written.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{ResourceState, StateSnapshot};
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads all recorded resource states.
    ///
    /// Returns an empty snapshot if no state exists yet.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Saves a single resource state atomically.
    ///
    /// Saving is idempotent: retrying a commit for the same resource
    /// yields the same stored entry.
    async fn save(&self, state: &ResourceState) -> Result<()>;

    /// Deletes the recorded state for a resource.
    ///
    /// Deleting a missing entry is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Acquires the run-level exclusive lock.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run-level lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<StateSnapshot> {
        (**self).load().await
    }

    async fn save(&self, state: &ResourceState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
