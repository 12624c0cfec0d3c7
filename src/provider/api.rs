//! Provider API abstraction.
//!
//! Every resource kind is applied through this single capability: the
//! executor dispatches create/update/delete requests and the provider
//! implementation talks to the actual service. Requests carry an
//! idempotency token that stays stable across retries, so a retried call
//! has no duplicate effect.

use async_trait::async_trait;

use crate::config::Properties;
use crate::error::Result;

/// Request to create a resource on the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    /// Declared resource identifier (for provider-side tagging).
    pub resource_id: String,
    /// Resource kind tag.
    pub kind: String,
    /// Desired properties.
    pub properties: Properties,
    /// Idempotency token, stable across retries of this action.
    pub idempotency_token: String,
}

/// Request to update a resource on the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    /// Provider-assigned external identifier.
    pub external_id: String,
    /// Resource kind tag.
    pub kind: String,
    /// Desired properties.
    pub properties: Properties,
    /// Idempotency token, stable across retries of this action.
    pub idempotency_token: String,
}

/// Request to delete a resource on the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    /// Provider-assigned external identifier.
    pub external_id: String,
    /// Resource kind tag.
    pub kind: String,
    /// Idempotency token, stable across retries of this action.
    pub idempotency_token: String,
}

/// Abstract provider API.
///
/// Implementations must be idempotent for retried calls bearing the same
/// idempotency token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Creates a resource, returning its provider-assigned external id.
    async fn create(&self, request: CreateRequest) -> Result<String>;

    /// Updates an existing resource in place.
    async fn update(&self, request: UpdateRequest) -> Result<()>;

    /// Deletes an existing resource.
    async fn delete(&self, request: DeleteRequest) -> Result<()>;
}

#[async_trait]
impl ProviderApi for Box<dyn ProviderApi> {
    async fn create(&self, request: CreateRequest) -> Result<String> {
        (**self).create(request).await
    }

    async fn update(&self, request: UpdateRequest) -> Result<()> {
        (**self).update(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<()> {
        (**self).delete(request).await
    }
}
