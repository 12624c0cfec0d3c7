//! Error types for the Groundplan reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration loading, graph construction, planning, provider calls,
//! and state persistence.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Groundplan reconciler.
#[derive(Debug, Error)]
pub enum GroundplanError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// All of these are fatal: they abort a run before any provider call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest file could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource identifier.
    #[error("Duplicate resource id: {id}")]
    DuplicateResource {
        /// The duplicated identifier.
        id: String,
    },

    /// A resource depends on an identifier not present in the manifest.
    #[error("Resource '{required_by}' depends on unknown resource '{id}'")]
    UnknownReference {
        /// The unknown identifier.
        id: String,
        /// The resource declaring the dependency.
        required_by: String,
    },

    /// Dependency edges form a cycle.
    #[error("Dependency cycle detected: {path}")]
    CycleDetected {
        /// The cycle, rendered as "a -> b -> a".
        path: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A resource scheduled for deletion still has a live dependent.
    #[error("Cannot delete '{id}': resource '{dependent}' still depends on it")]
    DanglingDependency {
        /// The resource being deleted.
        id: String,
        /// The dependent that would be left dangling.
        dependent: String,
    },
}

/// Provider API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// API request failed with an HTTP status.
    #[error("Provider request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Resource not found on the provider.
    #[error("Resource not found on provider: {external_id}")]
    NotFound {
        /// External id of the missing resource.
        external_id: String,
    },

    /// The provider rejected the request as invalid.
    #[error("Provider rejected request: {message}")]
    ValidationRejected {
        /// Description of the rejection.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Backend I/O error (filesystem or S3).
    #[error("State backend error: {message}")]
    BackendError {
        /// Description of the backend error.
        message: String,
    },
}

/// Result type alias for Groundplan operations.
pub type Result<T> = std::result::Result<T, GroundplanError>;

impl GroundplanError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Provider(ProviderError::NetworkError { .. }) => Some(5),
            _ => None,
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true if a retry with the same idempotency token may succeed.
    ///
    /// Rate limits, network failures, and server-side (5xx) errors are
    /// transient; everything else is permanent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendError {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}
