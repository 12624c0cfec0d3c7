//! Manifest types for the reconciler.
//!
//! This module defines the structs that map to the `groundplan.yaml` file.
//! Resources are declarative: an identifier, a kind tag, a property map,
//! and the identifiers the resource depends on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired property mapping for a resource.
///
/// A `BTreeMap` keeps key order canonical, so equality and hashing are
/// deterministic regardless of declaration order in the manifest.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// The root manifest structure for a Groundplan deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    pub state: StateConfig,
    /// Provider API configuration.
    pub provider: ProviderConfig,
    /// Apply tuning (worker pool size, retries).
    #[serde(default)]
    pub apply: ApplyConfig,
    /// Declared resources, in declaration order.
    pub resources: Vec<ResourceSpec>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Base URL of the provider service.
    pub endpoint: String,
    /// Request timeout in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Apply tuning configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Upper bound on concurrently in-flight provider calls.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Maximum attempts per action (first try plus retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Unique identifier within the manifest.
    pub id: String,
    /// Resource kind tag (e.g., "network", "cluster", "dns-record").
    pub kind: String,
    /// Identifiers this resource depends on, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Desired properties, passed to the provider as-is.
    #[serde(default)]
    pub properties: Properties,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

// Default value functions

const fn default_max_parallel() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_retry_base_ms() -> u64 {
    500
}

const fn default_provider_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    String::from("dev")
}

impl Manifest {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns resource identifiers in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    /// Returns the resource with the given identifier, if declared.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.id == id)
    }
}

impl ResourceSpec {
    /// Creates a new resource spec with no dependencies or properties.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            depends_on: Vec::new(),
            properties: Properties::new(),
        }
    }

    /// Adds a dependency on another resource identifier.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Sets a desired property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}
