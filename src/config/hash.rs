//! Manifest hashing for change detection.
//!
//! This module provides deterministic hashing of manifest structures, used
//! to label plans and detect configuration changes between runs.

use sha2::{Digest, Sha256};

use super::spec::{Manifest, ResourceSpec};

/// Hasher for computing manifest hashes.
#[derive(Debug, Default)]
pub struct ManifestHasher;

impl ManifestHasher {
    /// Creates a new manifest hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire manifest.
    ///
    /// This hash changes when any part of the manifest changes.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();

        hasher.update(manifest.project.name.as_bytes());
        hasher.update(manifest.project.environment.as_bytes());
        hasher.update(manifest.provider.endpoint.as_bytes());

        for resource in &manifest.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource spec.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.id.as_bytes());
        hasher.update(resource.kind.as_bytes());

        for dep in &resource.depends_on {
            hasher.update(dep.as_bytes());
        }

        // Properties are a BTreeMap, so serialization order is canonical
        if let Ok(json) = serde_json::to_string(&resource.properties) {
            hasher.update(json.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
