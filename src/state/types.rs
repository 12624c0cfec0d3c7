//! State types for tracking applied resources.
//!
//! These types represent the recorded state of resources as last confirmed
//! by the provider, used for diffing and idempotent re-application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Properties;

/// Current version of the state entry format.
pub const STATE_VERSION: &str = "1.0";

/// Recorded state of all resources, keyed by identifier.
///
/// A `BTreeMap` keeps iteration order deterministic, which the planner
/// relies on when ordering deletions.
pub type StateSnapshot = BTreeMap<String, ResourceState>;

/// Recorded state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// State entry format version.
    pub version: String,
    /// Resource identifier (from the manifest).
    pub id: String,
    /// Resource kind tag.
    pub kind: String,
    /// Properties as last applied to the provider.
    pub properties: Properties,
    /// Provider-assigned external identifier.
    pub external_id: Option<String>,
    /// Identifiers this resource depended on when applied.
    pub dependencies: Vec<String>,
    /// Current status.
    pub status: ResourceStatus,
    /// When the resource was first applied.
    pub created_at: DateTime<Utc>,
    /// When the entry was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Resource lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Action planned but no provider response confirmed yet.
    Pending,
    /// Last provider call for this resource succeeded.
    Applied,
    /// Last provider call for this resource failed permanently.
    Failed,
    /// Resource was deleted from the provider.
    Deleted,
}

impl ResourceState {
    /// Creates a freshly applied entry from a confirmed create response.
    #[must_use]
    pub fn applied(
        id: &str,
        kind: &str,
        properties: Properties,
        external_id: String,
        dependencies: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            id: id.to_string(),
            kind: kind.to_string(),
            properties,
            external_id: Some(external_id),
            dependencies,
            status: ResourceStatus::Applied,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a confirmed update: new properties and dependencies,
    /// preserving the creation timestamp and external identifier.
    #[must_use]
    pub fn updated(mut self, properties: Properties, dependencies: Vec<String>) -> Self {
        self.properties = properties;
        self.dependencies = dependencies;
        self.status = ResourceStatus::Applied;
        self.updated_at = Utc::now();
        self
    }

    /// Marks the entry as failed, keeping the last-applied properties.
    #[must_use]
    pub fn failed(mut self) -> Self {
        self.status = ResourceStatus::Failed;
        self.updated_at = Utc::now();
        self
    }

    /// Returns true if the recorded properties match the desired ones.
    #[must_use]
    pub fn matches(&self, desired: &Properties) -> bool {
        self.properties == *desired
    }
}

/// Builds an empty snapshot.
#[must_use]
pub fn empty_snapshot() -> StateSnapshot {
    BTreeMap::new()
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        write!(f, "{status}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(cidr: &str) -> Properties {
        let mut p = Properties::new();
        p.insert(String::from("cidr"), serde_json::json!(cidr));
        p
    }

    #[test]
    fn test_applied_entry() {
        let state = ResourceState::applied(
            "platform-vpc",
            "network",
            props("10.1.0.0/19"),
            String::from("vpc-0abc"),
            vec![],
        );

        assert_eq!(state.status, ResourceStatus::Applied);
        assert_eq!(state.external_id.as_deref(), Some("vpc-0abc"));
        assert!(state.matches(&props("10.1.0.0/19")));
        assert!(!state.matches(&props("10.2.0.0/19")));
    }

    #[test]
    fn test_updated_preserves_identity() {
        let state = ResourceState::applied(
            "platform-vpc",
            "network",
            props("10.1.0.0/19"),
            String::from("vpc-0abc"),
            vec![],
        );
        let created_at = state.created_at;

        let updated = state.updated(props("10.2.0.0/19"), vec![]);
        assert_eq!(updated.created_at, created_at);
        assert_eq!(updated.external_id.as_deref(), Some("vpc-0abc"));
        assert!(updated.matches(&props("10.2.0.0/19")));
    }

    #[test]
    fn test_failed_keeps_properties() {
        let state = ResourceState::applied(
            "platform-vpc",
            "network",
            props("10.1.0.0/19"),
            String::from("vpc-0abc"),
            vec![],
        );

        let failed = state.failed();
        assert_eq!(failed.status, ResourceStatus::Failed);
        assert!(failed.matches(&props("10.1.0.0/19")));
    }

    #[test]
    fn test_serde_round_trip() {
        let state = ResourceState::applied(
            "platform-vpc",
            "network",
            props("10.1.0.0/19"),
            String::from("vpc-0abc"),
            vec![String::from("other")],
        );

        let json = serde_json::to_string(&state).expect("serialize");
        let back: ResourceState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }
}
