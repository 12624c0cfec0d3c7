//! Diff engine for comparing desired specs against recorded state.
//!
//! This module classifies every declared resource against the state store
//! snapshot: absent entries become creates, property mismatches become
//! updates, matching entries are left alone, and recorded entries with no
//! surviving spec become deletes.

use tracing::debug;

use crate::config::Properties;
use crate::graph::ResourceGraph;
use crate::state::StateSnapshot;

/// Engine for computing diffs between desired and recorded states.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource identifier.
    pub id: String,
    /// Resource kind tag.
    pub kind: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Details about the difference.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Property that differs.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs: desired resources in topological order, then
    /// recorded resources that are no longer declared.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between the desired graph and recorded state.
    #[must_use]
    pub fn compute(&self, graph: &ResourceGraph, prior: &StateSnapshot) -> DiffResult {
        let mut diffs = Vec::new();

        for spec in graph.topo_iter() {
            let diff = match prior.get(&spec.id) {
                None => {
                    debug!("Resource {} needs to be created", spec.id);
                    ResourceDiff {
                        id: spec.id.clone(),
                        kind: spec.kind.clone(),
                        diff_type: DiffType::Create,
                        details: vec![DiffDetail {
                            field: String::from("resource"),
                            old_value: None,
                            new_value: Some(spec.id.clone()),
                        }],
                    }
                }
                Some(state) if state.matches(&spec.properties) => {
                    debug!("Resource {} is up to date", spec.id);
                    ResourceDiff {
                        id: spec.id.clone(),
                        kind: spec.kind.clone(),
                        diff_type: DiffType::NoChange,
                        details: vec![],
                    }
                }
                Some(state) => {
                    let details =
                        Self::property_details(&state.properties, &spec.properties);
                    debug!(
                        "Resource {} needs update ({} properties changed)",
                        spec.id,
                        details.len()
                    );
                    ResourceDiff {
                        id: spec.id.clone(),
                        kind: spec.kind.clone(),
                        diff_type: DiffType::Update,
                        details,
                    }
                }
            };
            diffs.push(diff);
        }

        // Recorded resources no longer declared must be deleted.
        // Snapshot iteration is ordered by id, so the result is stable.
        for (id, state) in prior {
            if !graph.contains(id) {
                debug!("Found orphaned resource: {id}");
                diffs.push(ResourceDiff {
                    id: id.clone(),
                    kind: state.kind.clone(),
                    diff_type: DiffType::Delete,
                    details: vec![DiffDetail {
                        field: String::from("resource"),
                        old_value: state.external_id.clone(),
                        new_value: None,
                    }],
                });
            }
        }

        let creates = diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Create)
            .count();
        let updates = diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Update)
            .count();
        let deletes = diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Delete)
            .count();
        let unchanged = diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::NoChange)
            .count();

        DiffResult {
            diffs,
            creates,
            updates,
            deletes,
            unchanged,
        }
    }

    /// Computes property-level differences between recorded and desired maps.
    fn property_details(recorded: &Properties, desired: &Properties) -> Vec<DiffDetail> {
        let mut details = Vec::new();

        for (key, new_value) in desired {
            let old_value = recorded.get(key);
            if old_value != Some(new_value) {
                details.push(DiffDetail {
                    field: key.clone(),
                    old_value: old_value.map(ToString::to_string),
                    new_value: Some(new_value.to_string()),
                });
            }
        }

        for (key, old_value) in recorded {
            if !desired.contains_key(key) {
                details.push(DiffDetail {
                    field: key.clone(),
                    old_value: Some(old_value.to_string()),
                    new_value: None,
                });
            }
        }

        details
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceSpec;
    use crate::state::{ResourceState, empty_snapshot};

    fn props(cidr: &str) -> Properties {
        let mut p = Properties::new();
        p.insert(String::from("cidr"), serde_json::json!(cidr));
        p
    }

    fn graph_of(specs: Vec<ResourceSpec>) -> ResourceGraph {
        ResourceGraph::build(specs).expect("graph should build")
    }

    fn applied(id: &str, cidr: &str) -> ResourceState {
        ResourceState::applied(id, "network", props(cidr), format!("ext-{id}"), vec![])
    }

    #[test]
    fn test_empty_prior_all_creates() {
        let graph = graph_of(vec![
            ResourceSpec::new("vpc", "network").with_property("cidr", serde_json::json!("10.1.0.0/19")),
            ResourceSpec::new("sg", "security-group").with_dependency("vpc"),
        ]);

        let diff = DiffEngine::new().compute(&graph, &empty_snapshot());
        assert_eq!(diff.creates, 2);
        assert_eq!(diff.total_changes(), 2);
    }

    #[test]
    fn test_matching_state_is_noop() {
        let graph = graph_of(vec![
            ResourceSpec::new("vpc", "network").with_property("cidr", serde_json::json!("10.1.0.0/19")),
        ]);

        let mut prior = empty_snapshot();
        prior.insert(String::from("vpc"), applied("vpc", "10.1.0.0/19"));

        let diff = DiffEngine::new().compute(&graph, &prior);
        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn test_property_change_is_update() {
        let graph = graph_of(vec![
            ResourceSpec::new("vpc", "network").with_property("cidr", serde_json::json!("10.2.0.0/19")),
        ]);

        let mut prior = empty_snapshot();
        prior.insert(String::from("vpc"), applied("vpc", "10.1.0.0/19"));

        let diff = DiffEngine::new().compute(&graph, &prior);
        assert_eq!(diff.updates, 1);

        let update = &diff.diffs[0];
        assert_eq!(update.diff_type, DiffType::Update);
        assert_eq!(update.details.len(), 1);
        assert_eq!(update.details[0].field, "cidr");
        assert_eq!(
            update.details[0].old_value.as_deref(),
            Some("\"10.1.0.0/19\"")
        );
    }

    #[test]
    fn test_removed_spec_is_delete() {
        let graph = graph_of(vec![ResourceSpec::new("vpc", "network")
            .with_property("cidr", serde_json::json!("10.1.0.0/19"))]);

        let mut prior = empty_snapshot();
        prior.insert(String::from("vpc"), applied("vpc", "10.1.0.0/19"));
        prior.insert(String::from("old-sg"), applied("old-sg", "10.1.0.0/19"));

        let diff = DiffEngine::new().compute(&graph, &prior);
        assert_eq!(diff.deletes, 1);
        let delete = diff
            .diffs
            .iter()
            .find(|d| d.diff_type == DiffType::Delete)
            .expect("delete present");
        assert_eq!(delete.id, "old-sg");
    }

    #[test]
    fn test_removed_property_reported() {
        let mut desired_props = Properties::new();
        desired_props.insert(String::from("cidr"), serde_json::json!("10.1.0.0/19"));

        let mut recorded = desired_props.clone();
        recorded.insert(String::from("max_azs"), serde_json::json!(2));

        let details = DiffEngine::property_details(&recorded, &desired_props);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].field, "max_azs");
        assert!(details[0].new_value.is_none());
    }
}
