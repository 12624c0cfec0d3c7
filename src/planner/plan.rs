//! Plan types and construction.
//!
//! A plan is an ordered list of actions derived from a diff. Creates and
//! updates run in topological order (dependencies before dependents);
//! deletes run first, in reverse topological order over the *recorded*
//! dependency edges (dependents before dependencies). Each action carries
//! the indices of the plan actions it must wait for, which is what the
//! executor schedules on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::config::Properties;
use crate::error::{GroundplanError, PlanError, Result};
use crate::graph::ResourceGraph;
use crate::state::{ResourceState, StateSnapshot};

use super::diff::{DiffResult, DiffType};

/// A complete execution plan.
#[derive(Debug)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Manifest hash this plan is based on.
    pub manifest_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<Action>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action operation.
    pub op: ActionOp,
    /// Resource identifier.
    pub resource_id: String,
    /// Resource kind tag.
    pub kind: String,
    /// Desired properties (empty for deletes).
    pub properties: Properties,
    /// Declared dependency identifiers, recorded into state on success.
    pub depends_on: Vec<String>,
    /// Recorded state entry, present for updates and deletes.
    pub prior: Option<ResourceState>,
    /// Indices of plan actions that must reach a terminal result first.
    pub wait_for: Vec<usize>,
    /// Reason for this action.
    pub reason: String,
}

/// Operations a plan can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOp {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
}

impl Plan {
    /// Creates a plan from a diff result.
    ///
    /// # Errors
    ///
    /// Returns `DanglingDependency` if a resource scheduled for deletion
    /// still has a recorded dependent that is not also being deleted.
    pub fn from_diff(
        diff: &DiffResult,
        graph: &ResourceGraph,
        prior: &StateSnapshot,
        manifest_hash: &str,
    ) -> Result<Self> {
        let delete_ids: BTreeSet<String> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Delete)
            .map(|d| d.id.clone())
            .collect();

        let mut actions = delete_actions(prior, &delete_ids, "Resource removed from manifest")?;

        // Creates and updates follow the graph's topological order; the
        // diff already lists desired resources in that order.
        let mut change_index: Vec<(String, usize)> = Vec::new();

        for resource_diff in &diff.diffs {
            let action_op = match resource_diff.diff_type {
                DiffType::Create => ActionOp::Create,
                DiffType::Update => ActionOp::Update,
                DiffType::Delete | DiffType::NoChange => continue,
            };

            let Some(spec) = graph.spec(&resource_diff.id) else {
                // Delete diffs are filtered out above; anything else is
                // always present in the graph.
                continue;
            };

            let wait_for = spec
                .depends_on
                .iter()
                .filter_map(|dep| {
                    change_index
                        .iter()
                        .find(|(id, _)| id == dep)
                        .map(|&(_, idx)| idx)
                })
                .collect();

            let index = actions.len();
            change_index.push((spec.id.clone(), index));

            let reason = match action_op {
                ActionOp::Create => String::from("Resource declared in manifest"),
                ActionOp::Update => format!(
                    "{} properties changed",
                    resource_diff.details.len()
                ),
                ActionOp::Delete => String::new(),
            };

            actions.push(Action {
                op: action_op,
                resource_id: spec.id.clone(),
                kind: spec.kind.clone(),
                properties: spec.properties.clone(),
                depends_on: spec.depends_on.clone(),
                prior: prior.get(&spec.id).cloned(),
                wait_for,
                reason,
            });
        }

        Ok(Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions,
        })
    }

    /// Creates a plan that deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded dependencies cannot be ordered.
    pub fn for_destroy(prior: &StateSnapshot, manifest_hash: &str) -> Result<Self> {
        let delete_ids: BTreeSet<String> = prior.keys().cloned().collect();
        let actions = delete_actions(prior, &delete_ids, "Destroying all resources")?;

        Ok(Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions,
        })
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(manifest_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions: vec![],
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.op == ActionOp::Create)
            .count()
    }

    /// Returns the number of update actions.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.op == ActionOp::Update)
            .count()
    }

    /// Returns the number of delete actions.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.op == ActionOp::Delete)
            .count()
    }

    /// Returns actions that can be dispatched immediately (nothing to wait for).
    #[must_use]
    pub fn ready_actions(&self) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.wait_for.is_empty())
            .collect()
    }
}

/// Builds delete actions in reverse topological order over recorded edges.
///
/// Fails with `DanglingDependency` if any recorded resource outside the
/// delete set still depends on a member of it.
fn delete_actions(
    prior: &StateSnapshot,
    delete_ids: &BTreeSet<String>,
    reason: &str,
) -> Result<Vec<Action>> {
    // No recorded dependent outside the delete set may point into it.
    for (id, state) in prior {
        if delete_ids.contains(id) {
            continue;
        }
        for dep in &state.dependencies {
            if delete_ids.contains(dep) {
                return Err(GroundplanError::Plan(PlanError::DanglingDependency {
                    id: dep.clone(),
                    dependent: id.clone(),
                }));
            }
        }
    }

    // Dependencies-first order over the recorded edges, then reversed so
    // dependents are deleted before their dependencies. Ties resolve
    // lexicographically because the id set is sorted.
    let mut placed: Vec<String> = Vec::with_capacity(delete_ids.len());
    let mut remaining: BTreeSet<&String> = delete_ids.iter().collect();

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .find(|id| {
                prior.get(id.as_str()).is_none_or(|state| {
                    state
                        .dependencies
                        .iter()
                        .filter(|dep| delete_ids.contains(*dep))
                        .all(|dep| placed.contains(dep))
                })
            })
            .copied()
            .cloned();

        match next {
            Some(id) => {
                remaining.remove(&id);
                placed.push(id);
            }
            None => {
                return Err(GroundplanError::internal(
                    "recorded dependencies form a cycle",
                ));
            }
        }
    }

    placed.reverse();

    // Delete of a dependency waits for deletes of its recorded dependents.
    let mut actions: Vec<Action> = Vec::with_capacity(placed.len());
    for id in &placed {
        let prior_state = prior.get(id).cloned();
        let wait_for = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                a.prior
                    .as_ref()
                    .is_some_and(|p| p.dependencies.contains(id))
            })
            .map(|(idx, _)| idx)
            .collect();

        actions.push(Action {
            op: ActionOp::Delete,
            resource_id: id.clone(),
            kind: prior_state
                .as_ref()
                .map_or_else(String::new, |p| p.kind.clone()),
            properties: Properties::new(),
            depends_on: prior_state
                .as_ref()
                .map_or_else(Vec::new, |p| p.dependencies.clone()),
            prior: prior_state,
            wait_for,
            reason: reason.to_string(),
        });
    }

    Ok(actions)
}

impl Action {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.op {
            ActionOp::Create => format!("Create {} '{}'", self.kind, self.resource_id),
            ActionOp::Update => format!("Update {} '{}'", self.kind, self.resource_id),
            ActionOp::Delete => format!("Delete {} '{}'", self.kind, self.resource_id),
        }
    }

    /// Returns the recorded external identifier, if any.
    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        self.prior.as_ref().and_then(|p| p.external_id.as_deref())
    }
}

impl std::fmt::Display for ActionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.resource_id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceSpec;
    use crate::error::GroundplanError;
    use crate::planner::DiffEngine;
    use crate::state::empty_snapshot;

    fn props(value: &str) -> Properties {
        let mut p = Properties::new();
        p.insert(String::from("value"), serde_json::json!(value));
        p
    }

    fn applied_with_deps(id: &str, deps: Vec<&str>) -> ResourceState {
        ResourceState::applied(
            id,
            "network",
            props("v1"),
            format!("ext-{id}"),
            deps.into_iter().map(String::from).collect(),
        )
    }

    fn plan_for(specs: Vec<ResourceSpec>, prior: &StateSnapshot) -> Result<Plan> {
        let graph = ResourceGraph::build(specs)?;
        let diff = DiffEngine::new().compute(&graph, prior);
        Plan::from_diff(&diff, &graph, prior, "hash")
    }

    #[test]
    fn test_create_order_follows_dependencies() {
        let specs = vec![
            ResourceSpec::new("cluster", "cluster")
                .with_dependency("vpc")
                .with_property("value", serde_json::json!("v1")),
            ResourceSpec::new("vpc", "network").with_property("value", serde_json::json!("v1")),
        ];

        let plan = plan_for(specs, &empty_snapshot()).expect("plan");
        assert_eq!(plan.action_count(), 2);
        assert_eq!(plan.actions[0].resource_id, "vpc");
        assert_eq!(plan.actions[1].resource_id, "cluster");
        assert_eq!(plan.actions[1].wait_for, vec![0]);
    }

    #[test]
    fn test_idempotent_plan_is_empty() {
        let specs = vec![
            ResourceSpec::new("vpc", "network").with_property("value", serde_json::json!("v1")),
        ];
        let mut prior = empty_snapshot();
        prior.insert(String::from("vpc"), applied_with_deps("vpc", vec![]));

        let plan = plan_for(specs, &prior).expect("plan");
        assert!(plan.is_empty());
    }

    #[test]
    fn test_delete_chain_reverse_order() {
        // Recorded chain: c depends on b depends on a. All removed.
        let mut prior = empty_snapshot();
        prior.insert(String::from("a"), applied_with_deps("a", vec![]));
        prior.insert(String::from("b"), applied_with_deps("b", vec!["a"]));
        prior.insert(String::from("c"), applied_with_deps("c", vec!["b"]));

        let plan = plan_for(vec![], &prior).expect("plan");
        let order: Vec<&str> = plan
            .actions
            .iter()
            .map(|a| a.resource_id.as_str())
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);

        // Each delete waits for the deletes of its recorded dependents
        assert!(plan.actions[0].wait_for.is_empty());
        assert_eq!(plan.actions[1].wait_for, vec![0]);
        assert_eq!(plan.actions[2].wait_for, vec![1]);
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        // "sg" stays declared and still records a dependency on "vpc",
        // which is being deleted.
        let specs = vec![
            ResourceSpec::new("sg", "security-group").with_property("value", serde_json::json!("v1")),
        ];
        let mut prior = empty_snapshot();
        prior.insert(String::from("vpc"), applied_with_deps("vpc", vec![]));
        prior.insert(String::from("sg"), applied_with_deps("sg", vec!["vpc"]));

        let err = plan_for(specs, &prior).expect_err("should fail");
        match err {
            GroundplanError::Plan(PlanError::DanglingDependency { id, dependent }) => {
                assert_eq!(id, "vpc");
                assert_eq!(dependent, "sg");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deletes_precede_creates() {
        let specs = vec![
            ResourceSpec::new("vpc", "network").with_property("value", serde_json::json!("v1")),
        ];
        let mut prior = empty_snapshot();
        prior.insert(String::from("old"), applied_with_deps("old", vec![]));

        let plan = plan_for(specs, &prior).expect("plan");
        assert_eq!(plan.actions[0].op, ActionOp::Delete);
        assert_eq!(plan.actions[0].resource_id, "old");
        assert_eq!(plan.actions[1].op, ActionOp::Create);
    }

    #[test]
    fn test_update_carries_prior_state() {
        let specs = vec![
            ResourceSpec::new("vpc", "network").with_property("value", serde_json::json!("v2")),
        ];
        let mut prior = empty_snapshot();
        prior.insert(String::from("vpc"), applied_with_deps("vpc", vec![]));

        let plan = plan_for(specs, &prior).expect("plan");
        assert_eq!(plan.action_count(), 1);
        assert_eq!(plan.actions[0].op, ActionOp::Update);
        assert_eq!(plan.actions[0].external_id(), Some("ext-vpc"));
    }

    #[test]
    fn test_plan_is_repeatable() {
        let build = || {
            let specs = vec![
                ResourceSpec::new("vpc", "network").with_property("value", serde_json::json!("v1")),
                ResourceSpec::new("sg", "security-group")
                    .with_dependency("vpc")
                    .with_property("value", serde_json::json!("v1")),
                ResourceSpec::new("resolver", "dns-resolver")
                    .with_dependency("vpc")
                    .with_property("value", serde_json::json!("v1")),
            ];
            let mut prior = empty_snapshot();
            prior.insert(String::from("stale"), applied_with_deps("stale", vec![]));
            let plan = plan_for(specs, &prior).expect("plan");
            plan.actions
                .iter()
                .map(|a| (a.op, a.resource_id.clone()))
                .collect::<Vec<_>>()
        };

        let first = build();
        for _ in 0..10 {
            assert_eq!(build(), first);
        }
    }

    #[test]
    fn test_destroy_plan_deletes_everything() {
        let mut prior = empty_snapshot();
        prior.insert(String::from("a"), applied_with_deps("a", vec![]));
        prior.insert(String::from("b"), applied_with_deps("b", vec!["a"]));

        let plan = Plan::for_destroy(&prior, "hash").expect("plan");
        assert_eq!(plan.delete_count(), 2);
        assert_eq!(plan.actions[0].resource_id, "b");
        assert_eq!(plan.actions[1].resource_id, "a");
    }
}
