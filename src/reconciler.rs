//! Run orchestration.
//!
//! The reconciler ties the stages of a run together: load recorded state,
//! build the dependency graph, diff, plan, and apply under the run-level
//! state lock. Applying streams per-action results so callers can observe
//! progress and cancel early.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{Manifest, ManifestHasher};
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::planner::{
    CancelToken, DiffEngine, ExecutionHandle, ExecutionResult, ExecutionSummary, Executor, Plan,
};
use crate::provider::ProviderApi;
use crate::state::StateStore;

/// Orchestrates planning and applying for one manifest.
pub struct Reconciler {
    /// The manifest being reconciled.
    manifest: Manifest,
    /// Provider API.
    provider: Arc<dyn ProviderApi>,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Manifest hasher.
    hasher: ManifestHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// Final report of an apply run.
#[derive(Debug)]
pub struct RunReport {
    /// Terminal result for every action, in completion order.
    pub results: Vec<ExecutionResult>,
    /// Aggregate counts.
    pub summary: ExecutionSummary,
}

/// Handle to an in-progress apply, holding the run-level state lock.
pub struct ApplyHandle {
    inner: ExecutionHandle,
    store: Arc<dyn StateStore>,
    lock_id: String,
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        manifest: Manifest,
        provider: Arc<dyn ProviderApi>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            manifest,
            provider,
            store,
            hasher: ManifestHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Computes the plan for converging recorded state to the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the state cannot be
    /// loaded, or a deletion would leave a dangling dependent.
    pub async fn plan(&self) -> Result<Plan> {
        info!(
            "Planning {}/{}",
            self.manifest.project.name, self.manifest.project.environment
        );

        let graph = ResourceGraph::build(self.manifest.resources.clone())?;
        let prior = self.store.load().await?;

        let diff = self.diff_engine.compute(&graph, &prior);
        info!(
            "Diff: {} creates, {} updates, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.deletes, diff.unchanged
        );

        let manifest_hash = self.hasher.hash_manifest(&self.manifest);
        Plan::from_diff(&diff, &graph, &prior, &manifest_hash)
    }

    /// Computes a plan that deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded.
    pub async fn destroy_plan(&self) -> Result<Plan> {
        info!(
            "Planning destroy of {}/{}",
            self.manifest.project.name, self.manifest.project.environment
        );

        let prior = self.store.load().await?;
        let manifest_hash = self.hasher.hash_manifest(&self.manifest);
        Plan::for_destroy(&prior, &manifest_hash)
    }

    /// Starts applying a plan under the run-level state lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub async fn start_apply(&self, plan: Plan) -> Result<ApplyHandle> {
        let lock = self.store.acquire_lock("").await?;

        let executor = Executor::new(Arc::clone(&self.provider), Arc::clone(&self.store))
            .with_options(self.manifest.apply.into());

        Ok(ApplyHandle {
            inner: executor.apply(plan),
            store: Arc::clone(&self.store),
            lock_id: lock.lock_id,
        })
    }

    /// Applies a plan to completion, collecting every result.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the run halts
    /// on a state-store failure.
    pub async fn apply(&self, plan: Plan) -> Result<RunReport> {
        let mut handle = self.start_apply(plan).await?;

        let mut results = Vec::new();
        while let Some(result) = handle.next_result().await {
            results.push(result);
        }

        let summary = handle.finish().await?;
        Ok(RunReport { results, summary })
    }
}

impl ApplyHandle {
    /// Receives the next terminal action result.
    pub async fn next_result(&mut self) -> Option<ExecutionResult> {
        self.inner.next_result().await
    }

    /// Returns a clonable cancellation token for this run.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel_token()
    }

    /// Finishes the run and releases the state lock.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the run halted on a state-store failure.
    pub async fn finish(self) -> Result<ExecutionSummary> {
        let Self {
            inner,
            store,
            lock_id,
        } = self;

        let outcome = inner.finish().await;

        // The lock is released even when the run failed
        if let Err(e) = store.release_lock(&lock_id).await {
            error!("Failed to release state lock {lock_id}: {e}");
        }

        outcome
    }
}

impl RunReport {
    /// Returns true if every action succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.summary.all_successful()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.summary)?;
        for result in &self.results {
            let status = match &result.outcome {
                crate::planner::ActionOutcome::Succeeded { .. } => String::from("ok"),
                crate::planner::ActionOutcome::Failed { reason } => format!("failed: {reason}"),
                crate::planner::ActionOutcome::Skipped { due_to } => {
                    format!("skipped (due to {due_to})")
                }
            };
            writeln!(f, "  {} {} - {status}", result.op, result.resource_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ApplyConfig, ProjectConfig, Properties, ProviderConfig, ResourceSpec, StateBackend,
        StateConfig,
    };
    use crate::provider::MockProviderApi;
    use crate::state::{LocalStateStore, ResourceStatus};
    use tempfile::TempDir;

    fn manifest(resources: Vec<ResourceSpec>) -> Manifest {
        Manifest {
            project: ProjectConfig {
                name: String::from("bi-platform"),
                environment: String::from("dev"),
            },
            state: StateConfig {
                backend: StateBackend::Local,
                bucket: None,
                prefix: None,
                region: None,
                path: None,
            },
            provider: ProviderConfig {
                endpoint: String::from("https://provider.internal/api"),
                timeout_secs: 30,
            },
            apply: ApplyConfig {
                max_parallel: 4,
                max_attempts: 1,
                retry_base_ms: 1,
            },
            resources,
        }
    }

    fn specs() -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new("platform-vpc", "network")
                .with_property("cidr", serde_json::json!("10.1.0.0/19")),
            ResourceSpec::new("platform-sg", "security-group")
                .with_dependency("platform-vpc")
                .with_property("port", serde_json::json!(5432)),
        ]
    }

    fn reconciler_with(
        resources: Vec<ResourceSpec>,
        provider: MockProviderApi,
    ) -> (Reconciler, Arc<LocalStateStore>, TempDir) {
        let temp = TempDir::new().expect("temp dir");
        let store = Arc::new(LocalStateStore::with_base_dir(temp.path()));
        let reconciler = Reconciler::new(
            manifest(resources),
            Arc::new(provider),
            Arc::clone(&store) as Arc<dyn StateStore>,
        );
        (reconciler, store, temp)
    }

    #[tokio::test]
    async fn test_plan_then_apply_then_replan_is_empty() {
        let mut provider = MockProviderApi::new();
        provider
            .expect_create()
            .times(2)
            .returning(|request| Ok(format!("ext-{}", request.resource_id)));

        let (reconciler, store, _temp) = reconciler_with(specs(), provider);

        let plan = reconciler.plan().await.expect("plan");
        assert_eq!(plan.action_count(), 2);
        assert_eq!(plan.actions[0].resource_id, "platform-vpc");
        assert_eq!(plan.actions[1].resource_id, "platform-sg");

        let report = reconciler.apply(plan).await.expect("apply");
        assert!(report.all_successful());

        let snapshot = store.load().await.expect("load");
        assert_eq!(snapshot.len(), 2);
        assert!(
            snapshot
                .values()
                .all(|s| s.status == ResourceStatus::Applied)
        );

        // A second plan against the same manifest has nothing to do
        let replan = reconciler.plan().await.expect("replan");
        assert!(replan.is_empty());
    }

    #[tokio::test]
    async fn test_apply_releases_lock() {
        let mut provider = MockProviderApi::new();
        provider
            .expect_create()
            .returning(|request| Ok(format!("ext-{}", request.resource_id)));

        let (reconciler, store, _temp) = reconciler_with(specs(), provider);

        let plan = reconciler.plan().await.expect("plan");
        reconciler.apply(plan).await.expect("apply");

        assert!(!store.is_locked().await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_destroy_plan_reverses_chain() {
        let mut provider = MockProviderApi::new();
        provider
            .expect_create()
            .returning(|request| Ok(format!("ext-{}", request.resource_id)));
        provider.expect_delete().times(2).returning(|_| Ok(()));

        let (reconciler, store, _temp) = reconciler_with(specs(), provider);

        let plan = reconciler.plan().await.expect("plan");
        reconciler.apply(plan).await.expect("apply");

        let destroy = reconciler.destroy_plan().await.expect("destroy plan");
        let order: Vec<&str> = destroy
            .actions
            .iter()
            .map(|a| a.resource_id.as_str())
            .collect();
        assert_eq!(order, vec!["platform-sg", "platform-vpc"]);

        let report = reconciler.apply(destroy).await.expect("apply destroy");
        assert!(report.all_successful());

        let snapshot = store.load().await.expect("load");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_update_flow() {
        let mut provider = MockProviderApi::new();
        provider
            .expect_create()
            .returning(|request| Ok(format!("ext-{}", request.resource_id)));

        let (reconciler, store, _temp) = reconciler_with(specs(), provider);

        let plan = reconciler.plan().await.expect("plan");
        reconciler.apply(plan).await.expect("apply");

        // Same resources with a changed security-group property
        let mut changed = specs();
        changed[1] = ResourceSpec::new("platform-sg", "security-group")
            .with_dependency("platform-vpc")
            .with_property("port", serde_json::json!(5433));

        let mut provider2 = MockProviderApi::new();
        provider2.expect_update().times(1).returning(|_| Ok(()));

        let reconciler2 = Reconciler::new(
            manifest(changed),
            Arc::new(provider2),
            Arc::clone(&store) as Arc<dyn StateStore>,
        );

        let plan = reconciler2.plan().await.expect("plan");
        assert_eq!(plan.action_count(), 1);
        assert_eq!(plan.update_count(), 1);

        let report = reconciler2.apply(plan).await.expect("apply");
        assert!(report.all_successful());

        let snapshot = store.load().await.expect("load");
        let sg = snapshot.get("platform-sg").expect("recorded");
        let mut expected = Properties::new();
        expected.insert(String::from("port"), serde_json::json!(5433));
        assert_eq!(sg.properties, expected);
    }
}
