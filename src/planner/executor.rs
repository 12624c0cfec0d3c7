//! Plan executor.
//!
//! The executor is a dataflow scheduler over the plan's dependency edges:
//! an action is dispatched once every action it waits for has succeeded,
//! up to a bounded number of in-flight provider calls. Transient provider
//! failures are retried with exponential backoff under a stable idempotency
//! token; permanent failures cascade `Skipped` to all transitive dependents.
//! Every confirmed success is committed to the state store immediately, so
//! partial progress survives later failures. A state-store commit failure is
//! fatal: dispatch stops and the run surfaces the error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ApplyConfig;
use crate::error::{GroundplanError, ProviderError, Result};
use crate::provider::{CreateRequest, DeleteRequest, ProviderApi, UpdateRequest};
use crate::state::{ResourceState, StateStore};

use super::plan::{Action, ActionOp, Plan};

/// Cap on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Tuning for plan execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionOptions {
    /// Upper bound on concurrently in-flight provider calls.
    pub max_parallel: usize,
    /// Maximum attempts per action (first try plus retries).
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub retry_base: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from(ApplyConfig::default())
    }
}

impl From<ApplyConfig> for ExecutionOptions {
    fn from(config: ApplyConfig) -> Self {
        Self {
            max_parallel: config.max_parallel.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
        }
    }
}

/// Run-level cancellation signal.
///
/// Cancelling stops dispatch of new actions immediately; in-flight provider
/// calls are allowed to complete and their results are still committed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true if cancellation was signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Completes once cancellation is signalled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Terminal result of a single action.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Resource identifier.
    pub resource_id: String,
    /// Operation that was attempted.
    pub op: ActionOp,
    /// Terminal outcome.
    pub outcome: ActionOutcome,
    /// Provider attempts made (0 when no call was needed).
    pub attempts: u32,
}

/// Outcome of a single action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Provider confirmed the action.
    Succeeded {
        /// External id after the action (absent after deletes).
        external_id: Option<String>,
    },
    /// Provider rejected the action permanently or retries were exhausted.
    Failed {
        /// Failure description.
        reason: String,
    },
    /// Not attempted because an upstream action did not succeed.
    Skipped {
        /// Resource id of the upstream failure, or "run cancelled".
        due_to: String,
    },
}

impl ActionOutcome {
    /// Returns true for a confirmed success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    /// Total actions in the plan.
    pub total: usize,
    /// Actions confirmed by the provider.
    pub succeeded: usize,
    /// Actions that failed permanently.
    pub failed: usize,
    /// Actions skipped due to upstream failure or cancellation.
    pub skipped: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl ExecutionSummary {
    /// Returns true if every action succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

impl std::fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} succeeded, {} failed, {} skipped",
            self.total, self.succeeded, self.failed, self.skipped
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Handle to an in-progress run.
///
/// Results arrive incrementally, one per action; the summary (or a fatal
/// error) is available once the run ends.
#[derive(Debug)]
pub struct ExecutionHandle {
    receiver: mpsc::Receiver<ExecutionResult>,
    join: JoinHandle<Result<ExecutionSummary>>,
    cancel: CancelToken,
}

impl ExecutionHandle {
    /// Receives the next terminal action result.
    ///
    /// Returns `None` once every result has been delivered.
    pub async fn next_result(&mut self) -> Option<ExecutionResult> {
        self.receiver.recv().await
    }

    /// Returns a clonable cancellation token for this run.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Signals cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains remaining results and returns the run summary.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the run halted on a state-store failure.
    pub async fn finish(self) -> Result<ExecutionSummary> {
        let Self {
            mut receiver, join, ..
        } = self;

        while receiver.recv().await.is_some() {}

        join.await
            .map_err(|e| GroundplanError::internal(format!("executor task failed: {e}")))?
    }
}

/// Executor for plans.
pub struct Executor {
    /// Provider API.
    provider: Arc<dyn ProviderApi>,
    /// State store for incremental commits.
    store: Arc<dyn StateStore>,
    /// Execution tuning.
    options: ExecutionOptions,
}

impl Executor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderApi>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            store,
            options: ExecutionOptions::default(),
        }
    }

    /// Sets the execution options.
    #[must_use]
    pub const fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts applying a plan, returning a handle for incremental results.
    #[must_use]
    pub fn apply(&self, plan: Plan) -> ExecutionHandle {
        let (tx, rx) = mpsc::channel(plan.actions.len().max(1));
        let cancel = CancelToken::new();

        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let options = self.options;
        let cancel_inner = cancel.clone();

        let join =
            tokio::spawn(
                async move { run_plan(provider, store, options, cancel_inner, tx, plan).await },
            );

        ExecutionHandle {
            receiver: rx,
            join,
            cancel,
        }
    }
}

/// Terminal state tracked per action during scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Succeeded,
    Failed,
    Skipped,
}

/// Runs the dataflow scheduler for one plan.
async fn run_plan(
    provider: Arc<dyn ProviderApi>,
    store: Arc<dyn StateStore>,
    options: ExecutionOptions,
    cancel: CancelToken,
    tx: mpsc::Sender<ExecutionResult>,
    plan: Plan,
) -> Result<ExecutionSummary> {
    let actions = plan.actions;
    let total = actions.len();

    info!("Executing plan with {total} actions (max_parallel={})", options.max_parallel);

    let mut terminal: Vec<Option<Terminal>> = vec![None; total];
    let mut dispatched: Vec<bool> = vec![false; total];
    let mut in_flight: JoinSet<(usize, ActionOutcome, u32)> = JoinSet::new();
    let mut summary = ExecutionSummary {
        total,
        ..ExecutionSummary::default()
    };
    let mut fatal: Option<GroundplanError> = None;
    let mut completed = 0usize;

    while completed < total {
        // Resolve skips and dispatch every runnable action.
        let mut progressed = true;
        while progressed {
            progressed = false;

            for idx in 0..total {
                if terminal[idx].is_some() || dispatched[idx] {
                    continue;
                }

                if cancel.is_cancelled() {
                    terminal[idx] = Some(Terminal::Skipped);
                    summary.skipped += 1;
                    completed += 1;
                    emit(
                        &tx,
                        &actions[idx],
                        ActionOutcome::Skipped {
                            due_to: String::from("run cancelled"),
                        },
                        0,
                    )
                    .await;
                    progressed = true;
                    continue;
                }

                let mut blocked = false;
                let mut failed_dep: Option<usize> = None;
                for &dep in &actions[idx].wait_for {
                    match terminal[dep] {
                        Some(Terminal::Succeeded) => {}
                        Some(_) => {
                            failed_dep = Some(dep);
                            break;
                        }
                        None => blocked = true,
                    }
                }

                if let Some(dep) = failed_dep {
                    let due_to = actions[dep].resource_id.clone();
                    warn!(
                        "Skipping {} due to upstream failure of {due_to}",
                        actions[idx].resource_id
                    );
                    terminal[idx] = Some(Terminal::Skipped);
                    summary.skipped += 1;
                    completed += 1;
                    emit(&tx, &actions[idx], ActionOutcome::Skipped { due_to }, 0).await;
                    progressed = true;
                    continue;
                }

                if blocked || in_flight.len() >= options.max_parallel {
                    continue;
                }

                dispatched[idx] = true;
                let provider = Arc::clone(&provider);
                let action = actions[idx].clone();
                in_flight.spawn(async move {
                    let (outcome, attempts) = run_action(provider.as_ref(), &action, options).await;
                    (idx, outcome, attempts)
                });
                progressed = true;
            }
        }

        if completed >= total {
            break;
        }

        if in_flight.is_empty() {
            // Nothing runnable and nothing running. Reachable only after a
            // worker task was lost; surface whatever error caused it.
            return Err(fatal.take().unwrap_or_else(|| {
                GroundplanError::internal("execution stalled: no runnable actions")
            }));
        }

        // Wait for a completion, or for cancellation to re-enter dispatch.
        let joined = if cancel.is_cancelled() {
            in_flight.join_next().await
        } else {
            tokio::select! {
                joined = in_flight.join_next() => joined,
                () = cancel.cancelled() => None,
            }
        };

        let Some(join_result) = joined else {
            continue;
        };

        match join_result {
            Ok((idx, outcome, attempts)) => {
                if let Err(store_err) = commit(store.as_ref(), &actions[idx], &outcome).await {
                    error!(
                        "State commit failed for {}: {store_err}",
                        actions[idx].resource_id
                    );
                    if fatal.is_none() {
                        fatal = Some(store_err);
                    }
                    cancel.cancel();
                }

                terminal[idx] = Some(match &outcome {
                    ActionOutcome::Succeeded { .. } => {
                        summary.succeeded += 1;
                        Terminal::Succeeded
                    }
                    ActionOutcome::Failed { .. } => {
                        summary.failed += 1;
                        Terminal::Failed
                    }
                    ActionOutcome::Skipped { .. } => {
                        summary.skipped += 1;
                        Terminal::Skipped
                    }
                });
                completed += 1;
                emit(&tx, &actions[idx], outcome, attempts).await;
            }
            Err(join_err) => {
                error!("Action task failed: {join_err}");
                if fatal.is_none() {
                    fatal = Some(GroundplanError::internal(format!(
                        "action task failed: {join_err}"
                    )));
                }
                cancel.cancel();
            }
        }
    }

    if let Some(err) = fatal {
        return Err(err);
    }

    summary.cancelled = cancel.is_cancelled();
    info!("{summary}");
    Ok(summary)
}

/// Sends a result to the observer, ignoring a dropped receiver.
async fn emit(
    tx: &mpsc::Sender<ExecutionResult>,
    action: &Action,
    outcome: ActionOutcome,
    attempts: u32,
) {
    let result = ExecutionResult {
        resource_id: action.resource_id.clone(),
        op: action.op,
        outcome,
        attempts,
    };
    let _ = tx.send(result).await;
}

/// Runs one action against the provider with bounded retries.
///
/// The idempotency token is generated once and reused across retries, so a
/// retried call has no duplicate effect.
async fn run_action(
    provider: &dyn ProviderApi,
    action: &Action,
    options: ExecutionOptions,
) -> (ActionOutcome, u32) {
    // Deleting a resource with no recorded external id is a no-op.
    if action.op == ActionOp::Delete && action.external_id().is_none() {
        debug!(
            "No external id recorded for {}, considering delete successful",
            action.resource_id
        );
        return (ActionOutcome::Succeeded { external_id: None }, 0);
    }

    let token = Uuid::new_v4().to_string();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = call_provider(provider, action, &token).await;

        match result {
            Ok(external_id) => {
                info!("{} succeeded (attempt {attempt})", action.description());
                return (ActionOutcome::Succeeded { external_id }, attempt);
            }
            Err(e) if e.is_retryable() && attempt < options.max_attempts => {
                let delay = backoff_delay(options.retry_base, attempt);
                warn!(
                    "{} failed transiently (attempt {attempt}): {e}; retrying in {delay:?}",
                    action.description()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("{} failed (attempt {attempt}): {e}", action.description());
                return (
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    },
                    attempt,
                );
            }
        }
    }
}

/// Issues the provider call for an action.
async fn call_provider(
    provider: &dyn ProviderApi,
    action: &Action,
    token: &str,
) -> Result<Option<String>> {
    match action.op {
        ActionOp::Create => {
            let external_id = provider
                .create(CreateRequest {
                    resource_id: action.resource_id.clone(),
                    kind: action.kind.clone(),
                    properties: action.properties.clone(),
                    idempotency_token: token.to_string(),
                })
                .await?;
            Ok(Some(external_id))
        }
        ActionOp::Update => {
            let Some(external_id) = action.external_id() else {
                return Err(GroundplanError::internal(format!(
                    "no external id recorded for update of {}",
                    action.resource_id
                )));
            };
            provider
                .update(UpdateRequest {
                    external_id: external_id.to_string(),
                    kind: action.kind.clone(),
                    properties: action.properties.clone(),
                    idempotency_token: token.to_string(),
                })
                .await?;
            Ok(Some(external_id.to_string()))
        }
        ActionOp::Delete => {
            let Some(external_id) = action.external_id() else {
                return Ok(None);
            };
            let result = provider
                .delete(DeleteRequest {
                    external_id: external_id.to_string(),
                    kind: action.kind.clone(),
                    idempotency_token: token.to_string(),
                })
                .await;

            match result {
                Ok(()) => Ok(None),
                Err(GroundplanError::Provider(ProviderError::NotFound { .. })) => {
                    debug!("Resource {} was already deleted", action.resource_id);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Commits a terminal outcome to the state store.
///
/// State is only written after a confirmed provider response: successes
/// record the applied entry (or remove it for deletes); permanent failures
/// on existing resources mark the recorded entry failed without touching
/// the last-applied properties; failed creates write nothing.
async fn commit(store: &dyn StateStore, action: &Action, outcome: &ActionOutcome) -> Result<()> {
    match (action.op, outcome) {
        (ActionOp::Create, ActionOutcome::Succeeded { external_id }) => {
            let external_id = external_id.clone().ok_or_else(|| {
                GroundplanError::internal(format!(
                    "create of {} succeeded without an external id",
                    action.resource_id
                ))
            })?;
            store
                .save(&ResourceState::applied(
                    &action.resource_id,
                    &action.kind,
                    action.properties.clone(),
                    external_id,
                    action.depends_on.clone(),
                ))
                .await
        }
        (ActionOp::Update, ActionOutcome::Succeeded { .. }) => match &action.prior {
            Some(prior) => {
                store
                    .save(
                        &prior
                            .clone()
                            .updated(action.properties.clone(), action.depends_on.clone()),
                    )
                    .await
            }
            None => Ok(()),
        },
        (ActionOp::Delete, ActionOutcome::Succeeded { .. }) => {
            store.delete(&action.resource_id).await
        }
        (ActionOp::Update | ActionOp::Delete, ActionOutcome::Failed { .. }) => {
            match &action.prior {
                Some(prior) => store.save(&prior.clone().failed()).await,
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// Exponential backoff with a cap.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(64);
    (base * factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use crate::provider::MockProviderApi;
    use crate::state::{LocalStateStore, ResourceStatus};
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    fn props(value: &str) -> Properties {
        let mut p = Properties::new();
        p.insert(String::from("value"), serde_json::json!(value));
        p
    }

    fn create_action(id: &str, wait_for: Vec<usize>) -> Action {
        Action {
            op: ActionOp::Create,
            resource_id: id.to_string(),
            kind: String::from("network"),
            properties: props("v1"),
            depends_on: vec![],
            prior: None,
            wait_for,
            reason: String::from("Resource declared in manifest"),
        }
    }

    fn plan_of(actions: Vec<Action>) -> Plan {
        Plan {
            created_at: chrono::Utc::now(),
            manifest_hash: String::from("hash"),
            actions,
        }
    }

    fn test_store() -> (Arc<LocalStateStore>, TempDir) {
        let temp = TempDir::new().expect("temp dir");
        (Arc::new(LocalStateStore::with_base_dir(temp.path())), temp)
    }

    fn fast_options() -> ExecutionOptions {
        ExecutionOptions {
            max_parallel: 4,
            max_attempts: 3,
            retry_base: Duration::from_millis(1),
        }
    }

    async fn collect(mut handle: ExecutionHandle) -> (Vec<ExecutionResult>, Result<ExecutionSummary>) {
        let mut results = Vec::new();
        while let Some(result) = handle.next_result().await {
            results.push(result);
        }
        let summary = handle.finish().await;
        (results, summary)
    }

    #[tokio::test]
    async fn test_apply_chain_commits_state() {
        let mut provider = MockProviderApi::new();
        provider
            .expect_create()
            .times(2)
            .returning(|request| Ok(format!("ext-{}", request.resource_id)));

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), Arc::clone(&store) as Arc<dyn StateStore>)
            .with_options(fast_options());

        let mut second = create_action("sg", vec![0]);
        second.depends_on = vec![String::from("vpc")];
        let plan = plan_of(vec![create_action("vpc", vec![]), second]);

        let (results, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");

        assert_eq!(summary.succeeded, 2);
        assert!(summary.all_successful());
        assert_eq!(results.len(), 2);

        let snapshot = store.load().await.expect("load");
        assert_eq!(snapshot.len(), 2);
        let vpc = snapshot.get("vpc").expect("vpc recorded");
        assert_eq!(vpc.external_id.as_deref(), Some("ext-vpc"));
        assert_eq!(vpc.status, ResourceStatus::Applied);
        let sg = snapshot.get("sg").expect("sg recorded");
        assert_eq!(sg.dependencies, vec!["vpc"]);
    }

    #[tokio::test]
    async fn test_dependency_order_respected() {
        let mut provider = MockProviderApi::new();
        let order: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        provider.expect_create().times(2).returning(move |request| {
            order_clone
                .lock()
                .expect("lock")
                .push(request.resource_id.clone());
            Ok(format!("ext-{}", request.resource_id))
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(fast_options());

        let plan = plan_of(vec![
            create_action("vpc", vec![]),
            create_action("cluster", vec![0]),
        ]);

        let (_, summary) = collect(executor.apply(plan)).await;
        summary.expect("summary");

        let recorded = order.lock().expect("lock").clone();
        assert_eq!(recorded, vec!["vpc", "cluster"]);
    }

    #[tokio::test]
    async fn test_partial_failure_preserves_independent_successes() {
        let mut provider = MockProviderApi::new();
        provider.expect_create().returning(|request| {
            if request.resource_id == "bad" {
                Err(GroundplanError::Provider(ProviderError::ValidationRejected {
                    message: String::from("invalid properties"),
                }))
            } else {
                Ok(format!("ext-{}", request.resource_id))
            }
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), Arc::clone(&store) as Arc<dyn StateStore>)
            .with_options(fast_options());

        let plan = plan_of(vec![
            create_action("first", vec![]),
            create_action("bad", vec![]),
            create_action("third", vec![]),
        ]);

        let (results, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(results.len(), 3);

        let snapshot = store.load().await.expect("load");
        assert!(snapshot.contains_key("first"));
        assert!(snapshot.contains_key("third"));
        // Failed creates record nothing
        assert!(!snapshot.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_failure_cascades_skipped_to_dependents() {
        let mut provider = MockProviderApi::new();
        provider.expect_create().returning(|request| {
            if request.resource_id == "vpc" {
                Err(GroundplanError::Provider(ProviderError::ValidationRejected {
                    message: String::from("rejected"),
                }))
            } else {
                Ok(format!("ext-{}", request.resource_id))
            }
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(fast_options());

        // vpc <- sg <- cluster, all waiting on their predecessor
        let plan = plan_of(vec![
            create_action("vpc", vec![]),
            create_action("sg", vec![0]),
            create_action("cluster", vec![1]),
        ]);

        let (results, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);

        let sg = results
            .iter()
            .find(|r| r.resource_id == "sg")
            .expect("sg result");
        match &sg.outcome {
            ActionOutcome::Skipped { due_to } => assert_eq!(due_to, "vpc"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let cluster = results
            .iter()
            .find(|r| r.resource_id == "cluster")
            .expect("cluster result");
        match &cluster.outcome {
            ActionOutcome::Skipped { due_to } => assert_eq!(due_to, "sg"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_retried_with_same_token() {
        let mut provider = MockProviderApi::new();
        let calls = Arc::new(AtomicU32::new(0));
        let tokens: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        let calls_clone = Arc::clone(&calls);
        let tokens_clone = Arc::clone(&tokens);
        provider.expect_create().times(3).returning(move |request| {
            tokens_clone
                .lock()
                .expect("lock")
                .push(request.idempotency_token.clone());
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(GroundplanError::Provider(ProviderError::network(
                    "connection reset",
                )))
            } else {
                Ok(String::from("ext-vpc"))
            }
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(fast_options());

        let plan = plan_of(vec![create_action("vpc", vec![])]);
        let (results, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");

        assert_eq!(summary.succeeded, 1);
        assert_eq!(results[0].attempts, 3);

        let seen = tokens.lock().expect("lock").clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|t| t == &seen[0]));
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails() {
        let mut provider = MockProviderApi::new();
        provider.expect_create().times(3).returning(|_| {
            Err(GroundplanError::Provider(ProviderError::network(
                "connection reset",
            )))
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(fast_options());

        let plan = plan_of(vec![create_action("vpc", vec![])]);
        let (results, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");

        assert_eq!(summary.failed, 1);
        assert_eq!(results[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_delete_of_missing_external_id_is_noop() {
        let provider = MockProviderApi::new();

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(fast_options());

        let plan = plan_of(vec![Action {
            op: ActionOp::Delete,
            resource_id: String::from("ghost"),
            kind: String::from("network"),
            properties: Properties::new(),
            depends_on: vec![],
            prior: None,
            wait_for: vec![],
            reason: String::from("Resource removed from manifest"),
        }]);

        let (results, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");

        assert_eq!(summary.succeeded, 1);
        assert_eq!(results[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_delete_commits_removal() {
        let mut provider = MockProviderApi::new();
        provider.expect_delete().times(1).returning(|_| Ok(()));

        let (store, _temp) = test_store();

        let prior = ResourceState::applied(
            "old",
            "network",
            props("v1"),
            String::from("ext-old"),
            vec![],
        );
        store.save(&prior).await.expect("seed state");

        let executor = Executor::new(Arc::new(provider), Arc::clone(&store) as Arc<dyn StateStore>)
            .with_options(fast_options());

        let plan = plan_of(vec![Action {
            op: ActionOp::Delete,
            resource_id: String::from("old"),
            kind: String::from("network"),
            properties: Properties::new(),
            depends_on: vec![],
            prior: Some(prior),
            wait_for: vec![],
            reason: String::from("Resource removed from manifest"),
        }]);

        let (_, summary) = collect(executor.apply(plan)).await;
        summary.expect("summary");

        let snapshot = store.load().await.expect("load");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_marks_entry_failed() {
        let mut provider = MockProviderApi::new();
        provider.expect_update().times(1).returning(|_| {
            Err(GroundplanError::Provider(ProviderError::ValidationRejected {
                message: String::from("rejected"),
            }))
        });

        let (store, _temp) = test_store();

        let prior = ResourceState::applied(
            "vpc",
            "network",
            props("v1"),
            String::from("ext-vpc"),
            vec![],
        );
        store.save(&prior).await.expect("seed state");

        let executor = Executor::new(Arc::new(provider), Arc::clone(&store) as Arc<dyn StateStore>)
            .with_options(fast_options());

        let plan = plan_of(vec![Action {
            op: ActionOp::Update,
            resource_id: String::from("vpc"),
            kind: String::from("network"),
            properties: props("v2"),
            depends_on: vec![],
            prior: Some(prior),
            wait_for: vec![],
            reason: String::from("1 properties changed"),
        }]);

        let (_, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");
        assert_eq!(summary.failed, 1);

        let snapshot = store.load().await.expect("load");
        let vpc = snapshot.get("vpc").expect("entry kept");
        assert_eq!(vpc.status, ResourceStatus::Failed);
        // Last-applied properties are untouched
        assert_eq!(vpc.properties, props("v1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_parallel_bounds_in_flight_calls() {
        let mut provider = MockProviderApi::new();
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let in_flight_clone = Arc::clone(&in_flight);
        let peak_clone = Arc::clone(&peak);
        provider.expect_create().times(6).returning(move |request| {
            let now = in_flight_clone.fetch_add(1, Ordering::SeqCst) + 1;
            peak_clone.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            in_flight_clone.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("ext-{}", request.resource_id))
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(ExecutionOptions {
            max_parallel: 2,
            max_attempts: 1,
            retry_base: Duration::from_millis(1),
        });

        let plan = plan_of(
            (0..6)
                .map(|i| create_action(&format!("res-{i}"), vec![]))
                .collect(),
        );

        let (_, summary) = collect(executor.apply(plan)).await;
        let summary = summary.expect("summary");
        assert_eq!(summary.succeeded, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_skips_undispatched_actions() {
        let mut provider = MockProviderApi::new();
        provider.expect_create().returning(|request| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(format!("ext-{}", request.resource_id))
        });

        let (store, _temp) = test_store();
        let executor = Executor::new(Arc::new(provider), store).with_options(ExecutionOptions {
            max_parallel: 1,
            max_attempts: 1,
            retry_base: Duration::from_millis(1),
        });

        // Chain so only the first action is dispatched initially
        let plan = plan_of(vec![
            create_action("a", vec![]),
            create_action("b", vec![0]),
            create_action("c", vec![1]),
        ]);

        let mut handle = executor.apply(plan);
        handle.cancel();

        let mut results = Vec::new();
        while let Some(result) = handle.next_result().await {
            results.push(result);
        }
        let summary = handle.finish().await.expect("summary");

        assert!(summary.cancelled);
        assert_eq!(results.len(), 3);
        // In-flight work completes; nothing new is dispatched
        assert!(summary.succeeded <= 1);
        assert!(summary.skipped >= 2);
    }
}
