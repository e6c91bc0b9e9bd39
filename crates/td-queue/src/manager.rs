use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use td_bridge::event_bus::EventSink;
use td_bridge::protocol::{
    BreakerChangedPayload, QueueEvent, QueueStatusPayload, TaskMovedPayload,
};
use td_core::limits::{resolve, EffectiveSettings, WorkflowDefaults, WorkspaceOverrides};
use td_core::phase::validate_transition;
use td_core::types::{FailureCategory, ModelRef, Task, TaskPhase, TransitionActor};
use td_harness::breaker::{BreakerKey, ExecutionBreaker};
use td_harness::shutdown::ShutdownSignal;

use crate::invoker::{ExecutionHandle, ExecutionInvoker, ExecutionOutcome, InvokerError};
use crate::repository::{RepositoryError, TaskRepository};
use crate::status::{QueueStatus, WorkflowSettingsView};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("invoker error: {0}")]
    Invoker(#[from] InvokerError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

// ---------------------------------------------------------------------------
// TickOutcome
// ---------------------------------------------------------------------------

/// What a single tick did. At most one task-moving operation per tick so
/// every decision stays auditable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Automation is off for this workspace.
    Disabled,
    /// Nothing was eligible; safe to repeat arbitrarily often.
    Idle,
    /// A backlog task was promoted to ready.
    Promoted(Uuid),
    /// A ready task was dispatched into execution.
    Dispatched(Uuid),
    /// Dispatch failed (and the bounded retry also failed or found no
    /// other candidate); the failure is on the breaker.
    DispatchFailed {
        task_id: Uuid,
        category: FailureCategory,
    },
}

// ---------------------------------------------------------------------------
// Per-workspace state
// ---------------------------------------------------------------------------

struct WorkspaceState {
    enabled: AtomicBool,
    overrides: std::sync::Mutex<WorkspaceOverrides>,
    current_task: std::sync::Mutex<Option<Uuid>>,
    /// Serializes ticks: a new tick may not begin while a previous tick's
    /// decision is still being applied.
    tick_lock: tokio::sync::Mutex<()>,
}

impl WorkspaceState {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            overrides: std::sync::Mutex::new(WorkspaceOverrides::default()),
            current_task: std::sync::Mutex::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn overrides(&self) -> WorkspaceOverrides {
        self.overrides.lock().expect("overrides lock poisoned").clone()
    }

    fn current_task(&self) -> Option<Uuid> {
        *self.current_task.lock().expect("current_task lock poisoned")
    }

    fn set_current_task(&self, task: Option<Uuid>) {
        *self.current_task.lock().expect("current_task lock poisoned") = task;
    }
}

// ---------------------------------------------------------------------------
// QueueManager
// ---------------------------------------------------------------------------

/// The orchestrator: one automation loop per workspace, consulting the
/// phase state machine, the WIP resolver, and the execution breaker to
/// decide the next legal action.
///
/// Cheap to clone; all clones share state through an `Arc`.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

struct Inner {
    repo: Arc<dyn TaskRepository>,
    invoker: Arc<dyn ExecutionInvoker>,
    breaker: Arc<ExecutionBreaker>,
    sink: Arc<dyn EventSink>,
    defaults: WorkflowDefaults,
    shutdown: ShutdownSignal,
    workspaces: DashMap<String, Arc<WorkspaceState>>,
}

impl QueueManager {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        invoker: Arc<dyn ExecutionInvoker>,
        breaker: Arc<ExecutionBreaker>,
        sink: Arc<dyn EventSink>,
        defaults: WorkflowDefaults,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                invoker,
                breaker,
                sink,
                defaults,
                shutdown: ShutdownSignal::new(),
                workspaces: DashMap::new(),
            }),
        }
    }

    /// Handle for stopping all workspace loops.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.inner.shutdown.clone()
    }

    fn workspace(&self, workspace_id: &str) -> Arc<WorkspaceState> {
        self.inner
            .workspaces
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(WorkspaceState::new()))
            .clone()
    }

    // ------------------------------------------------------------------
    // Exposed API
    // ------------------------------------------------------------------

    /// Recompute the read model from the repository and live breaker state.
    pub async fn get_queue_status(&self, workspace_id: &str) -> Result<QueueStatus> {
        let state = self.workspace(workspace_id);
        let ready = self
            .inner
            .repo
            .tasks_by_phase(workspace_id, TaskPhase::Ready)
            .await?;
        let executing = self
            .inner
            .repo
            .tasks_by_phase(workspace_id, TaskPhase::Executing)
            .await?;
        Ok(QueueStatus {
            workspace_id: workspace_id.to_string(),
            enabled: state.enabled.load(Ordering::Relaxed),
            current_task_id: state.current_task(),
            tasks_in_ready: ready.len(),
            tasks_in_executing: executing.len(),
            execution_breakers: self.inner.breaker.open_breakers(),
        })
    }

    /// Enable automation for the workspace.
    pub async fn start_queue(&self, workspace_id: &str) -> Result<QueueStatus> {
        let state = self.workspace(workspace_id);
        state.enabled.store(true, Ordering::Relaxed);
        info!(workspace_id, "queue automation enabled");
        let status = self.get_queue_status(workspace_id).await?;
        self.publish_status(workspace_id, &status);
        Ok(status)
    }

    /// Disable automation. Only suppresses future automatic moves; an
    /// already-dispatched execution runs to completion.
    pub async fn stop_queue(&self, workspace_id: &str) -> Result<QueueStatus> {
        let state = self.workspace(workspace_id);
        state.enabled.store(false, Ordering::Relaxed);
        info!(workspace_id, "queue automation disabled");
        let status = self.get_queue_status(workspace_id).await?;
        self.publish_status(workspace_id, &status);
        Ok(status)
    }

    /// The three settings layers side by side.
    pub fn get_workflow_settings(&self, workspace_id: &str) -> WorkflowSettingsView {
        let overrides = self.workspace(workspace_id).overrides();
        WorkflowSettingsView {
            effective: resolve(&self.inner.defaults, &overrides),
            overrides,
            global_defaults: self.inner.defaults.clone(),
        }
    }

    /// Replace the workspace override layer. Takes effect on the next
    /// resolve; never moves tasks retroactively.
    pub fn set_overrides(&self, workspace_id: &str, overrides: WorkspaceOverrides) {
        let state = self.workspace(workspace_id);
        *state.overrides.lock().expect("overrides lock poisoned") = overrides;
        debug!(workspace_id, "workspace overrides replaced");
    }

    /// Forward a user-initiated stop for an in-flight task. Distinct from
    /// pausing automation.
    pub async fn stop_task(&self, _workspace_id: &str, task_id: Uuid) -> Result<()> {
        self.inner.invoker.stop(task_id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Automation loop
    // ------------------------------------------------------------------

    /// Spawn the workspace's automation loop: one tick per interval until
    /// the shutdown signal fires. Loops across workspaces share nothing
    /// but the repository and the breaker.
    pub fn spawn_loop(
        &self,
        workspace_id: impl Into<String>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let workspace_id = workspace_id.into();
        let manager = self.clone();
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(workspace_id = %workspace_id, "automation loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(workspace_id = %workspace_id, "automation loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.tick(&workspace_id).await {
                            // Transient by taxonomy: the tick aborted
                            // without partial state change, retry next tick.
                            warn!(workspace_id = %workspace_id, error = %e, "tick failed");
                        }
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one evaluation cycle for the workspace.
    ///
    /// Priority order: backlog->ready promotion, then ready->executing
    /// dispatch. Performs at most one task-moving operation, checks WIP
    /// capacity against fresh repository counts, and is an idempotent
    /// no-op when nothing is eligible.
    pub async fn tick(&self, workspace_id: &str) -> Result<TickOutcome> {
        let state = self.workspace(workspace_id);
        let _tick_guard = state.tick_lock.lock().await;

        if !state.enabled.load(Ordering::Relaxed) {
            return Ok(TickOutcome::Disabled);
        }

        // Resolved fresh every tick so settings changes apply immediately.
        let effective = resolve(&self.inner.defaults, &state.overrides());

        if effective.backlog_to_ready {
            if let Some(outcome) = self.try_promote(workspace_id, &effective).await? {
                return Ok(outcome);
            }
        }

        if effective.ready_to_executing {
            if let Some(outcome) = self.try_dispatch(workspace_id, &state, &effective).await? {
                return Ok(outcome);
            }
        }

        Ok(TickOutcome::Idle)
    }

    /// Step 2: promote the lowest-order eligible backlog task into ready.
    async fn try_promote(
        &self,
        workspace_id: &str,
        effective: &EffectiveSettings,
    ) -> Result<Option<TickOutcome>> {
        let ready = self
            .inner
            .repo
            .tasks_by_phase(workspace_id, TaskPhase::Ready)
            .await?;
        if !effective.has_capacity(TaskPhase::Ready, ready.len()) {
            return Ok(None);
        }

        let backlog = self
            .inner
            .repo
            .tasks_by_phase(workspace_id, TaskPhase::Backlog)
            .await?;

        for task in backlog {
            if task.is_blocked() || !task.plan_ready {
                continue;
            }
            match validate_transition(&task, TaskPhase::Ready) {
                Ok(()) => {
                    let updated = self
                        .inner
                        .repo
                        .apply_transition(task.id, TaskPhase::Ready, TransitionActor::System, None)
                        .await?;
                    if task.validation_error.is_some() {
                        self.inner.repo.set_validation_error(task.id, None).await?;
                    }
                    info!(
                        workspace_id,
                        task_id = %task.id,
                        order = task.order,
                        "task auto-promoted to ready"
                    );
                    self.publish_moved(workspace_id, &task, &updated, None);
                    return Ok(Some(TickOutcome::Promoted(task.id)));
                }
                Err(rejection) => {
                    // Data-quality issue, not provider health: attach it to
                    // the task and keep scanning.
                    debug!(
                        workspace_id,
                        task_id = %task.id,
                        reason = %rejection,
                        "promotion rejected"
                    );
                    self.inner
                        .repo
                        .set_validation_error(task.id, Some(rejection.to_string()))
                        .await?;
                }
            }
        }
        Ok(None)
    }

    /// Steps 3-4: dispatch the best ready task whose breaker allows it,
    /// with one bounded retry after a categorized dispatch failure.
    async fn try_dispatch(
        &self,
        workspace_id: &str,
        state: &WorkspaceState,
        effective: &EffectiveSettings,
    ) -> Result<Option<TickOutcome>> {
        let mut retried = false;
        let mut last_failure: Option<(Uuid, FailureCategory)> = None;

        loop {
            let executing = self
                .inner
                .repo
                .tasks_by_phase(workspace_id, TaskPhase::Executing)
                .await?;
            if !effective.has_capacity(TaskPhase::Executing, executing.len()) {
                return Ok(None);
            }

            let ready = self
                .inner
                .repo
                .tasks_by_phase(workspace_id, TaskPhase::Ready)
                .await?;

            let candidate = ready
                .into_iter()
                .filter(|t| !t.is_blocked())
                .find(|t| !self.model_blocked(&t.model));

            let Some(task) = candidate else {
                return Ok(match last_failure {
                    Some((task_id, category)) => {
                        Some(TickOutcome::DispatchFailed { task_id, category })
                    }
                    None => None,
                });
            };

            match self.inner.invoker.start(&task).await {
                Ok(handle) => {
                    let updated = match self
                        .inner
                        .repo
                        .apply_transition(
                            task.id,
                            TaskPhase::Executing,
                            TransitionActor::System,
                            Some("auto-dispatch".to_string()),
                        )
                        .await
                    {
                        Ok(updated) => updated,
                        Err(e) => {
                            // The run is already live: reclaim it so no
                            // agent keeps working on a task still parked
                            // in ready with a dead outcome channel.
                            if let Err(stop_err) = self.inner.invoker.stop(task.id).await {
                                warn!(
                                    workspace_id,
                                    task_id = %task.id,
                                    error = %stop_err,
                                    "failed to stop run after dispatch write error"
                                );
                            }
                            return Err(e.into());
                        }
                    };
                    state.set_current_task(Some(task.id));
                    info!(
                        workspace_id,
                        task_id = %task.id,
                        model = %task.model,
                        "task dispatched"
                    );
                    self.publish_moved(workspace_id, &task, &updated, None);
                    self.spawn_watcher(workspace_id.to_string(), updated, handle);
                    return Ok(Some(TickOutcome::Dispatched(task.id)));
                }
                Err(InvokerError::Provider(category)) => {
                    let key =
                        BreakerKey::new(&task.model.provider, &task.model.model_id, category);
                    warn!(
                        workspace_id,
                        task_id = %task.id,
                        breaker = %key,
                        "dispatch failed"
                    );
                    if self.inner.breaker.record_failure(&key) {
                        self.publish_breaker_opened(workspace_id, &key);
                    }
                    last_failure = Some((task.id, category));
                    if retried {
                        return Ok(Some(TickOutcome::DispatchFailed {
                            task_id: task.id,
                            category,
                        }));
                    }
                    // Bounded single retry: re-run selection once before
                    // yielding back to the timer.
                    retried = true;
                }
                Err(e @ InvokerError::Unavailable(_)) => return Err(e.into()),
            }
        }
    }

    /// True when any failure category is open for the model's breaker.
    fn model_blocked(&self, model: &ModelRef) -> bool {
        [
            FailureCategory::RateLimit,
            FailureCategory::Quota,
            FailureCategory::Auth,
        ]
        .iter()
        .any(|&category| {
            self.inner.breaker.is_open(&BreakerKey::new(
                &model.provider,
                &model.model_id,
                category,
            ))
        })
    }

    // ------------------------------------------------------------------
    // Completion handling
    // ------------------------------------------------------------------

    fn spawn_watcher(&self, workspace_id: String, task: Task, handle: ExecutionHandle) {
        let manager = self.clone();
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            if let Err(e) = manager.handle_outcome(&workspace_id, &task, outcome).await {
                warn!(
                    workspace_id = %workspace_id,
                    task_id = %task.id,
                    error = %e,
                    "failed to apply execution outcome"
                );
            }
        });
    }

    async fn handle_outcome(
        &self,
        workspace_id: &str,
        task: &Task,
        outcome: ExecutionOutcome,
    ) -> Result<()> {
        let state = self.workspace(workspace_id);

        // Applied under the tick lock: a tick that already read phase
        // counts must not see the returned task land mid-decision.
        let tick_guard = state.tick_lock.lock().await;

        match outcome {
            ExecutionOutcome::Succeeded => {
                // A real success proves the provider healthy across all
                // tracked categories for this model.
                for category in [
                    FailureCategory::RateLimit,
                    FailureCategory::Quota,
                    FailureCategory::Auth,
                ] {
                    let key =
                        BreakerKey::new(&task.model.provider, &task.model.model_id, category);
                    if self.inner.breaker.record_success(&key) {
                        self.publish_breaker_closed(workspace_id, &key);
                    }
                }
                let updated = self
                    .inner
                    .repo
                    .apply_transition(task.id, TaskPhase::Complete, TransitionActor::Agent, None)
                    .await?;
                info!(workspace_id, task_id = %task.id, "execution succeeded");
                self.publish_moved(workspace_id, task, &updated, None);
            }
            ExecutionOutcome::Failed(category) => {
                let key = BreakerKey::new(&task.model.provider, &task.model.model_id, category);
                warn!(
                    workspace_id,
                    task_id = %task.id,
                    breaker = %key,
                    "execution failed"
                );
                if self.inner.breaker.record_failure(&key) {
                    self.publish_breaker_opened(workspace_id, &key);
                }
                let reason = format!("execution failed: {category}");
                let updated = self
                    .inner
                    .repo
                    .apply_transition(
                        task.id,
                        TaskPhase::Ready,
                        TransitionActor::System,
                        Some(reason.clone()),
                    )
                    .await?;
                self.publish_moved(workspace_id, task, &updated, Some(reason));
            }
            ExecutionOutcome::Cancelled => {
                let reason = "execution cancelled".to_string();
                let updated = self
                    .inner
                    .repo
                    .apply_transition(
                        task.id,
                        TaskPhase::Ready,
                        TransitionActor::System,
                        Some(reason.clone()),
                    )
                    .await?;
                info!(workspace_id, task_id = %task.id, "execution cancelled");
                self.publish_moved(workspace_id, task, &updated, Some(reason));
            }
        }

        if state.current_task() == Some(task.id) {
            state.set_current_task(None);
        }
        // Released before the follow-up tick below re-acquires it.
        drop(tick_guard);

        let status = self.get_queue_status(workspace_id).await?;
        self.publish_status(workspace_id, &status);

        // The slot just freed up; evaluate the next move without waiting
        // for the timer.
        self.tick(workspace_id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event helpers
    // ------------------------------------------------------------------

    fn publish_status(&self, workspace_id: &str, status: &QueueStatus) {
        self.inner.sink.publish(
            workspace_id,
            QueueEvent::QueueStatusChanged(QueueStatusPayload {
                enabled: status.enabled,
                current_task_id: status.current_task_id,
                tasks_in_ready: status.tasks_in_ready,
                tasks_in_executing: status.tasks_in_executing,
            }),
        );
    }

    fn publish_moved(&self, workspace_id: &str, before: &Task, after: &Task, reason: Option<String>) {
        let actor = after
            .history
            .last()
            .map(|t| t.actor)
            .unwrap_or(TransitionActor::System);
        self.inner.sink.publish(
            workspace_id,
            QueueEvent::TaskMoved(TaskMovedPayload {
                task_id: after.id,
                from: before.phase,
                to: after.phase,
                actor,
                reason,
            }),
        );
    }

    fn publish_breaker_opened(&self, workspace_id: &str, key: &BreakerKey) {
        self.inner.sink.publish(
            workspace_id,
            QueueEvent::BreakerOpened(BreakerChangedPayload {
                provider: key.provider.clone(),
                model_id: key.model_id.clone(),
                category: key.category,
                failure_count: self.inner.breaker.failure_count(key),
            }),
        );
    }

    fn publish_breaker_closed(&self, workspace_id: &str, key: &BreakerKey) {
        self.inner.sink.publish(
            workspace_id,
            QueueEvent::BreakerClosed(BreakerChangedPayload {
                provider: key.provider.clone(),
                model_id: key.model_id.clone(),
                category: key.category,
                failure_count: 0,
            }),
        );
    }
}
