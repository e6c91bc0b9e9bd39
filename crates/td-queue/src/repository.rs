use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use td_core::phase::{validate_transition, TransitionRejection};
use td_core::types::{Task, TaskPhase, TransitionActor};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    /// A transition was rejected by lifecycle validation. User-visible,
    /// never retried automatically.
    #[error(transparent)]
    Rejected(#[from] TransitionRejection),

    /// Transient storage/transport trouble. The current tick aborts and
    /// the next scheduled tick retries.
    #[error("storage: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

// ---------------------------------------------------------------------------
// TaskRepository
// ---------------------------------------------------------------------------

/// Source of truth for task records and their current phase.
///
/// The queue manager reads snapshots and requests mutations; it never owns
/// storage. Implementations must serialize writes internally (single
/// writer at a time).
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Tasks in the given workspace and phase, in stable ascending `order`.
    async fn tasks_by_phase(&self, workspace_id: &str, phase: TaskPhase) -> Result<Vec<Task>>;

    /// Validate and apply a phase transition, appending it to the task's
    /// history. Returns the updated task.
    async fn apply_transition(
        &self,
        task_id: Uuid,
        to: TaskPhase,
        actor: TransitionActor,
        reason: Option<String>,
    ) -> Result<Task>;

    /// Attach (or clear) a data-quality error on the task, e.g. a
    /// promotion rejected for missing acceptance criteria.
    async fn set_validation_error(&self, task_id: Uuid, error: Option<String>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// In-memory repository for tests and embedders without their own store.
///
/// All access goes through one async mutex, which gives the single-writer
/// guarantee the scheduler's concurrency model requires.
#[derive(Default)]
pub struct MemoryRepository {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task.
    pub async fn upsert(&self, task: Task) {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(task.id, task);
    }

    /// Fetch a task by id.
    pub async fn get(&self, task_id: Uuid) -> Option<Task> {
        let tasks = self.tasks.lock().await;
        tasks.get(&task_id).cloned()
    }

    /// Number of tasks across all workspaces.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskRepository for MemoryRepository {
    async fn tasks_by_phase(&self, workspace_id: &str, phase: TaskPhase) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| t.workspace_id == workspace_id && t.phase == phase)
            .cloned()
            .collect();
        // Stable ordering: order, then creation time, then id as the final
        // tie-break so two snapshots never disagree.
        matching.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(matching)
    }

    async fn apply_transition(
        &self,
        task_id: Uuid,
        to: TaskPhase,
        actor: TransitionActor,
        reason: Option<String>,
    ) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(RepositoryError::NotFound(task_id))?;

        validate_transition(task, to)?;

        debug!(task_id = %task_id, from = %task.phase, to = %to, actor = %actor, "applying transition");
        task.record_transition(to, actor, reason);
        Ok(task.clone())
    }

    async fn set_validation_error(&self, task_id: Uuid, error: Option<String>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(RepositoryError::NotFound(task_id))?;
        task.validation_error = error;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
