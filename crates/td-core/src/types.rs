use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Backlog,
    Ready,
    Executing,
    Complete,
    Archived,
}

impl TaskPhase {
    /// The forward lifecycle chain, first to last.
    pub fn forward_order() -> &'static [TaskPhase] {
        &[
            TaskPhase::Backlog,
            TaskPhase::Ready,
            TaskPhase::Executing,
            TaskPhase::Complete,
            TaskPhase::Archived,
        ]
    }

    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// Valid edges are the forward chain, the `complete -> ready` rework
    /// shortcut, and single-step demotions. `archived` is terminal.
    pub fn can_transition_to(&self, target: &TaskPhase) -> bool {
        matches!(
            (self, target),
            (TaskPhase::Backlog, TaskPhase::Ready)
                | (TaskPhase::Ready, TaskPhase::Executing)
                | (TaskPhase::Executing, TaskPhase::Complete)
                | (TaskPhase::Complete, TaskPhase::Archived)
                | (TaskPhase::Complete, TaskPhase::Ready)
                | (TaskPhase::Ready, TaskPhase::Backlog)
                | (TaskPhase::Executing, TaskPhase::Ready)
        )
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskPhase::Backlog => "backlog",
            TaskPhase::Ready => "ready",
            TaskPhase::Executing => "executing",
            TaskPhase::Complete => "complete",
            TaskPhase::Archived => "archived",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// TransitionActor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionActor {
    User,
    Agent,
    System,
}

impl fmt::Display for TransitionActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransitionActor::User => "user",
            TransitionActor::Agent => "agent",
            TransitionActor::System => "system",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// PhaseTransition
// ---------------------------------------------------------------------------

/// One accepted phase change. Appended to task history, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: TaskPhase,
    pub to: TaskPhase,
    pub timestamp: DateTime<Utc>,
    pub actor: TransitionActor,
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// FailureCategory
// ---------------------------------------------------------------------------

/// Categories of provider failure tracked by the execution breaker.
///
/// Scoped separately because each category requires a different operator
/// response: a rate-limit cooldown must not forgive an auth failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RateLimit,
    Quota,
    Auth,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCategory::RateLimit => "rate_limit",
            FailureCategory::Quota => "quota",
            FailureCategory::Auth => "auth",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ModelRef
// ---------------------------------------------------------------------------

/// The (provider, model) pair a task is dispatched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model_id)
    }
}

// ---------------------------------------------------------------------------
// BlockedInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedInfo {
    pub reason: String,
    pub since: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of delegated work as the scheduler sees it.
///
/// The repository owns the authoritative record; the queue manager only
/// holds transient snapshots while making a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workspace_id: String,
    pub title: String,
    pub phase: TaskPhase,
    /// Position within a phase; lower values are scheduled first.
    pub order: i64,
    pub acceptance_criteria: Vec<String>,
    /// Skips the acceptance-criteria precondition when set.
    #[serde(default)]
    pub no_plan_mode: bool,
    /// External signal that planning artifacts exist for this task.
    #[serde(default)]
    pub plan_ready: bool,
    #[serde(default)]
    pub blocked: Option<BlockedInfo>,
    pub model: ModelRef,
    /// Last data-quality rejection attached by the queue, if any.
    #[serde(default)]
    pub validation_error: Option<String>,
    #[serde(default)]
    pub history: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        workspace_id: impl Into<String>,
        title: impl Into<String>,
        order: i64,
        model: ModelRef,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            title: title.into(),
            phase: TaskPhase::Backlog,
            order,
            acceptance_criteria: Vec::new(),
            no_plan_mode: false,
            plan_ready: false,
            blocked: None,
            model,
            validation_error: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    /// Mark the task blocked with a reason.
    pub fn block(&mut self, reason: impl Into<String>) {
        self.blocked = Some(BlockedInfo {
            reason: reason.into(),
            since: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Clear the blocked flag.
    pub fn unblock(&mut self) {
        self.blocked = None;
        self.updated_at = Utc::now();
    }

    /// Apply an already-validated transition, appending to history.
    pub fn record_transition(
        &mut self,
        to: TaskPhase,
        actor: TransitionActor,
        reason: Option<String>,
    ) {
        let now = Utc::now();
        self.history.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: now,
            actor,
            reason,
        });
        self.phase = to;
        self.updated_at = now;
    }
}
