use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use td_core::types::{FailureCategory, TaskPhase, TransitionActor};

// ---------------------------------------------------------------------------
// QueueEvent
// ---------------------------------------------------------------------------

/// Events the scheduler emits for UI/WebSocket consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    QueueStatusChanged(QueueStatusPayload),
    TaskMoved(TaskMovedPayload),
    BreakerOpened(BreakerChangedPayload),
    BreakerClosed(BreakerChangedPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusPayload {
    pub enabled: bool,
    pub current_task_id: Option<Uuid>,
    pub tasks_in_ready: usize,
    pub tasks_in_executing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMovedPayload {
    pub task_id: Uuid,
    pub from: TaskPhase,
    pub to: TaskPhase,
    pub actor: TransitionActor,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerChangedPayload {
    pub provider: String,
    pub model_id: String,
    pub category: FailureCategory,
    pub failure_count: u32,
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// A published event with its workspace scope and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub workspace_id: String,
    pub event: QueueEvent,
    pub timestamp: DateTime<Utc>,
}
