use serde::{Deserialize, Serialize};
use uuid::Uuid;

use td_core::limits::{EffectiveSettings, WorkflowDefaults, WorkspaceOverrides};
use td_harness::breaker::BreakerStatus;

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Per-workspace read model, recomputed on demand from the repository and
/// the live breaker state. Never independently mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub workspace_id: String,
    pub enabled: bool,
    /// The task occupying the active execution context, if any.
    pub current_task_id: Option<Uuid>,
    pub tasks_in_ready: usize,
    pub tasks_in_executing: usize,
    /// Currently open breakers. The single place an operator looks to
    /// answer "why is nothing executing".
    pub execution_breakers: Vec<BreakerStatus>,
}

// ---------------------------------------------------------------------------
// WorkflowSettingsView
// ---------------------------------------------------------------------------

/// The three settings layers side by side, for the settings API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettingsView {
    pub effective: EffectiveSettings,
    pub overrides: WorkspaceOverrides,
    pub global_defaults: WorkflowDefaults,
}
