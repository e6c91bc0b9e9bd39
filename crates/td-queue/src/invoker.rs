use async_trait::async_trait;
use uuid::Uuid;

use td_core::types::{FailureCategory, Task};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    /// The provider rejected the dispatch with a categorized failure.
    /// Recorded on the execution breaker by the caller.
    #[error("provider failure: {0}")]
    Provider(FailureCategory),

    /// The invoker itself is unreachable. Transient; the tick aborts and
    /// retries on the next schedule.
    #[error("invoker unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// ExecutionOutcome / ExecutionHandle
// ---------------------------------------------------------------------------

/// The single terminal event of one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(FailureCategory),
    Cancelled,
}

/// Handle to an in-flight agent run.
///
/// Carries a channel that yields exactly one [`ExecutionOutcome`]. If the
/// invoker drops the sender without reporting, the run is treated as
/// cancelled.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub task_id: Uuid,
    outcome_rx: flume::Receiver<ExecutionOutcome>,
}

impl ExecutionHandle {
    /// Create a handle and the sender the invoker uses to report the
    /// terminal outcome. The channel holds exactly one message.
    pub fn channel(task_id: Uuid) -> (flume::Sender<ExecutionOutcome>, Self) {
        let (tx, rx) = flume::bounded(1);
        (
            tx,
            Self {
                task_id,
                outcome_rx: rx,
            },
        )
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(self) -> ExecutionOutcome {
        self.outcome_rx
            .recv_async()
            .await
            .unwrap_or(ExecutionOutcome::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// ExecutionInvoker
// ---------------------------------------------------------------------------

/// Starts and stops agent runs. Implemented by the execution layer that
/// owns credentials and process management; the scheduler only sees this
/// request-response surface.
#[async_trait]
pub trait ExecutionInvoker: Send + Sync {
    /// Start an agent run for the task. Returns immediately with a handle;
    /// completion arrives asynchronously on the handle's channel.
    async fn start(&self, task: &Task) -> Result<ExecutionHandle, InvokerError>;

    /// Stop an in-flight run. Distinct from pausing automation: this is a
    /// user-initiated action forwarded straight through.
    async fn stop(&self, task_id: Uuid) -> Result<(), InvokerError>;
}
