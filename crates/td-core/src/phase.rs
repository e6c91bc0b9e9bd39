//! Pure phase lifecycle logic: promotion, demotion, and transition
//! preconditions. No I/O, no clocks, exhaustively table-testable.

use crate::types::{Task, TaskPhase};

// ---------------------------------------------------------------------------
// TransitionRejection
// ---------------------------------------------------------------------------

/// A requested transition violated a precondition.
///
/// This is a user-visible validation value, not a programming error: the
/// caller decides whether to retry, prompt the user, or abandon the move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejection {
    /// Entering `ready` or `executing` requires a non-empty acceptance
    /// criteria list unless the task opted into no-plan mode.
    #[error("acceptance criteria required")]
    AcceptanceCriteriaRequired,

    /// The requested edge does not exist in the lifecycle graph.
    #[error("no transition from {from} to {to}")]
    IllegalEdge { from: TaskPhase, to: TaskPhase },
}

// ---------------------------------------------------------------------------
// promote / demote
// ---------------------------------------------------------------------------

/// Next forward phase, or `None` when already at `archived`.
pub fn promote(phase: TaskPhase) -> Option<TaskPhase> {
    match phase {
        TaskPhase::Backlog => Some(TaskPhase::Ready),
        TaskPhase::Ready => Some(TaskPhase::Executing),
        TaskPhase::Executing => Some(TaskPhase::Complete),
        TaskPhase::Complete => Some(TaskPhase::Archived),
        TaskPhase::Archived => None,
    }
}

/// One step backward along the chain.
///
/// `complete` demotes to `ready` (the rework shortcut skips `executing`).
/// `backlog` and `archived` have no demotion.
pub fn demote(phase: TaskPhase) -> Option<TaskPhase> {
    match phase {
        TaskPhase::Backlog => None,
        TaskPhase::Ready => Some(TaskPhase::Backlog),
        TaskPhase::Executing => Some(TaskPhase::Ready),
        TaskPhase::Complete => Some(TaskPhase::Ready),
        TaskPhase::Archived => None,
    }
}

// ---------------------------------------------------------------------------
// validate_transition
// ---------------------------------------------------------------------------

/// Check that moving `task` into `to` is both a legal edge and satisfies
/// the phase's entry preconditions.
pub fn validate_transition(task: &Task, to: TaskPhase) -> Result<(), TransitionRejection> {
    if !task.phase.can_transition_to(&to) {
        return Err(TransitionRejection::IllegalEdge {
            from: task.phase,
            to,
        });
    }

    // Moving forward into ready/executing requires planning artifacts.
    // Demotions (executing -> ready, complete -> ready) are exempt: the
    // task already passed the gate on the way in.
    let forward = promote(task.phase) == Some(to);
    if forward
        && matches!(to, TaskPhase::Ready | TaskPhase::Executing)
        && task.acceptance_criteria.is_empty()
        && !task.no_plan_mode
    {
        return Err(TransitionRejection::AcceptanceCriteriaRequired);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
