use super::states::{QueueStatus, WorkflowState};
use crate::error::{LabflowError, Result};

/// Trait for implementing state transition guards
pub trait StateGuard<S> {
    /// Check if a transition is allowed
    fn check(&self, from: S, to: S) -> Result<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Workflow transitions: pending → scheduled → running → terminal, with
/// paused ↔ running only entered from running.
pub struct WorkflowTransitionGuard;

impl WorkflowTransitionGuard {
    pub fn allows(from: WorkflowState, to: WorkflowState) -> bool {
        use WorkflowState::*;

        if from == to {
            return !from.is_terminal();
        }

        matches!(
            (from, to),
            (Pending, Scheduled | Running | Failed | Cancelled)
                | (Scheduled, Running | Failed | Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled | Stopped)
                | (Paused, Running | Cancelled | Stopped)
        )
    }
}

impl StateGuard<WorkflowState> for WorkflowTransitionGuard {
    fn check(&self, from: WorkflowState, to: WorkflowState) -> Result<()> {
        if Self::allows(from, to) {
            Ok(())
        } else {
            Err(LabflowError::StateTransition(format!(
                "workflow cannot move from {from} to {to}"
            )))
        }
    }

    fn description(&self) -> &'static str {
        "Workflow transitions follow the execution lifecycle"
    }
}

/// Queue entry transitions. A failed entry may return to pending for a retry.
pub struct QueueTransitionGuard;

impl QueueTransitionGuard {
    pub fn allows(from: QueueStatus, to: QueueStatus) -> bool {
        use QueueStatus::*;

        matches!(
            (from, to),
            (Pending, Pending | Assigned | Cancelled)
                | (Assigned, Running | Failed | Cancelled)
                | (Running, Completed | Failed)
                | (Failed, Pending)
        )
    }
}

impl StateGuard<QueueStatus> for QueueTransitionGuard {
    fn check(&self, from: QueueStatus, to: QueueStatus) -> Result<()> {
        if Self::allows(from, to) {
            Ok(())
        } else {
            Err(LabflowError::StateTransition(format!(
                "queue entry cannot move from {from} to {to}"
            )))
        }
    }

    fn description(&self) -> &'static str {
        "Queue entries have a single owner per transition"
    }
}
