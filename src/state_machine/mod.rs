// State machine module for workflow and queue lifecycles
//
// Workflow, queue entry and service states plus the guards that decide which
// transitions are legal.

pub mod guards;
pub mod states;

// Re-export main types for convenient access
pub use guards::{QueueTransitionGuard, StateGuard, WorkflowTransitionGuard};
pub use states::{QueueStatus, ServiceStatus, WorkflowState};
