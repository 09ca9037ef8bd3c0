//! # Orchestration
//!
//! Executes scheduled workflows against laboratory services.
//!
//! ## Core Components
//!
//! - **WorkflowEngine**: drives workflows sequentially or level by level,
//!   batches workflows and exposes cancel/pause/resume/stop
//! - **TaskExecutor**: runs one queue entry on its service, including the
//!   retry and fallback policy
//! - **DependencyGraph**: topological order, dependency levels and the
//!   critical path of a workflow
//! - **BackoffCalculator**: exponential retry delays
//! - **remote_wait**: cancellable status polling for remote tasks

pub mod backoff_calculator;
pub mod dependency_levels;
pub mod remote_wait;
pub mod task_executor;
pub mod types;
pub mod workflow_engine;

pub use backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig, BackoffResult, BackoffType};
pub use dependency_levels::DependencyGraph;
pub use remote_wait::{wait_for_completion, WaitOutcome};
pub use task_executor::{build_payload, TaskExecutor};
pub use types::{
    BatchOrdering, BatchResult, ExecutionMode, ExecutionResult, RecoveryAction, RecoveryActionType,
    RecoveryStrategy, TaskOutcome,
};
pub use workflow_engine::WorkflowEngine;
