//! Shared orchestration types: execution modes, recovery policy and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::models::{ServiceId, TaskId, WorkflowId};
use crate::state_machine::{QueueStatus, WorkflowState};

/// How a workflow's tasks are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time in `order_index` order
    Sequential,
    /// Dependency levels in order, tasks within a level concurrently
    Parallel,
    /// Alias of `Parallel`
    #[default]
    Optimized,
}

impl ExecutionMode {
    pub fn is_level_based(&self) -> bool {
        matches!(self, Self::Parallel | Self::Optimized)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Optimized => write!(f, "optimized"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "optimized" => Ok(Self::Optimized),
            _ => Err(format!("Invalid execution mode: {s}")),
        }
    }
}

/// What happens after a task fails on its service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    FailFast,
    Continue,
    Retry,
    #[default]
    Fallback,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::Continue => write!(f, "continue"),
            Self::Retry => write!(f, "retry"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

impl FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_fast" => Ok(Self::FailFast),
            "continue" => Ok(Self::Continue),
            "retry" => Ok(Self::Retry),
            "fallback" => Ok(Self::Fallback),
            _ => Err(format!("Invalid recovery strategy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionType {
    /// Try the same service again after a delay
    Retry,
    /// Move to an alternative service, if one was found
    Fallback,
    /// Give up on this task and keep going
    Continue,
    /// Give up on this task and stop the workflow
    FailFast,
}

/// Decision produced by failure handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub action_type: RecoveryActionType,
    pub alternative_service_id: Option<ServiceId>,
    pub retry_count: u32,
    pub delay_seconds: u64,
    pub message: String,
}

impl RecoveryAction {
    pub fn fail_fast(message: impl Into<String>) -> Self {
        Self::terminal(RecoveryActionType::FailFast, message)
    }

    pub fn proceed(message: impl Into<String>) -> Self {
        Self::terminal(RecoveryActionType::Continue, message)
    }

    fn terminal(action_type: RecoveryActionType, message: impl Into<String>) -> Self {
        Self {
            action_type,
            alternative_service_id: None,
            retry_count: 0,
            delay_seconds: 0,
            message: message.into(),
        }
    }
}

/// Final state of one task within a workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_name: String,
    pub service_id: Option<ServiceId>,
    pub status: QueueStatus,
    /// Service invocations made, including retries and fallback
    pub attempts: u32,
    pub fallback_used: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure handling asked for the workflow to stop
    #[serde(default)]
    pub aborted: bool,
}

impl TaskOutcome {
    pub fn new(task_id: TaskId, task_name: impl Into<String>) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            service_id: None,
            status: QueueStatus::Pending,
            attempts: 0,
            fallback_used: false,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            aborted: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueueStatus::Completed
    }

    pub(crate) fn failed(mut self, status: QueueStatus, error: impl Into<String>) -> Self {
        self.status = status;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }
}

/// Outcome of executing one workflow. `completed_tasks + failed_tasks`
/// always equals `total_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub workflow_id: WorkflowId,
    pub success: bool,
    pub final_status: WorkflowState,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub execution_time_seconds: f64,
    pub task_results: Vec<TaskOutcome>,
    /// Tasks never dispatched (blocked prerequisite, fail-fast or cancellation)
    pub skipped_task_ids: Vec<TaskId>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    /// Failed result for a workflow that could not be executed at all
    pub fn failure(workflow_id: WorkflowId, error: impl Into<String>) -> Self {
        Self {
            workflow_id,
            success: false,
            final_status: WorkflowState::Failed,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            execution_time_seconds: 0.0,
            task_results: Vec::new(),
            skipped_task_ids: Vec::new(),
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }
}

/// Order in which a batch of workflows is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchOrdering {
    /// Shortest estimated workflow first
    #[default]
    Throughput,
    /// Highest workflow priority first
    Priority,
    /// As given
    Fifo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total_workflows: usize,
    pub successful_workflows: usize,
    pub failed_workflows: usize,
    pub results: Vec<ExecutionResult>,
    pub total_execution_time_seconds: f64,
    /// Workflows per elapsed hour
    pub throughput_per_hour: f64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimized_is_level_based() {
        assert!(ExecutionMode::Optimized.is_level_based());
        assert!(ExecutionMode::Parallel.is_level_based());
        assert!(!ExecutionMode::Sequential.is_level_based());
        assert_eq!(ExecutionMode::default(), ExecutionMode::Optimized);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("fail_fast".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::FailFast);
        assert_eq!(RecoveryStrategy::Retry.to_string(), "retry");
        assert!("ignore".parse::<RecoveryStrategy>().is_err());
        assert_eq!("parallel".parse::<ExecutionMode>().unwrap(), ExecutionMode::Parallel);
    }

    #[test]
    fn test_recovery_actions_serialize_with_strategy_names() {
        let names: Vec<serde_json::Value> = [
            RecoveryActionType::FailFast,
            RecoveryActionType::Continue,
            RecoveryActionType::Retry,
            RecoveryActionType::Fallback,
        ]
        .into_iter()
        .map(|action| serde_json::to_value(action).unwrap())
        .collect();
        assert_eq!(names, vec!["fail_fast", "continue", "retry", "fallback"]);

        let action = RecoveryAction::fail_fast("task 4 failed");
        assert_eq!(serde_json::to_value(&action).unwrap()["action_type"], "fail_fast");
    }

    #[test]
    fn test_failure_result_counts() {
        let result = ExecutionResult::failure(3, "workflow not found");
        assert!(!result.success);
        assert_eq!(result.completed_tasks + result.failed_tasks, result.total_tasks);
        assert_eq!(serde_json::to_value(BatchOrdering::Throughput).unwrap(), "throughput");
    }
}
