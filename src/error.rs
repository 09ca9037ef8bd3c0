use thiserror::Error;

use crate::models::{ServiceId, TaskId, WorkflowId};

/// Crate-wide error type.
///
/// Variants follow the failure taxonomy of the engine: lookups that fail outright
/// (`NotFound`), per-task scheduling failures (`Incompatible`, `Capacity`), remote
/// instrument failures that feed the recovery policy (`RemoteFailure`), and caller
/// errors (`Validation`, `DependencyCycle`, `StateTransition`).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LabflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No compatible service for task {task_id}: {reason}")]
    Incompatible { task_id: TaskId, reason: String },

    #[error("No capacity available: {0}")]
    Capacity(String),

    #[error("Remote failure at {endpoint}: {reason}")]
    RemoteFailure { endpoint: String, reason: String },

    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Dependency cycle in workflow {workflow_id} involving tasks {tasks:?}")]
    DependencyCycle {
        workflow_id: WorkflowId,
        tasks: Vec<TaskId>,
    },

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl LabflowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn service_not_found(id: ServiceId) -> Self {
        Self::not_found("Service", id)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Errors worth retrying without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Capacity(_) | Self::RemoteFailure { .. } | Self::ConcurrencyConflict(_)
        )
    }
}

impl From<config::ConfigError> for LabflowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for LabflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LabflowError>;
