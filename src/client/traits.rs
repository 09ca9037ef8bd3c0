use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::LabflowError;

/// Transport-level failures talking to an instrument service
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallerError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },
}

impl CallerError {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. }
            | Self::Timeout { endpoint } => endpoint,
        }
    }
}

impl From<CallerError> for LabflowError {
    fn from(err: CallerError) -> Self {
        LabflowError::RemoteFailure {
            endpoint: err.endpoint().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Answer to an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub accepted: bool,
    pub initial_response: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RemoteState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Snapshot of a remote execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub state: RemoteState,
    pub progress: Option<f64>,
    pub message: Option<String>,
}

impl RemoteStatus {
    pub fn running(progress: Option<f64>) -> Self {
        Self {
            state: RemoteState::Running,
            progress,
            message: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            state: RemoteState::Completed,
            progress: Some(100.0),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: RemoteState::Failed,
            progress: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthProbe {
    pub up: bool,
    pub response_time_ms: u64,
}

/// Instrument-service transport used by the registry and the engine.
///
/// Implementations are registered per service type in the
/// [`AdapterRegistry`](crate::registry::AdapterRegistry).
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    /// Start `action` on the service
    async fn invoke(
        &self,
        endpoint: &str,
        action: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<InvokeResponse, CallerError>;

    async fn poll_status(&self, endpoint: &str) -> Result<RemoteStatus, CallerError>;

    async fn fetch_results(&self, endpoint: &str) -> Result<Value, CallerError>;

    /// Return the instrument to idle after an interrupted run
    async fn reset(&self, endpoint: &str) -> Result<(), CallerError>;

    async fn health_check(&self, health_endpoint: &str, timeout: Duration) -> Result<HealthProbe, CallerError>;

    /// Name used in logs and registry listings
    fn name(&self) -> &str;
}
