//! # Task Executor
//!
//! Runs one queued task on its assigned service and applies the recovery
//! policy when the service fails.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──claim──▶ assigned ──slot──▶ running ──▶ completed
//!    ▲                   │                  │
//!    └──── retry/fallback ┴──── failed ◀────┘
//! ```
//!
//! The claim is a compare-and-set on the pending status, so an entry has a
//! single owner from claim to completion. The service slot taken before the
//! call is always released afterwards, whatever the outcome.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
use super::remote_wait::{wait_for_completion, WaitOutcome};
use super::types::{RecoveryAction, RecoveryActionType, RecoveryStrategy, TaskOutcome};
use crate::client::ServiceCaller;
use crate::config::EngineConfig;
use crate::constants::{actions, events};
use crate::error::{LabflowError, Result};
use crate::logging::log_task_operation;
use crate::models::{QueueEntry, Service, ServiceId, Task};
use crate::persistence::Persistence;
use crate::registry::ServiceRegistry;
use crate::scheduling::RequirementsResolver;
use crate::state_machine::{QueueStatus, QueueTransitionGuard, StateGuard};

pub struct TaskExecutor {
    persistence: Arc<dyn Persistence>,
    registry: Arc<ServiceRegistry>,
    requirements: RequirementsResolver,
    backoff: BackoffCalculator,
    config: EngineConfig,
}

impl TaskExecutor {
    pub fn new(persistence: Arc<dyn Persistence>, registry: Arc<ServiceRegistry>, config: EngineConfig) -> Self {
        Self {
            requirements: RequirementsResolver::new(Arc::clone(&persistence)),
            backoff: BackoffCalculator::new(BackoffCalculatorConfig::from(&config)),
            persistence,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn max_retries(&self, task: &Task) -> u32 {
        task.max_retries.unwrap_or(self.config.max_retries)
    }

    fn task_timeout(&self, task: &Task) -> Duration {
        Duration::from_secs(task.timeout_seconds.unwrap_or(self.config.default_task_timeout_seconds))
    }

    async fn transition(&self, entry: &mut QueueEntry, to: QueueStatus) -> Result<()> {
        QueueTransitionGuard.check(entry.status, to)?;
        entry.status = to;
        entry.updated_at = Utc::now();
        self.persistence.save_queue_entry(entry).await
    }

    /// Terminal transition on a path that is already returning a failure
    async fn transition_or_warn(&self, entry: &mut QueueEntry, to: QueueStatus) {
        if let Err(e) = self.transition(entry, to).await {
            warn!(
                entry_id = %entry.id,
                task_id = entry.task_id,
                from = %entry.status,
                to = %to,
                error = %e,
                "🔧 EXECUTOR: Queue entry transition failed"
            );
        }
    }

    /// Execute `task` from its pending queue entry until it completes or the
    /// recovery policy gives up
    pub async fn execute(
        &self,
        task: &Task,
        mut entry: QueueEntry,
        recovery: RecoveryStrategy,
        token: &CancellationToken,
    ) -> TaskOutcome {
        let mut outcome = TaskOutcome::new(task.id, task.name.clone());

        // Claim
        let mut claimed = entry.clone();
        claimed.status = QueueStatus::Assigned;
        claimed.max_retries = self.max_retries(task);
        claimed.updated_at = Utc::now();
        match self
            .persistence
            .update_queue_entry_if_status(&claimed, QueueStatus::Pending)
            .await
        {
            Ok(true) => entry = claimed,
            Ok(false) => {
                return outcome.failed(
                    QueueStatus::Failed,
                    LabflowError::ConcurrencyConflict(format!("queue entry {} is owned elsewhere", entry.id)).to_string(),
                )
            }
            Err(e) => return outcome.failed(QueueStatus::Failed, e.to_string()),
        }

        loop {
            let Some(service_id) = entry.assigned_service_id else {
                let error = "no service assigned".to_string();
                entry.last_error = Some(error.clone());
                self.transition_or_warn(&mut entry, QueueStatus::Failed).await;
                return outcome.failed(QueueStatus::Failed, error);
            };
            outcome.service_id = Some(service_id);
            outcome.attempts += 1;

            let attempt = self.attempt(task, &mut entry, service_id, token).await;

            let error = match attempt {
                Ok(result) => {
                    if let Err(e) = self.persistence.save_result(task.id, &result).await {
                        warn!(task_id = task.id, error = %e, "🔧 EXECUTOR: Failed to persist result");
                    }
                    entry.actual_completion_time = Some(Utc::now());
                    entry.last_error = None;
                    if let Err(e) = self.transition(&mut entry, QueueStatus::Completed).await {
                        return outcome.failed(QueueStatus::Failed, e.to_string());
                    }
                    log_task_operation(events::TASK_COMPLETED, task.workflow_id, task.id, Some(service_id), "completed", None);

                    outcome.status = QueueStatus::Completed;
                    outcome.result = Some(result);
                    outcome.started_at = entry.actual_start_time;
                    outcome.completed_at = entry.actual_completion_time;
                    return outcome;
                }
                Err(e) => e,
            };

            outcome.started_at = outcome.started_at.or(entry.actual_start_time);
            entry.last_error = Some(error.to_string());
            log_task_operation(
                events::TASK_FAILED,
                task.workflow_id,
                task.id,
                Some(service_id),
                "failed",
                Some(&error.to_string()),
            );

            if entry.status == QueueStatus::Assigned && token.is_cancelled() {
                self.transition_or_warn(&mut entry, QueueStatus::Cancelled).await;
                return outcome.failed(QueueStatus::Cancelled, "execution cancelled before dispatch");
            }
            if let Err(e) = self.transition(&mut entry, QueueStatus::Failed).await {
                return outcome.failed(QueueStatus::Failed, e.to_string());
            }
            if token.is_cancelled() {
                return outcome.failed(QueueStatus::Failed, format!("execution stopped: {error}"));
            }

            let action = match self
                .handle_service_failure(task, &entry, service_id, recovery, outcome.fallback_used)
                .await
            {
                Ok(action) => action,
                Err(e) => RecoveryAction::proceed(format!("recovery unavailable: {e}")),
            };

            match (action.action_type, action.alternative_service_id) {
                (RecoveryActionType::Retry, _) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return outcome.failed(QueueStatus::Failed, format!("execution stopped during backoff: {error}"));
                        }
                        _ = tokio::time::sleep(Duration::from_secs(action.delay_seconds)) => {}
                    }
                    entry.retry_count += 1;
                }
                (RecoveryActionType::Fallback, Some(alternative)) => {
                    outcome.fallback_used = true;
                    entry.assigned_service_id = Some(alternative);
                }
                (RecoveryActionType::FailFast, _) => {
                    let mut failed = outcome.failed(QueueStatus::Failed, error.to_string());
                    failed.aborted = true;
                    return failed;
                }
                (RecoveryActionType::Fallback, None) | (RecoveryActionType::Continue, _) => {
                    return outcome.failed(QueueStatus::Failed, error.to_string());
                }
            }

            // Back to pending, then re-claim for the next attempt
            if let Err(e) = self.transition(&mut entry, QueueStatus::Pending).await {
                return outcome.failed(QueueStatus::Failed, e.to_string());
            }
            if let Err(e) = self.transition(&mut entry, QueueStatus::Assigned).await {
                return outcome.failed(QueueStatus::Failed, e.to_string());
            }
        }
    }

    /// One call of `task` on `service_id`: slot, invoke, wait, fetch, release
    async fn attempt(
        &self,
        task: &Task,
        entry: &mut QueueEntry,
        service_id: ServiceId,
        token: &CancellationToken,
    ) -> Result<Value> {
        let timeout = self.task_timeout(task);
        let service = self
            .registry
            .get(service_id)
            .ok_or_else(|| LabflowError::service_not_found(service_id))?;

        self.registry.acquire_slot(service_id, timeout, token).await?;

        let result = match self.transition(entry, QueueStatus::Running).await {
            Ok(()) => {
                entry.actual_start_time = Some(Utc::now());
                log_task_operation(events::TASK_STARTED, task.workflow_id, task.id, Some(service_id), "running", None);
                self.call_service(task, &service, timeout, token).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.registry.release_slot(service_id).await {
            warn!(service_id = service_id, error = %e, "🔧 EXECUTOR: Failed to release service slot");
        }
        result
    }

    async fn call_service(
        &self,
        task: &Task,
        service: &Service,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Value> {
        let caller = self.registry.adapters().resolve(&service.service_type)?;
        let action = actions::for_service_type(&service.service_type);
        let payload = build_payload(task);
        let remote_failure = |reason: String| LabflowError::RemoteFailure {
            endpoint: service.endpoint.clone(),
            reason,
        };

        // One budget covers the invocation and the wait for completion
        let deadline = Instant::now() + timeout;
        let response = match tokio::time::timeout_at(deadline, caller.invoke(&service.endpoint, action, &payload, timeout)).await {
            Ok(response) => response?,
            Err(_) => return Err(remote_failure(format!("invoke timed out after {}s", timeout.as_secs()))),
        };
        if !response.accepted {
            return Err(remote_failure(format!("service rejected '{action}'")));
        }

        let outcome = wait_for_completion(
            caller.as_ref(),
            &service.endpoint,
            self.config.poll_interval(),
            deadline.saturating_duration_since(Instant::now()),
            token,
        )
        .await;

        match outcome {
            WaitOutcome::Completed => Ok(caller.fetch_results(&service.endpoint).await?),
            WaitOutcome::Failed(reason) => Err(remote_failure(reason)),
            WaitOutcome::Aborted(reason) => Err(remote_failure(format!("aborted: {reason}"))),
            WaitOutcome::TimedOut => {
                self.reset_instrument(caller.as_ref(), &service.endpoint).await;
                Err(remote_failure(format!("timed out after {}s", timeout.as_secs())))
            }
            WaitOutcome::Cancelled => {
                self.reset_instrument(caller.as_ref(), &service.endpoint).await;
                Err(remote_failure("cancelled while waiting for completion".to_string()))
            }
        }
    }

    async fn reset_instrument(&self, caller: &dyn ServiceCaller, endpoint: &str) {
        if let Err(e) = caller.reset(endpoint).await {
            warn!(endpoint = %endpoint, error = %e, "🔧 EXECUTOR: Instrument reset failed");
        }
    }

    /// Decide what to do after `task` failed on `failed_service`.
    ///
    /// `Retry` keeps retrying with exponential backoff until `max_retries`
    /// retries have been spent, then behaves like `Fallback`. `Fallback` moves
    /// to the best alternative service once; without an alternative the task
    /// is given up like `Continue`.
    pub async fn handle_service_failure(
        &self,
        task: &Task,
        entry: &QueueEntry,
        failed_service: ServiceId,
        strategy: RecoveryStrategy,
        fallback_used: bool,
    ) -> Result<RecoveryAction> {
        let action = match strategy {
            RecoveryStrategy::FailFast => RecoveryAction::fail_fast(format!("task {} failed, stopping workflow", task.id)),
            RecoveryStrategy::Continue => RecoveryAction::proceed(format!("task {} failed, continuing", task.id)),
            RecoveryStrategy::Retry if entry.retry_count < self.max_retries(task) => {
                let backoff = self.backoff.calculate(entry.retry_count);
                log_task_operation(
                    events::TASK_RETRY_REQUESTED,
                    task.workflow_id,
                    task.id,
                    Some(failed_service),
                    "retrying",
                    Some(&format!("retry={} delay={}s", entry.retry_count + 1, backoff.delay_seconds)),
                );
                RecoveryAction {
                    action_type: RecoveryActionType::Retry,
                    alternative_service_id: None,
                    retry_count: entry.retry_count + 1,
                    delay_seconds: backoff.delay_seconds,
                    message: format!("retry {} of {}", entry.retry_count + 1, self.max_retries(task)),
                }
            }
            RecoveryStrategy::Retry | RecoveryStrategy::Fallback => {
                self.fallback_action(task, entry, failed_service, fallback_used).await?
            }
        };
        Ok(action)
    }

    async fn fallback_action(
        &self,
        task: &Task,
        entry: &QueueEntry,
        failed_service: ServiceId,
        fallback_used: bool,
    ) -> Result<RecoveryAction> {
        let mut action = RecoveryAction {
            action_type: RecoveryActionType::Fallback,
            alternative_service_id: None,
            retry_count: entry.retry_count,
            delay_seconds: 0,
            message: String::new(),
        };

        if fallback_used {
            action.message = "fallback already attempted".to_string();
            return Ok(action);
        }

        let requirements = self.requirements.resolve(task).await?;
        let available: Vec<Service> = self
            .registry
            .get_available(Some(&task.name), None)
            .await?
            .into_iter()
            .filter(|s| s.id != failed_service)
            .collect();
        let alternatives = self
            .registry
            .matcher()
            .find_alternatives(failed_service, &requirements, &available)
            .await?;

        match alternatives.first() {
            Some(alternative) => {
                info!(
                    task_id = task.id,
                    failed_service = failed_service,
                    alternative = alternative.id,
                    "🔀 EXECUTOR: Falling back to alternative service"
                );
                log_task_operation(
                    events::TASK_FALLBACK_REQUESTED,
                    task.workflow_id,
                    task.id,
                    Some(alternative.id),
                    "fallback",
                    Some(&format!("from service {failed_service}")),
                );
                action.alternative_service_id = Some(alternative.id);
                action.message = format!("falling back to service {}", alternative.id);
            }
            None => {
                action.message = "no alternative service available".to_string();
            }
        }
        Ok(action)
    }
}

/// Service parameters plus a `sample_id` when the task does not set one
pub fn build_payload(task: &Task) -> Value {
    let mut payload: Map<String, Value> = task
        .service_parameters
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    payload
        .entry("sample_id")
        .or_insert_with(|| Value::String(task.sample_id()));
    Value::Object(payload)
}
