//! # Workflow Engine
//!
//! Drives whole workflows through execution and exposes the operator
//! controls (cancel, pause, resume, stop).
//!
//! ## Overview
//!
//! Execution schedules any task that has no queue entry yet, moves the
//! workflow to `running` and dispatches tasks in one of two ways:
//!
//! - **Sequential**: one task at a time in `order_index` order
//! - **Parallel / Optimized**: dependency levels in order, every task of a
//!   level concurrently; a task whose prerequisites did not complete is
//!   skipped and counted as failed
//!
//! Pause and cancellation are honored at task and level boundaries. Stop
//! additionally interrupts in-flight remote waits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = WorkflowEngine::from_config(persistence, adapters, &config);
//! let result = engine.execute_workflow(workflow_id, None, None, None).await?;
//! assert_eq!(result.completed_tasks + result.failed_tasks, result.total_tasks);
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dependency_levels::DependencyGraph;
use super::task_executor::TaskExecutor;
use super::types::{BatchOrdering, BatchResult, ExecutionMode, ExecutionResult, RecoveryStrategy, TaskOutcome};
use crate::config::{EngineConfig, LabflowConfig};
use crate::constants::events;
use crate::error::{LabflowError, Result};
use crate::logging::log_workflow_operation;
use crate::matching::{CapabilityMatcher, CapabilityWeights};
use crate::models::{QueueEntry, Task, TaskId, UserPreferences, WorkflowId};
use crate::persistence::{Persistence, QueueFilter};
use crate::registry::{AdapterRegistry, ServiceRegistry};
use crate::scheduling::TaskScheduler;
use crate::state_machine::{QueueStatus, StateGuard, WorkflowState, WorkflowTransitionGuard};

/// Per-execution control handles
struct WorkflowControl {
    /// Stops dispatching further tasks
    halt: CancellationToken,
    /// Interrupts in-flight slot and remote waits
    abort: CancellationToken,
    paused: watch::Sender<bool>,
    stopped: AtomicBool,
}

/// Removes the control entry when an execution ends, however it ends
struct ControlGuard<'a> {
    controls: &'a DashMap<WorkflowId, Arc<WorkflowControl>>,
    workflow_id: WorkflowId,
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        self.controls.remove(&self.workflow_id);
    }
}

/// The queue entry a task will be executed from
enum TaskEntry {
    Pending(QueueEntry),
    AlreadyCompleted(QueueEntry),
    Missing,
}

pub struct WorkflowEngine {
    persistence: Arc<dyn Persistence>,
    registry: Arc<ServiceRegistry>,
    scheduler: Arc<TaskScheduler>,
    executor: TaskExecutor,
    config: EngineConfig,
    controls: DashMap<WorkflowId, Arc<WorkflowControl>>,
    shutdown: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        registry: Arc<ServiceRegistry>,
        scheduler: Arc<TaskScheduler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor: TaskExecutor::new(Arc::clone(&persistence), Arc::clone(&registry), config.clone()),
            persistence,
            registry,
            scheduler,
            config,
            controls: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire the registry, scheduler and engine from one configuration
    pub fn from_config(
        persistence: Arc<dyn Persistence>,
        adapters: Arc<AdapterRegistry>,
        config: &LabflowConfig,
    ) -> Self {
        let matcher = Arc::new(CapabilityMatcher::with_weights(
            Arc::clone(&persistence),
            CapabilityWeights::from_config(&config.matcher),
        ));
        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&persistence),
            adapters,
            matcher,
            config.registry.clone(),
        ));
        let scheduler = Arc::new(
            TaskScheduler::new(Arc::clone(&persistence), Arc::clone(&registry), config.scheduler.clone())
                .with_top_candidates(config.matcher.top_candidates),
        );
        Self::new(persistence, registry, scheduler, config.engine.clone())
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether an execution of this workflow is in progress
    pub fn is_executing(&self, workflow_id: WorkflowId) -> bool {
        self.controls.contains_key(&workflow_id)
    }

    /// Interrupt every execution in progress
    pub fn shutdown(&self) {
        info!(active = self.controls.len(), "🚀 ENGINE: Shutting down");
        for control in self.controls.iter() {
            control.halt.cancel();
        }
        self.shutdown.cancel();
    }

    /// Execute a workflow to a terminal state
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        mode: Option<ExecutionMode>,
        recovery: Option<RecoveryStrategy>,
        preferences: Option<&UserPreferences>,
    ) -> Result<ExecutionResult> {
        let mode = mode.unwrap_or(self.config.default_execution_mode);
        let recovery = recovery.unwrap_or(self.config.default_recovery_strategy);
        let started = Instant::now();

        let workflow = self
            .persistence
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| LabflowError::not_found("Workflow", workflow_id))?;
        if !workflow.status.is_executable() {
            return Err(LabflowError::StateTransition(format!(
                "workflow {workflow_id} is {} and cannot be executed",
                workflow.status
            )));
        }

        let mut tasks = self.persistence.load_tasks_for_workflow(workflow_id).await?;
        if tasks.is_empty() {
            return Err(LabflowError::validation(format!("workflow {workflow_id} has no tasks")));
        }
        tasks.sort_by_key(|t| (t.order_index, t.id));

        let control = Arc::new(WorkflowControl {
            halt: CancellationToken::new(),
            abort: self.shutdown.child_token(),
            paused: watch::channel(false).0,
            stopped: AtomicBool::new(false),
        });
        match self.controls.entry(workflow_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(LabflowError::ConcurrencyConflict(format!(
                    "workflow {workflow_id} is already executing"
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&control));
            }
        }
        let _guard = ControlGuard {
            controls: &self.controls,
            workflow_id,
        };

        let mut result = ExecutionResult {
            workflow_id,
            success: false,
            final_status: WorkflowState::Running,
            total_tasks: tasks.len(),
            completed_tasks: 0,
            failed_tasks: 0,
            execution_time_seconds: 0.0,
            task_results: Vec::with_capacity(tasks.len()),
            skipped_task_ids: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        info!(
            workflow_id = workflow_id,
            mode = %mode,
            recovery = %recovery,
            tasks = tasks.len(),
            "🚀 ENGINE: Executing workflow"
        );

        if !self.scheduler.unscheduled_tasks(workflow_id).await?.is_empty() {
            let scheduled = self.scheduler.schedule_workflow(workflow_id, preferences, None).await?;
            result.errors.extend(scheduled.errors);
            result.warnings.extend(scheduled.warnings);
        }

        let task_ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        let dependencies = self.persistence.load_dependencies(workflow_id).await?;
        let graph = DependencyGraph::build(workflow_id, &task_ids, &dependencies)?;

        self.move_workflow(workflow_id, WorkflowState::Running).await?;
        log_workflow_operation(events::WORKFLOW_STARTED, workflow_id, "running", Some(&mode.to_string()));

        let outcomes = if mode.is_level_based() {
            self.run_levels(&tasks, &graph, recovery, &control).await?
        } else {
            self.run_sequential(&tasks, recovery, &control).await?
        };

        let mut by_task: HashMap<TaskId, TaskOutcome> =
            outcomes.into_iter().map(|o| (o.task_id, o)).collect();
        for task in &tasks {
            let outcome = by_task.remove(&task.id).unwrap_or_else(|| {
                TaskOutcome::new(task.id, task.name.clone()).failed(QueueStatus::Cancelled, "task was not executed")
            });
            if !outcome.is_success() && outcome.attempts == 0 {
                result.skipped_task_ids.push(task.id);
            }
            if outcome.is_success() {
                result.completed_tasks += 1;
            } else {
                result.failed_tasks += 1;
                if let Some(error) = &outcome.error {
                    result.errors.push(format!("Task {} ({}): {error}", task.id, task.name));
                }
            }
            result.task_results.push(outcome);
        }

        result.final_status = self.finish_workflow(workflow_id, &result, &control).await?;
        result.success = result.final_status == WorkflowState::Completed;
        result.execution_time_seconds = started.elapsed().as_secs_f64();

        let event = match result.final_status {
            WorkflowState::Completed => events::WORKFLOW_COMPLETED,
            WorkflowState::Cancelled => events::WORKFLOW_CANCELLED,
            WorkflowState::Stopped => events::WORKFLOW_STOPPED,
            _ => events::WORKFLOW_FAILED,
        };
        log_workflow_operation(
            event,
            workflow_id,
            &result.final_status.to_string(),
            Some(&format!(
                "completed={} failed={} skipped={}",
                result.completed_tasks,
                result.failed_tasks,
                result.skipped_task_ids.len()
            )),
        );

        Ok(result)
    }

    async fn run_sequential(
        &self,
        tasks: &[Task],
        recovery: RecoveryStrategy,
        control: &WorkflowControl,
    ) -> Result<Vec<TaskOutcome>> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            if !self.wait_while_paused(control).await {
                break;
            }
            let outcome = self.run_task(task, recovery, control).await?;
            let aborted = outcome.aborted;
            outcomes.push(outcome);
            if aborted {
                break;
            }
        }
        Ok(outcomes)
    }

    async fn run_levels(
        &self,
        tasks: &[Task],
        graph: &DependencyGraph,
        recovery: RecoveryStrategy,
        control: &WorkflowControl,
    ) -> Result<Vec<TaskOutcome>> {
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut outcomes = Vec::with_capacity(tasks.len());

        for (depth, level) in graph.levels().into_iter().enumerate() {
            if !self.wait_while_paused(control).await {
                break;
            }

            let mut runnable = Vec::with_capacity(level.len());
            for task_id in level {
                let Some(task) = by_id.get(&task_id) else { continue };
                let blocked = graph
                    .prerequisites(task_id)
                    .iter()
                    .any(|prerequisite| !completed.contains(prerequisite));
                if blocked {
                    outcomes.push(
                        TaskOutcome::new(task.id, task.name.clone())
                            .failed(QueueStatus::Cancelled, "a prerequisite did not complete"),
                    );
                } else {
                    runnable.push(*task);
                }
            }

            info!(level = depth, tasks = runnable.len(), "🚀 ENGINE: Dispatching level");

            let level_outcomes = join_all(runnable.into_iter().map(|task| self.run_task(task, recovery, control))).await;
            let mut aborted = false;
            for outcome in level_outcomes {
                let outcome = outcome?;
                if outcome.is_success() {
                    completed.insert(outcome.task_id);
                }
                aborted |= outcome.aborted;
                outcomes.push(outcome);
            }
            if aborted {
                break;
            }
        }
        Ok(outcomes)
    }

    async fn run_task(
        &self,
        task: &Task,
        recovery: RecoveryStrategy,
        control: &WorkflowControl,
    ) -> Result<TaskOutcome> {
        match self.entry_for(task.id).await? {
            TaskEntry::Pending(entry) => Ok(self.executor.execute(task, entry, recovery, &control.abort).await),
            TaskEntry::AlreadyCompleted(entry) => {
                let mut outcome = TaskOutcome::new(task.id, task.name.clone());
                outcome.status = QueueStatus::Completed;
                outcome.service_id = entry.assigned_service_id;
                outcome.started_at = entry.actual_start_time;
                outcome.completed_at = entry.actual_completion_time;
                Ok(outcome)
            }
            TaskEntry::Missing => Ok(TaskOutcome::new(task.id, task.name.clone())
                .failed(QueueStatus::Failed, "task has no pending queue entry")),
        }
    }

    async fn entry_for(&self, task_id: TaskId) -> Result<TaskEntry> {
        let entries = self
            .persistence
            .load_queue_entries(&QueueFilter::for_task(task_id).with_statuses(&[QueueStatus::Pending, QueueStatus::Completed]))
            .await?;
        let pending = entries.iter().filter(|e| e.status == QueueStatus::Pending).max_by_key(|e| e.created_at);
        if let Some(entry) = pending {
            return Ok(TaskEntry::Pending(entry.clone()));
        }
        Ok(entries
            .into_iter()
            .max_by_key(|e| e.created_at)
            .map_or(TaskEntry::Missing, TaskEntry::AlreadyCompleted))
    }

    /// Returns `false` when dispatch has been halted
    async fn wait_while_paused(&self, control: &WorkflowControl) -> bool {
        let mut paused = control.paused.subscribe();
        loop {
            if control.halt.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            info!("⏸️ ENGINE: Waiting for resume");
            tokio::select! {
                _ = control.halt.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    async fn finish_workflow(
        &self,
        workflow_id: WorkflowId,
        result: &ExecutionResult,
        control: &WorkflowControl,
    ) -> Result<WorkflowState> {
        let current = self.current_state(workflow_id).await?;
        let target = if current.is_terminal() {
            current
        } else if control.stopped.load(Ordering::Acquire) {
            WorkflowState::Stopped
        } else if result.failed_tasks == 0 {
            WorkflowState::Completed
        } else {
            WorkflowState::Failed
        };

        if !current.is_terminal() {
            if current == WorkflowState::Paused && !WorkflowTransitionGuard::allows(current, target) {
                self.move_workflow(workflow_id, WorkflowState::Running).await?;
            }
            self.move_workflow(workflow_id, target).await?;
        }

        // Entries of tasks that were never dispatched must not outlive the run
        if target != WorkflowState::Completed {
            let released = self.cancel_pending_entries(workflow_id).await?;
            if released > 0 {
                info!(
                    workflow_id = workflow_id,
                    entries = released,
                    final_status = %target,
                    "🚀 ENGINE: Cancelled undispatched queue entries"
                );
            }
        }
        Ok(target)
    }

    async fn current_state(&self, workflow_id: WorkflowId) -> Result<WorkflowState> {
        Ok(self
            .persistence
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| LabflowError::not_found("Workflow", workflow_id))?
            .status)
    }

    async fn move_workflow(&self, workflow_id: WorkflowId, to: WorkflowState) -> Result<WorkflowState> {
        let from = self.current_state(workflow_id).await?;
        WorkflowTransitionGuard.check(from, to)?;
        self.persistence.update_workflow_status(workflow_id, to).await?;
        Ok(from)
    }

    /// Cancel the workflow's pending queue entries. Returns how many entries
    /// this call cancelled.
    async fn cancel_pending_entries(&self, workflow_id: WorkflowId) -> Result<usize> {
        let pending = self
            .persistence
            .load_queue_entries(&QueueFilter::for_workflow(workflow_id).with_statuses(&[QueueStatus::Pending]))
            .await?;
        let mut cancelled = 0;
        for entry in pending {
            let mut update = entry;
            update.status = QueueStatus::Cancelled;
            update.updated_at = chrono::Utc::now();
            if self
                .persistence
                .update_queue_entry_if_status(&update, QueueStatus::Pending)
                .await?
            {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Cancel every pending queue entry of the workflow and mark it
    /// cancelled. Tasks already running finish on their own; no further task
    /// is dispatched.
    pub async fn cancel_workflow_execution(&self, workflow_id: WorkflowId) -> Result<usize> {
        let from = self.move_workflow(workflow_id, WorkflowState::Cancelled).await?;
        let cancelled = self.cancel_pending_entries(workflow_id).await?;
        if let Some(control) = self.controls.get(&workflow_id) {
            control.halt.cancel();
        }
        log_workflow_operation(
            events::WORKFLOW_CANCELLED,
            workflow_id,
            "cancelled",
            Some(&format!("from={from} cancelled_entries={cancelled}")),
        );
        Ok(cancelled)
    }

    /// Hold the workflow at its next task or level boundary
    pub async fn pause_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        let control = self.active_control(workflow_id)?;
        self.move_workflow(workflow_id, WorkflowState::Paused).await?;
        control.paused.send_replace(true);
        log_workflow_operation(events::WORKFLOW_PAUSED, workflow_id, "paused", None);
        Ok(())
    }

    pub async fn resume_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        let control = self.active_control(workflow_id)?;
        self.move_workflow(workflow_id, WorkflowState::Running).await?;
        control.paused.send_replace(false);
        log_workflow_operation(events::WORKFLOW_RESUMED, workflow_id, "running", None);
        Ok(())
    }

    /// Interrupt the workflow: in-flight remote waits are abandoned, pending
    /// entries are cancelled and the workflow ends `stopped`
    pub async fn stop_workflow(&self, workflow_id: WorkflowId) -> Result<()> {
        let control = self.active_control(workflow_id)?;
        control.stopped.store(true, Ordering::Release);
        control.halt.cancel();
        control.abort.cancel();
        let cancelled = self.cancel_pending_entries(workflow_id).await?;
        log_workflow_operation(
            events::WORKFLOW_STOPPED,
            workflow_id,
            "stopping",
            Some(&format!("cancelled_entries={cancelled}")),
        );
        Ok(())
    }

    fn active_control(&self, workflow_id: WorkflowId) -> Result<Arc<WorkflowControl>> {
        self.controls
            .get(&workflow_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| LabflowError::StateTransition(format!("workflow {workflow_id} is not executing")))
    }

    /// Execute several workflows with bounded concurrency. Per-workflow
    /// errors are reported as failed results rather than failing the batch.
    pub async fn batch_execute(
        &self,
        workflow_ids: &[WorkflowId],
        ordering: BatchOrdering,
        max_concurrent: Option<usize>,
    ) -> Result<BatchResult> {
        let max_concurrent = max_concurrent.unwrap_or(self.config.batch_max_concurrent).max(1);
        let started = Instant::now();
        let ordered = self.order_batch(workflow_ids, ordering).await?;

        info!(
            workflows = ordered.len(),
            ordering = ?ordering,
            max_concurrent = max_concurrent,
            "🚀 ENGINE: Executing batch"
        );

        let permits = Arc::new(Semaphore::new(max_concurrent));
        let results = join_all(ordered.iter().map(|&workflow_id| {
            let permits = Arc::clone(&permits);
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return ExecutionResult::failure(workflow_id, e.to_string()),
                };
                match self.execute_workflow(workflow_id, None, None, None).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(workflow_id = workflow_id, error = %e, "🚀 ENGINE: Workflow in batch failed");
                        ExecutionResult::failure(workflow_id, e.to_string())
                    }
                }
            }
        }))
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        let successful = results.iter().filter(|r| r.success).count();
        let hours = elapsed / 3600.0;
        let errors = results
            .iter()
            .filter(|r| !r.success)
            .flat_map(|r| r.errors.iter().map(move |e| format!("Workflow {}: {e}", r.workflow_id)))
            .collect();

        Ok(BatchResult {
            total_workflows: results.len(),
            successful_workflows: successful,
            failed_workflows: results.len() - successful,
            throughput_per_hour: if hours > 0.0 { results.len() as f64 / hours } else { 0.0 },
            total_execution_time_seconds: elapsed,
            results,
            errors,
        })
    }

    async fn order_batch(&self, workflow_ids: &[WorkflowId], ordering: BatchOrdering) -> Result<Vec<WorkflowId>> {
        let mut keyed: Vec<(u64, WorkflowId)> = Vec::with_capacity(workflow_ids.len());
        for &workflow_id in workflow_ids {
            let key = match ordering {
                BatchOrdering::Fifo => 0,
                BatchOrdering::Priority => self
                    .persistence
                    .load_workflow(workflow_id)
                    .await?
                    .map_or(u64::MAX, |w| u64::from(w.priority)),
                BatchOrdering::Throughput => self
                    .scheduler
                    .estimate_execution(workflow_id)
                    .await
                    .map_or(u64::MAX, |e| e.critical_path_duration_seconds),
            };
            keyed.push((key, workflow_id));
        }
        // Stable sort keeps the given order among equal keys
        keyed.sort_by_key(|(key, _)| *key);
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }
}
