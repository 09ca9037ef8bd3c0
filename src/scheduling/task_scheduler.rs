//! # Task Scheduler
//!
//! Assigns workflow tasks to services and maintains the per-service queues.
//!
//! ## Overview
//!
//! Scheduling is per task and never aborts a workflow: a task without a
//! compatible, available service is counted as failed and the remaining tasks
//! are still scheduled. Queue writes are serialized by a queue lock so that
//! positions stay consistent with `(priority, created_at)`; entries already
//! claimed by an executor are never overwritten because position and rebalance
//! writes are compare-and-set on the pending status.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use labflow_core::scheduling::{SchedulingStrategy, TaskScheduler};
//! # async fn example(scheduler: TaskScheduler) -> labflow_core::Result<()> {
//! let result = scheduler
//!     .schedule_workflow(42, None, Some(SchedulingStrategy::DeadlineAware))
//!     .await?;
//! println!("{} scheduled, {} failed", result.scheduled_tasks, result.failed_tasks);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::priority::PriorityCalculator;
use super::requirements::RequirementsResolver;
use super::SchedulingStrategy;
use crate::config::SchedulerConfig;
use crate::constants::{events, system};
use crate::error::{LabflowError, Result};
use crate::logging::{log_task_operation, log_workflow_operation};
use crate::matching::{MatchScore, CapabilityMatcher};
use crate::models::{
    QueueEntry, Service, ServiceId, Task, TaskId, TaskRequirements, UserPreferences, WorkflowId,
};
use crate::orchestration::dependency_levels::DependencyGraph;
use crate::persistence::{Persistence, QueueFilter};
use crate::registry::{LoadBalancingStrategy, SelectionContext, ServiceRegistry};
use crate::state_machine::{QueueStatus, WorkflowState};

/// Outcome of scheduling a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub workflow_id: WorkflowId,
    pub success: bool,
    pub scheduled_tasks: usize,
    pub failed_tasks: usize,
    /// Tasks that already had a live queue entry
    pub already_queued_tasks: usize,
    pub estimated_start_time: Option<DateTime<Utc>>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub assigned_services: HashMap<TaskId, ServiceId>,
    pub queue_positions: HashMap<TaskId, u32>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ScheduleResult {
    fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            success: true,
            scheduled_tasks: 0,
            failed_tasks: 0,
            already_queued_tasks: 0,
            estimated_start_time: None,
            estimated_completion_time: None,
            assigned_services: HashMap::new(),
            queue_positions: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEstimate {
    pub workflow_id: WorkflowId,
    /// Sum of every task's estimate, as if run one after another
    pub total_estimated_duration_seconds: u64,
    pub critical_path_duration_seconds: u64,
    pub critical_path: Vec<TaskId>,
    pub earliest_start_time: DateTime<Utc>,
    pub estimated_completion_time: DateTime<Utc>,
    pub task_durations: HashMap<TaskId, u64>,
    /// Tasks with no prerequisites
    pub parallelizable_tasks: Vec<TaskId>,
    /// Services assigned more of this workflow's tasks than they can run at once
    pub bottlenecks: Vec<ServiceId>,
    pub cost_estimate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub total_pending: usize,
    pub reassigned_entries: usize,
    pub boosted_entries: usize,
    /// Entries claimed by an executor while being rebalanced
    pub conflicts: usize,
    /// Another rebalance was already running
    pub skipped: bool,
    pub completed_at: DateTime<Utc>,
}

impl RebalanceReport {
    fn empty(skipped: bool) -> Self {
        Self {
            total_pending: 0,
            reassigned_entries: 0,
            boosted_entries: 0,
            conflicts: 0,
            skipped,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUtilization {
    pub service_id: ServiceId,
    pub service_name: String,
    pub current_load: u32,
    pub max_tasks: u32,
    pub utilization_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatusReport {
    pub total_entries: usize,
    pub status_breakdown: BTreeMap<String, usize>,
    /// Mean seconds since creation, per status
    pub average_wait_seconds: BTreeMap<String, f64>,
    pub service_utilization: Vec<ServiceUtilization>,
    pub generated_at: DateTime<Utc>,
}

/// Statuses that count as the task's one live queue entry
const LIVE_STATUSES: &[QueueStatus] = &[
    QueueStatus::Pending,
    QueueStatus::Assigned,
    QueueStatus::Running,
    QueueStatus::Completed,
];

enum Placement {
    Created(QueueEntry),
    Existing(QueueEntry),
}

/// Resets the in-flight flag when a rebalance finishes
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TaskScheduler {
    persistence: Arc<dyn Persistence>,
    registry: Arc<ServiceRegistry>,
    requirements: RequirementsResolver,
    priorities: PriorityCalculator,
    config: SchedulerConfig,
    top_candidates: usize,
    queue_lock: tokio::sync::Mutex<()>,
    rebalancing: AtomicBool,
    last_created_at: parking_lot::Mutex<DateTime<Utc>>,
}

impl TaskScheduler {
    pub fn new(persistence: Arc<dyn Persistence>, registry: Arc<ServiceRegistry>, config: SchedulerConfig) -> Self {
        Self {
            requirements: RequirementsResolver::new(Arc::clone(&persistence)),
            priorities: PriorityCalculator::new(Arc::clone(&persistence), config.clone()),
            persistence,
            registry,
            config,
            top_candidates: system::TOP_CANDIDATES,
            queue_lock: tokio::sync::Mutex::new(()),
            rebalancing: AtomicBool::new(false),
            last_created_at: parking_lot::Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Number of ranked candidates handed to the load balancer
    pub fn with_top_candidates(mut self, top_candidates: usize) -> Self {
        self.top_candidates = top_candidates.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn matcher(&self) -> &Arc<CapabilityMatcher> {
        self.registry.matcher()
    }

    /// Strictly increasing creation timestamps keep queue keys distinct
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self.last_created_at.lock();
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + ChronoDuration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Schedule every task of a workflow that does not already hold a live
    /// queue entry. Fails only for a missing workflow or a cyclic task graph.
    pub async fn schedule_workflow(
        &self,
        workflow_id: WorkflowId,
        preferences: Option<&UserPreferences>,
        strategy: Option<SchedulingStrategy>,
    ) -> Result<ScheduleResult> {
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        let workflow = self
            .persistence
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| LabflowError::not_found("Workflow", workflow_id))?;

        info!(
            workflow_id = workflow_id,
            strategy = %strategy,
            "📅 SCHEDULER: Scheduling workflow"
        );

        let tasks = self.persistence.load_tasks_for_workflow(workflow_id).await?;
        let mut result = ScheduleResult::new(workflow_id);
        if tasks.is_empty() {
            result.success = false;
            result.errors.push("No tasks found in workflow".to_string());
            return Ok(result);
        }

        let task_ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        let dependencies = self.persistence.load_dependencies(workflow_id).await?;
        DependencyGraph::build(workflow_id, &task_ids, &dependencies)?;

        let live = self.live_entries_by_task(workflow_id).await?;

        for task in &tasks {
            if let Some(existing) = live.get(&task.id) {
                result.already_queued_tasks += 1;
                if let Some(service_id) = existing.assigned_service_id {
                    result.assigned_services.insert(task.id, service_id);
                }
                if let Some(position) = existing.queue_position {
                    result.queue_positions.insert(task.id, position);
                }
                continue;
            }

            match self.place_task(task, preferences, strategy).await {
                Ok(placement) => {
                    let entry = match placement {
                        Placement::Created(entry) => {
                            result.scheduled_tasks += 1;
                            entry
                        }
                        Placement::Existing(entry) => {
                            result.already_queued_tasks += 1;
                            entry
                        }
                    };
                    if let Some(service_id) = entry.assigned_service_id {
                        result.assigned_services.insert(task.id, service_id);
                    }
                    result.queue_positions.insert(task.id, entry.queue_position.unwrap_or(0));
                }
                Err(e) => {
                    warn!(
                        workflow_id = workflow_id,
                        task_id = task.id,
                        error = %e,
                        "📅 SCHEDULER: Task could not be scheduled"
                    );
                    result.failed_tasks += 1;
                    result
                        .errors
                        .push(format!("Failed to schedule task {}: {} ({e})", task.id, task.name));
                }
            }
        }

        if result.scheduled_tasks + result.already_queued_tasks > 0 {
            match self.estimate_execution(workflow_id).await {
                Ok(estimate) => {
                    result.estimated_start_time = Some(estimate.earliest_start_time);
                    result.estimated_completion_time = Some(estimate.estimated_completion_time);
                }
                Err(e) => result.warnings.push(format!("Execution estimate unavailable: {e}")),
            }

            if workflow.status == WorkflowState::Pending {
                self.persistence
                    .update_workflow_status(workflow_id, WorkflowState::Scheduled)
                    .await?;
            }
        }

        result.success = result.failed_tasks == 0;

        log_workflow_operation(
            events::WORKFLOW_SCHEDULED,
            workflow_id,
            if result.success { "scheduled" } else { "partially_scheduled" },
            Some(&format!(
                "scheduled={} failed={} already_queued={}",
                result.scheduled_tasks, result.failed_tasks, result.already_queued_tasks
            )),
        );

        Ok(result)
    }

    /// Pending, in-flight or completed entries of a workflow keyed by task
    async fn live_entries_by_task(&self, workflow_id: WorkflowId) -> Result<HashMap<TaskId, QueueEntry>> {
        let entries = self
            .persistence
            .load_queue_entries(&QueueFilter::for_workflow(workflow_id).with_statuses(LIVE_STATUSES))
            .await?;
        Ok(entries.into_iter().map(|e| (e.task_id, e)).collect())
    }

    /// Queue entry for one task: the live one if the task already holds one,
    /// otherwise a new entry
    pub async fn schedule_single_task(
        &self,
        task: &Task,
        preferences: Option<&UserPreferences>,
        strategy: SchedulingStrategy,
    ) -> Result<QueueEntry> {
        Ok(match self.place_task(task, preferences, strategy).await? {
            Placement::Created(entry) | Placement::Existing(entry) => entry,
        })
    }

    async fn place_task(
        &self,
        task: &Task,
        preferences: Option<&UserPreferences>,
        strategy: SchedulingStrategy,
    ) -> Result<Placement> {
        let user_id = preferences.and_then(|p| p.user_id.as_deref());
        // Busy services stay candidates; the entry waits for a slot at execution
        let available = self.registry.get_schedulable(Some(&task.name), user_id).await?;
        if available.is_empty() {
            return Err(LabflowError::Capacity(format!(
                "no service is online or busy to take task {}",
                task.id
            )));
        }

        let (service, score) = self
            .resolve_service(task, &available, preferences)
            .await?
            .ok_or_else(|| LabflowError::Incompatible {
                task_id: task.id,
                reason: "no available service meets the required capabilities".to_string(),
            })?;

        let now = Utc::now();
        let priority = self.priorities.priority_for(task, strategy, now);
        let duration = self.priorities.estimate_duration(task, Some(service.id)).await?;

        let _queue = self.queue_lock.lock().await;
        // Another scheduler may have queued the task since the caller looked
        if let Some(existing) = self
            .persistence
            .load_queue_entries(&QueueFilter::for_task(task.id).with_statuses(LIVE_STATUSES))
            .await?
            .into_iter()
            .next()
        {
            debug!(task_id = task.id, entry_id = %existing.id, "📅 SCHEDULER: Task already queued");
            return Ok(Placement::Existing(existing));
        }

        let mut entry = QueueEntry::new(task.workflow_id, task.id, Some(service.id), priority, self.next_created_at());
        if let Some(max_retries) = task.max_retries {
            entry.max_retries = max_retries;
        }
        if let Some(timeout) = task.timeout_seconds {
            entry.timeout_seconds = timeout;
        }
        entry.estimated_duration_seconds = duration.as_secs();
        entry.estimated_start_time = Some(now);
        entry.estimated_completion_time = ChronoDuration::from_std(duration).ok().map(|d| now + d);

        self.persistence.save_queue_entry(&entry).await?;
        let positions = self.recompute_positions(service.id).await?;
        entry.queue_position = positions.get(&entry.id).copied();

        log_task_operation(
            events::TASK_QUEUED,
            task.workflow_id,
            task.id,
            Some(service.id),
            "pending",
            Some(&format!(
                "priority={} position={} score={:.2} quality={}",
                priority,
                entry.queue_position.unwrap_or(0),
                score.score,
                score.quality
            )),
        );

        Ok(Placement::Created(entry))
    }

    /// Rank `available` for `task`, apply preferences and let the load balancer
    /// pick among the top candidates
    pub async fn resolve_service(
        &self,
        task: &Task,
        available: &[Service],
        preferences: Option<&UserPreferences>,
    ) -> Result<Option<(Service, MatchScore)>> {
        if available.is_empty() {
            return Ok(None);
        }

        let requirements = self.requirements.resolve(task).await?;
        let ranked = self.rank_candidates(&requirements, available, preferences).await?;
        if ranked.is_empty() {
            debug!(task_id = task.id, "📅 SCHEDULER: No compatible services");
            return Ok(None);
        }

        let candidates: Vec<Service> = ranked
            .iter()
            .take(self.top_candidates)
            .filter_map(|score| available.iter().find(|s| s.id == score.service_id).cloned())
            .collect();

        let context = SelectionContext {
            task_type: Some(task.name.clone()),
            requirements: Some(requirements),
            preferred_services: preferences.map(|p| p.preferred_services.clone()).unwrap_or_default(),
            blacklisted_services: preferences.map(|p| p.blacklisted_services.clone()).unwrap_or_default(),
        };

        let selected = self
            .registry
            .select(&candidates, LoadBalancingStrategy::LeastLoaded, &context)
            .await?;

        Ok(selected.and_then(|service| {
            ranked
                .iter()
                .find(|score| score.service_id == service.id)
                .cloned()
                .map(|score| (service, score))
        }))
    }

    /// Schedulable matches, preferences applied, best first
    async fn rank_candidates(
        &self,
        requirements: &TaskRequirements,
        available: &[Service],
        preferences: Option<&UserPreferences>,
    ) -> Result<Vec<MatchScore>> {
        let mut scores: Vec<MatchScore> = self
            .matcher()
            .match_capabilities(requirements, available)
            .await?
            .into_iter()
            .filter(|score| score.quality.is_schedulable())
            .collect();

        if let Some(preferences) = preferences {
            scores.retain(|score| !preferences.is_blacklisted(score.service_id));
            for score in &mut scores {
                let boost = preferences.preference_boost(score.service_id);
                if boost > 0.0 {
                    score.score = (score.score + boost).min(1.0);
                    score.reasons.push(format!("Preferred by user (+{boost:.1})"));
                }
            }
            scores.sort_by(MatchScore::rank);
        }

        Ok(scores)
    }

    /// Renumber pending entries on a service by `(priority, created_at)`.
    /// Caller holds the queue lock.
    async fn recompute_positions(&self, service_id: ServiceId) -> Result<HashMap<Uuid, u32>> {
        let pending = self
            .persistence
            .load_queue_entries(&QueueFilter::for_service(service_id).with_statuses(&[QueueStatus::Pending]))
            .await?;

        let mut positions = HashMap::with_capacity(pending.len());
        for entry in &pending {
            let ahead = pending.iter().filter(|other| other.is_ahead_of(entry)).count();
            let position = ahead as u32 + 1;
            positions.insert(entry.id, position);

            if entry.queue_position != Some(position) {
                let mut updated = entry.clone();
                updated.queue_position = Some(position);
                // A failed compare-and-set means an executor already claimed it
                self.persistence
                    .update_queue_entry_if_status(&updated, QueueStatus::Pending)
                    .await?;
            }
        }
        Ok(positions)
    }

    /// Re-resolve every pending entry: move it to a strictly better service
    /// (or off an unreachable one) and boost entries that have waited too long.
    /// Returns a skipped report when a rebalance is already running.
    pub async fn rebalance_queue(&self) -> Result<RebalanceReport> {
        if self.rebalancing.swap(true, Ordering::AcqRel) {
            debug!("⚖️ SCHEDULER: Rebalance already in flight, skipping");
            return Ok(RebalanceReport::empty(true));
        }
        let _in_flight = InFlight(&self.rebalancing);
        let _queue = self.queue_lock.lock().await;

        let pending = self
            .persistence
            .load_queue_entries(&QueueFilter::default().with_statuses(&[QueueStatus::Pending]))
            .await?;

        let now = Utc::now();
        let boost_after = ChronoDuration::seconds(self.config.priority_boost_after_seconds as i64);
        let mut report = RebalanceReport::empty(false);
        report.total_pending = pending.len();
        let mut touched: BTreeSet<ServiceId> = BTreeSet::new();

        for entry in pending {
            let Some(task) = self.persistence.load_task(entry.task_id).await? else {
                continue;
            };
            let mut updated = entry.clone();
            let mut changed = false;

            if let Some(target) = self.better_service_for(&task, &entry).await? {
                if let Some(previous) = entry.assigned_service_id {
                    touched.insert(previous);
                }
                touched.insert(target);
                updated.assigned_service_id = Some(target);
                changed = true;
                report.reassigned_entries += 1;
            }

            if entry.waiting_for(now) > boost_after && entry.priority > system::HIGHEST_PRIORITY {
                updated.priority = entry.priority - 1;
                if let Some(service_id) = updated.assigned_service_id {
                    touched.insert(service_id);
                }
                changed = true;
                report.boosted_entries += 1;
            }

            if changed {
                updated.updated_at = now;
                if !self
                    .persistence
                    .update_queue_entry_if_status(&updated, QueueStatus::Pending)
                    .await?
                {
                    report.conflicts += 1;
                }
            }
        }

        for service_id in touched {
            self.recompute_positions(service_id).await?;
        }

        report.completed_at = Utc::now();
        info!(
            total_pending = report.total_pending,
            reassigned = report.reassigned_entries,
            boosted = report.boosted_entries,
            conflicts = report.conflicts,
            "⚖️ SCHEDULER: Queue rebalance complete"
        );
        Ok(report)
    }

    /// A service strictly better than the entry's current one, if any
    async fn better_service_for(&self, task: &Task, entry: &QueueEntry) -> Result<Option<ServiceId>> {
        let available = self.registry.get_available(Some(&task.name), None).await?;
        let current = entry.assigned_service_id.and_then(|id| self.registry.get(id));

        let current_reachable = current.as_ref().is_some_and(|s| s.status.is_reachable());
        if !current_reachable {
            let candidates: Vec<Service> = available
                .into_iter()
                .filter(|s| Some(s.id) != entry.assigned_service_id)
                .collect();
            return Ok(self
                .resolve_service(task, &candidates, None)
                .await?
                .map(|(service, _)| service.id));
        }

        let Some(current) = current else {
            return Ok(None);
        };
        let requirements = self.requirements.resolve(task).await?;
        let ranked = self.rank_candidates(&requirements, &available, None).await?;
        let Some(best) = ranked.first() else {
            return Ok(None);
        };
        if best.service_id == current.id {
            return Ok(None);
        }

        let metrics = self.persistence.load_performance_metrics(current.id, None).await?;
        let current_score = self
            .matcher()
            .score_service(&requirements, &current, metrics.as_ref(), Utc::now());

        Ok((best.score > current_score.score + f64::EPSILON).then_some(best.service_id))
    }

    /// Duration, critical path, parallelism, bottlenecks and cost of a workflow
    pub async fn estimate_execution(&self, workflow_id: WorkflowId) -> Result<ExecutionEstimate> {
        self.persistence
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| LabflowError::not_found("Workflow", workflow_id))?;

        let tasks = self.persistence.load_tasks_for_workflow(workflow_id).await?;
        let task_ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        let dependencies = self.persistence.load_dependencies(workflow_id).await?;
        let graph = DependencyGraph::build(workflow_id, &task_ids, &dependencies)?;

        let assigned: HashMap<TaskId, ServiceId> = self
            .live_entries_by_task(workflow_id)
            .await?
            .into_iter()
            .filter_map(|(task_id, entry)| entry.assigned_service_id.map(|s| (task_id, s)))
            .collect();
        let fallback = self.registry.get_available(None, None).await?.into_iter().next();

        let mut task_durations = HashMap::with_capacity(tasks.len());
        let mut per_service: HashMap<ServiceId, usize> = HashMap::new();
        let mut cost = 0.0;
        let mut has_cost = false;

        for task in &tasks {
            let service = assigned
                .get(&task.id)
                .and_then(|id| self.registry.get(*id))
                .or_else(|| fallback.clone());
            let duration = self
                .priorities
                .estimate_duration(task, service.as_ref().map(|s| s.id))
                .await?
                .as_secs();
            task_durations.insert(task.id, duration);

            if let Some(service) = &service {
                if assigned.contains_key(&task.id) {
                    *per_service.entry(service.id).or_default() += 1;
                }
                if let Some(rate) = service.cost_per_hour {
                    cost += rate * duration as f64 / 3600.0;
                    has_cost = true;
                }
            }
        }

        let (critical_path, critical_seconds) = graph.critical_path(&task_durations);
        let mut bottlenecks: Vec<ServiceId> = per_service
            .into_iter()
            .filter(|(id, count)| {
                self.registry
                    .get(*id)
                    .is_some_and(|s| *count > s.max_concurrent_tasks as usize)
            })
            .map(|(id, _)| id)
            .collect();
        bottlenecks.sort_unstable();

        let earliest_start_time = Utc::now();
        Ok(ExecutionEstimate {
            workflow_id,
            total_estimated_duration_seconds: task_durations.values().sum(),
            critical_path_duration_seconds: critical_seconds,
            critical_path,
            earliest_start_time,
            estimated_completion_time: earliest_start_time + ChronoDuration::seconds(critical_seconds as i64),
            task_durations,
            parallelizable_tasks: graph.roots(),
            bottlenecks,
            cost_estimate: has_cost.then_some(cost),
        })
    }

    /// Counts and average wait per status, plus per-service utilization
    pub async fn get_queue_status(&self) -> Result<QueueStatusReport> {
        let entries = self.persistence.load_queue_entries(&QueueFilter::default()).await?;
        let now = Utc::now();

        let mut status_breakdown: BTreeMap<String, usize> = BTreeMap::new();
        let mut wait_totals: BTreeMap<String, f64> = BTreeMap::new();
        for entry in &entries {
            let key = entry.status.to_string();
            *status_breakdown.entry(key.clone()).or_default() += 1;
            *wait_totals.entry(key).or_default() += entry.waiting_for(now).num_milliseconds() as f64 / 1000.0;
        }
        let average_wait_seconds = wait_totals
            .into_iter()
            .map(|(status, total)| {
                let count = status_breakdown.get(&status).copied().unwrap_or(1).max(1);
                (status, total / count as f64)
            })
            .collect();

        let service_utilization = self
            .registry
            .snapshot()
            .into_iter()
            .map(|s| ServiceUtilization {
                service_id: s.id,
                utilization_percent: s.load_percentage(),
                service_name: s.name,
                current_load: s.current_load,
                max_tasks: s.max_concurrent_tasks,
            })
            .collect();

        Ok(QueueStatusReport {
            total_entries: entries.len(),
            status_breakdown,
            average_wait_seconds,
            service_utilization,
            generated_at: now,
        })
    }

    /// Task ids of a workflow that have no live queue entry
    pub async fn unscheduled_tasks(&self, workflow_id: WorkflowId) -> Result<Vec<TaskId>> {
        let live = self.live_entries_by_task(workflow_id).await?;
        let queued: HashSet<TaskId> = live.keys().copied().collect();
        Ok(self
            .persistence
            .load_tasks_for_workflow(workflow_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .filter(|id| !queued.contains(id))
            .collect())
    }
}
