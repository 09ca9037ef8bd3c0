//! # Persistence Interface
//!
//! The engine never talks to a database directly. Everything it reads or writes
//! goes through the [`Persistence`] trait so hosts can back it with whatever
//! store they already run. [`InMemoryPersistence`] is the bundled implementation
//! used by tests and single-process deployments.
//!
//! ## Consistency requirements
//!
//! - `update_queue_entry_if_status` must be a compare-and-set on the stored
//!   status; queue-entry ownership relies on it.
//! - `update_service_load` must apply the delta atomically.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{
    PerformanceMetrics, QueueEntry, Service, ServiceConfig, ServiceId, Task, TaskDependency,
    TaskId, TaskTemplate, TemplateId, UserServicePreference, Workflow, WorkflowId,
};
use crate::state_machine::{QueueStatus, ServiceStatus, WorkflowState};

pub mod in_memory;

pub use in_memory::InMemoryPersistence;

/// Service query filter; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceFilter {
    pub status: Option<ServiceStatus>,
    pub service_type: Option<String>,
    pub category: Option<String>,
}

impl ServiceFilter {
    pub fn online() -> Self {
        Self {
            status: Some(ServiceStatus::Online),
            ..Default::default()
        }
    }

    pub fn matches(&self, service: &Service) -> bool {
        self.status.map_or(true, |status| service.status == status)
            && self
                .service_type
                .as_ref()
                .map_or(true, |kind| &service.service_type == kind)
            && self
                .category
                .as_ref()
                .map_or(true, |category| service.category.as_ref() == Some(category))
    }
}

/// Queue entry query filter; an empty `statuses` list matches every status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueFilter {
    pub workflow_id: Option<WorkflowId>,
    pub task_id: Option<TaskId>,
    pub service_id: Option<ServiceId>,
    pub statuses: Vec<QueueStatus>,
}

impl QueueFilter {
    pub fn for_workflow(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            ..Default::default()
        }
    }

    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn for_service(service_id: ServiceId) -> Self {
        Self {
            service_id: Some(service_id),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[QueueStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, entry: &QueueEntry) -> bool {
        self.workflow_id.map_or(true, |id| entry.workflow_id == id)
            && self.task_id.map_or(true, |id| entry.task_id == id)
            && self
                .service_id
                .map_or(true, |id| entry.assigned_service_id == Some(id))
            && (self.statuses.is_empty() || self.statuses.contains(&entry.status))
    }
}

/// Storage collaborator consumed by the registry, scheduler and engine
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>>;

    async fn update_workflow_status(&self, workflow_id: WorkflowId, status: WorkflowState) -> Result<()>;

    /// Tasks of a workflow ordered by `order_index`
    async fn load_tasks_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<Task>>;

    async fn load_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    async fn load_task_template(&self, template_id: TemplateId) -> Result<Option<TaskTemplate>>;

    async fn load_dependencies(&self, workflow_id: WorkflowId) -> Result<Vec<TaskDependency>>;

    async fn load_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>>;

    /// Store a new service and assign its id
    async fn insert_service(&self, config: ServiceConfig) -> Result<Service>;

    async fn save_service(&self, service: &Service) -> Result<()>;

    async fn delete_service(&self, service_id: ServiceId) -> Result<()>;

    async fn update_service_load(&self, service_id: ServiceId, delta: i32) -> Result<()>;

    /// Latest metrics for a service; `task_type` narrows to that task type
    async fn load_performance_metrics(
        &self,
        service_id: ServiceId,
        task_type: Option<&str>,
    ) -> Result<Option<PerformanceMetrics>>;

    /// Stored preference for a user, preferring one scoped to `task_type`
    async fn load_user_preference(
        &self,
        user_id: &str,
        task_type: Option<&str>,
    ) -> Result<Option<UserServicePreference>>;

    /// Insert or replace a queue entry
    async fn save_queue_entry(&self, entry: &QueueEntry) -> Result<()>;

    /// Replace the stored entry only if its stored status equals `expected`.
    /// Returns whether the write happened.
    async fn update_queue_entry_if_status(&self, entry: &QueueEntry, expected: QueueStatus) -> Result<bool>;

    async fn load_queue_entries(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>>;

    async fn save_result(&self, task_id: TaskId, result: &Value) -> Result<()>;
}
