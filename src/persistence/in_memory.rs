use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use super::{Persistence, QueueFilter, ServiceFilter};
use crate::error::{LabflowError, Result};
use crate::models::{
    PerformanceMetrics, QueueEntry, Service, ServiceConfig, ServiceId, Task, TaskDependency,
    TaskId, TaskTemplate, TemplateId, UserServicePreference, Workflow, WorkflowId,
};
use crate::state_machine::{QueueStatus, WorkflowState};

/// Process-local store backing the [`Persistence`] trait.
///
/// Seeding helpers (`insert_*`) are synchronous so fixtures can be built before
/// a runtime exists.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    templates: RwLock<HashMap<TemplateId, TaskTemplate>>,
    dependencies: RwLock<Vec<TaskDependency>>,
    metrics: RwLock<Vec<PerformanceMetrics>>,
    preferences: RwLock<Vec<UserServicePreference>>,
    services: DashMap<ServiceId, Service>,
    queue: DashMap<Uuid, QueueEntry>,
    results: DashMap<TaskId, Value>,
    next_service_id: AtomicI64,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.write().insert(workflow.id, workflow);
    }

    pub fn insert_task(&self, task: Task) {
        self.tasks.write().insert(task.id, task);
    }

    pub fn insert_template(&self, template: TaskTemplate) {
        self.templates.write().insert(template.id, template);
    }

    pub fn insert_dependency(&self, dependency: TaskDependency) {
        self.dependencies.write().push(dependency);
    }

    pub fn insert_metrics(&self, metrics: PerformanceMetrics) {
        self.metrics.write().push(metrics);
    }

    pub fn insert_preference(&self, preference: UserServicePreference) {
        self.preferences.write().push(preference);
    }

    /// Seed a fully-formed service record, keeping its id
    pub fn insert_service_record(&self, service: Service) {
        self.next_service_id.fetch_max(service.id, Ordering::SeqCst);
        self.services.insert(service.id, service);
    }

    pub fn workflow_status(&self, workflow_id: WorkflowId) -> Option<WorkflowState> {
        self.workflows.read().get(&workflow_id).map(|w| w.status)
    }

    pub fn service_snapshot(&self, service_id: ServiceId) -> Option<Service> {
        self.services.get(&service_id).map(|s| s.clone())
    }

    pub fn result_for(&self, task_id: TaskId) -> Option<Value> {
        self.results.get(&task_id).map(|v| v.clone())
    }

    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.queue.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().get(&workflow_id).cloned())
    }

    async fn update_workflow_status(&self, workflow_id: WorkflowId, status: WorkflowState) -> Result<()> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| LabflowError::not_found("Workflow", workflow_id))?;
        workflow.status = status;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn load_tasks_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .values()
            .filter(|task| task.workflow_id == workflow_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| (task.order_index, task.id));
        Ok(tasks)
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(&task_id).cloned())
    }

    async fn load_task_template(&self, template_id: TemplateId) -> Result<Option<TaskTemplate>> {
        Ok(self.templates.read().get(&template_id).cloned())
    }

    async fn load_dependencies(&self, workflow_id: WorkflowId) -> Result<Vec<TaskDependency>> {
        Ok(self
            .dependencies
            .read()
            .iter()
            .filter(|dep| dep.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn load_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by_key(|service| service.id);
        Ok(services)
    }

    async fn insert_service(&self, config: ServiceConfig) -> Result<Service> {
        let id = self.next_service_id.fetch_add(1, Ordering::SeqCst) + 1;
        let service = config.into_service(id, Utc::now());
        self.services.insert(id, service.clone());
        Ok(service)
    }

    async fn save_service(&self, service: &Service) -> Result<()> {
        self.services.insert(service.id, service.clone());
        Ok(())
    }

    async fn delete_service(&self, service_id: ServiceId) -> Result<()> {
        self.services
            .remove(&service_id)
            .map(|_| ())
            .ok_or_else(|| LabflowError::service_not_found(service_id))
    }

    async fn update_service_load(&self, service_id: ServiceId, delta: i32) -> Result<()> {
        let mut service = self
            .services
            .get_mut(&service_id)
            .ok_or_else(|| LabflowError::service_not_found(service_id))?;
        service.apply_load_delta(delta, Utc::now());
        Ok(())
    }

    async fn load_performance_metrics(
        &self,
        service_id: ServiceId,
        task_type: Option<&str>,
    ) -> Result<Option<PerformanceMetrics>> {
        Ok(self
            .metrics
            .read()
            .iter()
            .filter(|m| m.service_id == service_id)
            .filter(|m| task_type.map_or(true, |kind| m.task_type.as_deref() == Some(kind)))
            .max_by_key(|m| m.recorded_at)
            .cloned())
    }

    async fn load_user_preference(
        &self,
        user_id: &str,
        task_type: Option<&str>,
    ) -> Result<Option<UserServicePreference>> {
        let preferences = self.preferences.read();
        let mut candidates = preferences.iter().filter(|p| p.user_id == user_id);

        let scoped = task_type.and_then(|kind| {
            preferences
                .iter()
                .find(|p| p.user_id == user_id && p.task_type.as_deref() == Some(kind))
        });

        Ok(scoped
            .or_else(|| candidates.find(|p| p.task_type.is_none()))
            .cloned())
    }

    async fn save_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.queue.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_queue_entry_if_status(&self, entry: &QueueEntry, expected: QueueStatus) -> Result<bool> {
        let mut stored = self
            .queue
            .get_mut(&entry.id)
            .ok_or_else(|| LabflowError::not_found("QueueEntry", entry.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = entry.clone();
        Ok(true)
    }

    async fn load_queue_entries(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .queue
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn save_result(&self, task_id: TaskId, result: &Value) -> Result<()> {
        self.results.insert(task_id, result.clone());
        Ok(())
    }
}
