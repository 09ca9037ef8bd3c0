//! Fixture builders for integration tests

#![allow(dead_code)]

use labflow_core::config::LabflowConfig;
use labflow_core::models::{
    Service, ServiceConfig, Task, TaskDependency, TaskId, TaskTemplate, Workflow, WorkflowId,
};
use std::collections::HashMap;
use labflow_core::orchestration::WorkflowEngine;
use labflow_core::persistence::InMemoryPersistence;
use labflow_core::registry::AdapterRegistry;
use serde_json::json;
use std::sync::Arc;

use super::mock_caller::MockServiceCaller;

/// Engine wired to an in-memory store and a scriptable caller
pub struct LabFixture {
    pub store: Arc<InMemoryPersistence>,
    pub caller: Arc<MockServiceCaller>,
    pub engine: WorkflowEngine,
}

impl LabFixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: LabflowConfig) -> Self {
        let store = Arc::new(InMemoryPersistence::new());
        let caller = Arc::new(MockServiceCaller::new());
        let adapters = Arc::new(AdapterRegistry::with_default(caller.clone()));
        let engine = WorkflowEngine::from_config(store.clone(), adapters, &config);
        Self { store, caller, engine }
    }

    pub fn service(&self, name: &str) -> ServiceBuilder<'_> {
        ServiceBuilder::new(self, name)
    }

    pub fn workflow(&self, id: WorkflowId) -> WorkflowBuilder<'_> {
        WorkflowBuilder::new(self, id)
    }
}

/// Short retry delays and polls so paused-clock tests stay readable
pub fn test_config() -> LabflowConfig {
    let mut config = LabflowConfig::default();
    config.engine.retry_base_delay_seconds = 1;
    config.engine.retry_max_delay_seconds = 10;
    config.engine.poll_interval_seconds = 1;
    config.engine.default_task_timeout_seconds = 60;
    config.engine.max_retries = 2;
    config
}

pub fn endpoint_for(name: &str) -> String {
    format!("http://{name}.lab.local")
}

pub struct ServiceBuilder<'a> {
    fixture: &'a LabFixture,
    config: ServiceConfig,
}

impl<'a> ServiceBuilder<'a> {
    fn new(fixture: &'a LabFixture, name: &str) -> Self {
        Self {
            fixture,
            config: ServiceConfig::new(name, "hplc", endpoint_for(name)),
        }
    }

    pub fn service_type(mut self, service_type: &str) -> Self {
        self.config.service_type = service_type.to_string();
        self
    }

    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        for capability in capabilities {
            self.config.capabilities.insert((*capability).to_string(), json!(true));
        }
        self
    }

    pub fn max_concurrent(mut self, max: u32) -> Self {
        self.config.max_concurrent_tasks = max;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn cost_per_hour(mut self, cost: f64) -> Self {
        self.config.cost_per_hour = Some(cost);
        self
    }

    pub async fn register(self) -> Service {
        self.fixture
            .engine
            .registry()
            .register(self.config)
            .await
            .expect("Failed to register test service")
    }
}

pub struct WorkflowBuilder<'a> {
    fixture: &'a LabFixture,
    workflow: Workflow,
    tasks: Vec<Task>,
    templates: Vec<TaskTemplate>,
    dependencies: Vec<TaskDependency>,
}

impl<'a> WorkflowBuilder<'a> {
    fn new(fixture: &'a LabFixture, id: WorkflowId) -> Self {
        Self {
            fixture,
            workflow: Workflow::new(id, format!("workflow-{id}")),
            tasks: Vec::new(),
            templates: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.workflow.priority = priority;
        self
    }

    /// Add a task; ids are assigned as `workflow_id * 100 + position`
    pub fn task(mut self, name: &str) -> Self {
        let index = self.tasks.len() as i32;
        let id = self.workflow.id * 100 + i64::from(index) + 1;
        self.tasks.push(Task::new(id, self.workflow.id, name, index));
        self
    }

    pub fn task_with(mut self, name: &str, configure: impl FnOnce(&mut Task)) -> Self {
        self = self.task(name);
        if let Some(task) = self.tasks.last_mut() {
            configure(task);
        }
        self
    }

    /// Add a task backed by a template that requires `capabilities`
    pub fn task_requiring(mut self, name: &str, capabilities: &[&str]) -> Self {
        self = self.task(name);
        if let Some(task) = self.tasks.last_mut() {
            task.template_id = Some(task.id);
            self.templates.push(TaskTemplate {
                id: task.id,
                name: name.to_string(),
                category: None,
                required_capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
                optional_capabilities: Vec::new(),
                default_parameters: HashMap::new(),
                estimated_duration_seconds: Some(600),
                resource_requirements: HashMap::new(),
                is_active: true,
            });
        }
        self
    }

    /// `dependent` waits for `prerequisite`; both are 1-based task positions
    pub fn depends(mut self, dependent: usize, prerequisite: usize) -> Self {
        let workflow_id = self.workflow.id;
        let id = |position: usize| workflow_id * 100 + position as i64;
        self.dependencies
            .push(TaskDependency::new(workflow_id, id(dependent), id(prerequisite)));
        self
    }

    pub fn build(self) -> Vec<TaskId> {
        let ids = self.tasks.iter().map(|t| t.id).collect();
        self.fixture.store.insert_workflow(self.workflow);
        for task in self.tasks {
            self.fixture.store.insert_task(task);
        }
        for template in self.templates {
            self.fixture.store.insert_template(template);
        }
        for dependency in self.dependencies {
            self.fixture.store.insert_dependency(dependency);
        }
        ids
    }
}
