//! # Domain Models
//!
//! Records exchanged between the engine and its persistence collaborator:
//! services, workflows, tasks and their dependencies, queue entries and user
//! preferences. Persistence mapping is external; these are plain serde types.

pub mod preferences;
pub mod queue_entry;
pub mod service;
pub mod task;
pub mod workflow;

pub type ServiceId = i64;
pub type WorkflowId = i64;
pub type TaskId = i64;
pub type TemplateId = i64;

// Re-export core models for easy access
pub use preferences::{UserPreferences, UserServicePreference};
pub use queue_entry::QueueEntry;
pub use service::{
    HealthStatus, LoadMetrics, MaintenanceWindow, PerformanceMetrics, Service, ServiceConfig,
};
pub use task::{DependencyType, Task, TaskDependency, TaskRequirements, TaskTemplate};
pub use workflow::Workflow;
