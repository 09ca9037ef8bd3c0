#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Labflow Core
//!
//! Scheduling and orchestration core for laboratory workflows.
//!
//! ## Overview
//!
//! A workflow is a set of tasks with dependencies. Each task is matched
//! against the capabilities of registered instrument services, queued on the
//! best reachable one and then executed remotely: the engine invokes the
//! service, polls it to completion and applies retry or fallback policy when
//! the service fails.
//!
//! ## Module Organization
//!
//! - [`models`] - Services, tasks, workflows, queue entries and preferences
//! - [`state_machine`] - Workflow, queue entry and service states with transition guards
//! - [`matching`] - Capability matching and compatibility scoring
//! - [`registry`] - Service registration, health monitoring, load and slot accounting
//! - [`scheduling`] - Queue placement, priorities, rebalancing and estimates
//! - [`orchestration`] - Workflow execution, recovery and batch execution
//! - [`client`] - Transport to instrument services
//! - [`persistence`] - Storage contract and the in-memory store
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use labflow_core::config::LabflowConfig;
//! use labflow_core::orchestration::WorkflowEngine;
//! use labflow_core::persistence::InMemoryPersistence;
//! use labflow_core::registry::AdapterRegistry;
//!
//! # async fn example() -> labflow_core::Result<()> {
//! let persistence = Arc::new(InMemoryPersistence::new());
//! let adapters = Arc::new(AdapterRegistry::new());
//! let engine = WorkflowEngine::from_config(persistence, adapters, &LabflowConfig::default());
//!
//! let result = engine.execute_workflow(1, None, None, None).await?;
//! println!("completed {} of {} tasks", result.completed_tasks, result.total_tasks);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod matching;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod registry;
pub mod scheduling;
pub mod state_machine;

pub use client::{HttpServiceCaller, ServiceCaller};
pub use config::{ConfigManager, EngineConfig, LabflowConfig, MatcherConfig, RegistryConfig, SchedulerConfig};
pub use error::{LabflowError, Result};
pub use matching::{CapabilityMatcher, MatchQuality, MatchScore};
pub use models::{QueueEntry, Service, ServiceConfig, Task, TaskDependency, UserPreferences, Workflow};
pub use orchestration::{
    BatchOrdering, BatchResult, ExecutionMode, ExecutionResult, RecoveryStrategy, WorkflowEngine,
};
pub use persistence::{InMemoryPersistence, Persistence};
pub use registry::{AdapterRegistry, ServiceRegistry};
pub use scheduling::{SchedulingStrategy, TaskScheduler};
pub use state_machine::{QueueStatus, ServiceStatus, WorkflowState};
