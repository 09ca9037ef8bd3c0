//! # System Constants
//!
//! Default thresholds, weights and event names that define the operational
//! boundaries of the scheduling and orchestration engine. Anything here that an
//! operator may want to tune is also exposed through [`crate::config::LabflowConfig`];
//! these values are the defaults.

// Re-export state types for convenience
pub use crate::state_machine::{QueueStatus, ServiceStatus, WorkflowState};

/// Lifecycle event names attached to structured log records
pub mod events {
    // Workflow lifecycle events
    pub const WORKFLOW_SCHEDULED: &str = "workflow.scheduled";
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const WORKFLOW_CANCELLED: &str = "workflow.cancelled";
    pub const WORKFLOW_PAUSED: &str = "workflow.paused";
    pub const WORKFLOW_RESUMED: &str = "workflow.resumed";
    pub const WORKFLOW_STOPPED: &str = "workflow.stopped";

    // Task lifecycle events
    pub const TASK_QUEUED: &str = "task.queued";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_RETRY_REQUESTED: &str = "task.retry_requested";
    pub const TASK_FALLBACK_REQUESTED: &str = "task.fallback_requested";

    // Service lifecycle events
    pub const SERVICE_REGISTERED: &str = "service.registered";
    pub const SERVICE_DEREGISTERED: &str = "service.deregistered";
    pub const SERVICE_STATUS_CHANGED: &str = "service.status_changed";
}

/// Capability matching thresholds
pub mod matching {
    /// Share of the base score carried by required capabilities
    pub const REQUIRED_WEIGHT: f64 = 0.8;
    /// Share of the base score carried by optional capabilities
    pub const OPTIONAL_WEIGHT: f64 = 0.2;
    /// Below this required-match rate a service is incompatible
    pub const INCOMPATIBLE_BELOW: f64 = 0.8;
    pub const EXCELLENT_OPTIONAL_RATE: f64 = 0.8;
    pub const GOOD_OPTIONAL_RATE: f64 = 0.5;

    pub const BASE_CONFIDENCE: f64 = 0.7;
    pub const SUCCESS_RATE_CONFIDENCE: f64 = 0.2;
    pub const UPTIME_CONFIDENCE: f64 = 0.1;
    pub const HEARTBEAT_CONFIDENCE: f64 = 0.1;

    /// Weight for capabilities missing from the weight table
    pub const DEFAULT_CAPABILITY_WEIGHT: f64 = 0.5;

    /// Built-in capability weight table
    pub const DEFAULT_CAPABILITY_WEIGHTS: &[(&str, f64)] = &[
        ("hplc", 1.0),
        ("gc", 1.0),
        ("ms", 1.0),
        ("uv_detector", 0.8),
        ("fluorescence_detector", 0.8),
        ("autosampler", 0.7),
        ("column_oven", 0.6),
        ("balance", 1.0),
        ("pipette", 0.9),
        ("vortex", 0.6),
        ("centrifuge", 0.7),
        ("heating", 0.7),
        ("cooling", 0.7),
        ("filtration", 0.8),
        ("ph_measurement", 0.8),
        ("data_processing", 0.5),
        ("barcode_reading", 0.4),
        ("temperature_control", 0.6),
        ("pressure_monitoring", 0.5),
    ];
}

/// System-wide defaults
pub mod system {
    pub const HIGHEST_PRIORITY: u8 = 1;
    pub const LOWEST_PRIORITY: u8 = 10;
    pub const DEFAULT_PRIORITY: u8 = 5;

    /// Candidates handed to the load balancer after ranking
    pub const TOP_CANDIDATES: usize = 5;

    pub const DEFAULT_TASK_DURATION_SECS: u64 = 3600;
    pub const SJF_BUCKET_SECS: u64 = 600;
    pub const DURATION_ADJUSTMENT_MIN: f64 = 0.5;
    pub const DURATION_ADJUSTMENT_MAX: f64 = 2.0;

    pub const DEADLINE_URGENT_SECS: i64 = 3600;
    pub const DEADLINE_SOON_SECS: i64 = 86_400;

    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 30;
    pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 3600;
    pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
    pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

    pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
    pub const HEARTBEAT_FRESHNESS_SECS: i64 = 300;

    pub const REBALANCE_INTERVAL_SECS: u64 = 900;
    pub const PRIORITY_BOOST_AFTER_SECS: i64 = 3600;

    /// Suffix appended to a service endpoint when no health endpoint is configured
    pub const DEFAULT_HEALTH_PATH: &str = "/status";
}

/// Remote action invoked on a service, keyed by service type
pub mod actions {
    pub const PREPARE: &str = "prepare";
    pub const ANALYZE: &str = "analyze";
    pub const EXECUTE: &str = "execute";

    pub fn for_service_type(service_type: &str) -> &'static str {
        match service_type {
            "sample_prep" => PREPARE,
            "hplc" => ANALYZE,
            _ => EXECUTE,
        }
    }
}

/// Status groupings used by the registry, scheduler and engine
pub mod status_groups {
    use super::QueueStatus;

    /// Queue entries that still hold a claim on their service
    pub const ACTIVE_QUEUE_STATES: &[QueueStatus] = &[
        QueueStatus::Pending,
        QueueStatus::Assigned,
        QueueStatus::Running,
    ];

    pub const FINAL_QUEUE_STATES: &[QueueStatus] = &[
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Cancelled,
    ];
}
