//! # Task Scheduling
//!
//! Turns a workflow's tasks into ordered per-service queue entries.
//!
//! ## Overview
//!
//! For every task the scheduler resolves capability requirements, ranks the
//! available services, applies caller preferences and lets the load balancer
//! pick among the top candidates. The resulting [`QueueEntry`](crate::models::QueueEntry)
//! carries a priority derived from the [`SchedulingStrategy`] and a queue
//! position consistent with `(priority, created_at)` on its service.
//!
//! ## Components
//!
//! - [`TaskScheduler`]: scheduling, rebalancing, estimates and queue status
//! - [`RequirementsResolver`]: template lookup with keyword inference fallback
//! - [`PriorityCalculator`]: strategy priorities and duration estimates
//! - [`QueueRebalancer`]: periodic background rebalance

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod priority;
pub mod rebalancer;
pub mod requirements;
pub mod task_scheduler;

pub use priority::PriorityCalculator;
pub use rebalancer::QueueRebalancer;
pub use requirements::{infer_requirements, RequirementsResolver};
pub use task_scheduler::{
    ExecutionEstimate, QueueStatusReport, RebalanceReport, ScheduleResult, ServiceUtilization,
    TaskScheduler,
};

/// How queue priorities are derived for newly scheduled tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    Fifo,
    #[default]
    Priority,
    ShortestJobFirst,
    FairShare,
    DeadlineAware,
    CostOptimized,
    LoadBalanced,
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Fifo => "fifo",
            Self::Priority => "priority",
            Self::ShortestJobFirst => "shortest_job_first",
            Self::FairShare => "fair_share",
            Self::DeadlineAware => "deadline_aware",
            Self::CostOptimized => "cost_optimized",
            Self::LoadBalanced => "load_balanced",
        };
        write!(f, "{value}")
    }
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Self::Fifo),
            "priority" => Ok(Self::Priority),
            "shortest_job_first" | "sjf" => Ok(Self::ShortestJobFirst),
            "fair_share" => Ok(Self::FairShare),
            "deadline_aware" | "deadline" => Ok(Self::DeadlineAware),
            "cost_optimized" | "cost" => Ok(Self::CostOptimized),
            "load_balanced" => Ok(Self::LoadBalanced),
            _ => Err(format!("Invalid scheduling strategy: {s}")),
        }
    }
}
