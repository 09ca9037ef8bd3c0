//! Strategy-driven queue priorities and per-service duration estimates.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::SchedulingStrategy;
use crate::config::SchedulerConfig;
use crate::constants::system;
use crate::error::Result;
use crate::models::{ServiceId, Task};
use crate::persistence::Persistence;

pub struct PriorityCalculator {
    persistence: Arc<dyn Persistence>,
    config: SchedulerConfig,
}

impl PriorityCalculator {
    pub fn new(persistence: Arc<dyn Persistence>, config: SchedulerConfig) -> Self {
        Self { persistence, config }
    }

    /// Queue priority for `task` (1 highest, 10 lowest)
    pub fn priority_for(&self, task: &Task, strategy: SchedulingStrategy, now: DateTime<Utc>) -> u8 {
        let base = task
            .priority
            .clamp(system::HIGHEST_PRIORITY, system::LOWEST_PRIORITY);

        match strategy {
            SchedulingStrategy::ShortestJobFirst => {
                let duration = task
                    .estimated_duration_seconds
                    .unwrap_or(self.config.default_task_duration_seconds);
                (duration / system::SJF_BUCKET_SECS)
                    .clamp(u64::from(system::HIGHEST_PRIORITY), u64::from(system::LOWEST_PRIORITY)) as u8
            }
            SchedulingStrategy::DeadlineAware => match task.deadline() {
                Some(deadline) => {
                    let remaining = (deadline - now).num_seconds();
                    if remaining < system::DEADLINE_URGENT_SECS {
                        1
                    } else if remaining < system::DEADLINE_SOON_SECS {
                        2
                    } else {
                        base
                    }
                }
                None => base,
            },
            SchedulingStrategy::Fifo
            | SchedulingStrategy::Priority
            | SchedulingStrategy::FairShare
            | SchedulingStrategy::CostOptimized
            | SchedulingStrategy::LoadBalanced => base,
        }
    }

    /// Declared duration of a task: its own estimate, then its template's,
    /// then the configured default
    pub async fn base_duration_seconds(&self, task: &Task) -> Result<u64> {
        if let Some(seconds) = task.estimated_duration_seconds {
            return Ok(seconds);
        }
        if let Some(template_id) = task.template_id {
            if let Some(seconds) = self
                .persistence
                .load_task_template(template_id)
                .await?
                .and_then(|t| t.estimated_duration_seconds)
            {
                return Ok(seconds);
            }
        }
        Ok(self.config.default_task_duration_seconds)
    }

    /// Expected duration of `task` on a service, blending the declared duration
    /// with the service's history for this task type
    pub async fn estimate_duration(&self, task: &Task, service_id: Option<ServiceId>) -> Result<Duration> {
        let base = self.base_duration_seconds(task).await?;

        let Some(service_id) = service_id else {
            return Ok(Duration::from_secs(base));
        };

        let historical = self
            .persistence
            .load_performance_metrics(service_id, Some(&task.name))
            .await?
            .and_then(|m| m.average_duration_seconds);

        match historical {
            Some(average) if base > 0 => {
                let factor = (average / base as f64)
                    .clamp(self.config.duration_adjustment_min, self.config.duration_adjustment_max);
                Ok(Duration::from_secs((base as f64 * factor) as u64))
            }
            _ => Ok(Duration::from_secs(base)),
        }
    }
}
