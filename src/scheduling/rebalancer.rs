//! Periodic queue rebalancing in the background.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::task_scheduler::TaskScheduler;
use crate::logging::log_error;

/// Runs [`TaskScheduler::rebalance_queue`] on a fixed interval until cancelled
pub struct QueueRebalancer {
    scheduler: Arc<TaskScheduler>,
    interval: Duration,
}

impl QueueRebalancer {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        let interval = scheduler.config().rebalance_interval();
        Self { scheduler, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The first rebalance runs one full interval after spawning
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_secs = self.interval.as_secs(),
                "⚖️ REBALANCER: Started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.scheduler.rebalance_queue().await {
                            log_error("QueueRebalancer", "rebalance_queue", &e.to_string(), None);
                        }
                    }
                }
            }

            info!("⚖️ REBALANCER: Stopped");
        })
    }
}
