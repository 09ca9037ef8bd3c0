//! Cancellable polling for remote task completion.
//!
//! The wait polls on a fixed interval until the service reports a terminal
//! state, the timeout elapses or the token is cancelled. A few consecutive
//! poll errors are tolerated before the wait gives up.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{RemoteState, ServiceCaller};

/// Consecutive poll errors tolerated before the wait fails
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Completed,
    Failed(String),
    Aborted(String),
    TimedOut,
    Cancelled,
}

pub async fn wait_for_completion(
    caller: &dyn ServiceCaller,
    endpoint: &str,
    poll_interval: Duration,
    timeout: Duration,
    token: &CancellationToken,
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_errors = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return WaitOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            _ = ticker.tick() => {}
        }

        match caller.poll_status(endpoint).await {
            Ok(status) => {
                consecutive_errors = 0;
                match status.state {
                    RemoteState::Running => {
                        debug!(endpoint = %endpoint, progress = status.progress, "⏳ REMOTE_WAIT: Still running");
                    }
                    RemoteState::Completed => return WaitOutcome::Completed,
                    RemoteState::Failed => {
                        return WaitOutcome::Failed(status.message.unwrap_or_else(|| "remote task failed".to_string()))
                    }
                    RemoteState::Aborted => {
                        return WaitOutcome::Aborted(status.message.unwrap_or_else(|| "remote task aborted".to_string()))
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    endpoint = %endpoint,
                    error = %e,
                    consecutive_errors = consecutive_errors,
                    "⏳ REMOTE_WAIT: Status poll failed"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                    return WaitOutcome::Failed(e.to_string());
                }
            }
        }
    }
}
