use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ServiceId, TaskId, WorkflowId};
use crate::state_machine::QueueStatus;

/// A task's place in a service queue.
///
/// The scheduler creates entries and owns `priority` and `queue_position`; the
/// engine drives `status` through compare-and-set claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub assigned_service_id: Option<ServiceId>,
    /// 1 is highest, 10 is lowest
    pub priority: u8,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    /// 1-based rank among pending entries on the assigned service
    pub queue_position: Option<u32>,
    pub estimated_duration_seconds: u64,
    pub estimated_start_time: Option<DateTime<Utc>>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_completion_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        workflow_id: WorkflowId,
        task_id: TaskId,
        assigned_service_id: Option<ServiceId>,
        priority: u8,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            task_id,
            assigned_service_id,
            priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: crate::constants::system::DEFAULT_MAX_RETRIES,
            timeout_seconds: crate::constants::system::DEFAULT_TASK_TIMEOUT_SECS,
            queue_position: None,
            estimated_duration_seconds: crate::constants::system::DEFAULT_TASK_DURATION_SECS,
            estimated_start_time: None,
            estimated_completion_time: None,
            actual_start_time: None,
            actual_completion_time: None,
            last_error: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Ordering key within a service queue
    pub fn queue_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority, self.created_at)
    }

    /// Strictly ahead of `other` in the same service queue
    pub fn is_ahead_of(&self, other: &QueueEntry) -> bool {
        self.id != other.id && self.queue_key() < other.queue_key()
    }

    pub fn waiting_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_ordering_by_priority_then_age() {
        let t0 = Utc::now();
        let urgent = QueueEntry::new(1, 1, Some(1), 2, t0 + Duration::seconds(10));
        let older = QueueEntry::new(1, 2, Some(1), 5, t0);
        let newer = QueueEntry::new(1, 3, Some(1), 5, t0 + Duration::seconds(5));

        assert!(urgent.is_ahead_of(&older));
        assert!(older.is_ahead_of(&newer));
        assert!(!newer.is_ahead_of(&older));
        assert!(!older.is_ahead_of(&older));
    }

    #[test]
    fn test_retry_budget() {
        let mut entry = QueueEntry::new(1, 1, None, 5, Utc::now());
        entry.max_retries = 2;
        assert!(entry.can_retry());
        entry.retry_count = 2;
        assert!(!entry.can_retry());
    }
}
