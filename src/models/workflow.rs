use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::WorkflowId;
use crate::constants::system;
use crate::state_machine::WorkflowState;

/// An ordered set of tasks with dependencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowState,
    /// 1 is highest, 10 is lowest; used by priority-ordered batches
    pub priority: u8,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: WorkflowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            status: WorkflowState::Pending,
            priority: system::DEFAULT_PRIORITY,
            user_id: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
