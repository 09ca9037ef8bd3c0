use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::{TaskId, TemplateId, WorkflowId};
use crate::constants::system;

/// A unit of work within a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub order_index: i32,
    /// 1 is highest, 10 is lowest
    pub priority: u8,
    pub template_id: Option<TemplateId>,
    pub estimated_duration_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    /// Parameters forwarded to the service; `deadline` (RFC 3339) drives
    /// deadline-aware scheduling
    pub service_parameters: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, workflow_id: WorkflowId, name: impl Into<String>, order_index: i32) -> Self {
        Self {
            id,
            workflow_id,
            name: name.into(),
            order_index,
            priority: system::DEFAULT_PRIORITY,
            template_id: None,
            estimated_duration_seconds: None,
            timeout_seconds: None,
            max_retries: None,
            service_parameters: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Deadline carried in the service parameters, if any
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let raw = self.service_parameters.get("deadline")?.as_str()?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Sample identifier sent with the service payload
    pub fn sample_id(&self) -> String {
        format!(
            "WF{}_T{}_{}",
            self.workflow_id,
            self.id,
            self.name.replace(' ', "_")
        )
    }
}

/// Reusable task definition with declared capability needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: TemplateId,
    pub name: String,
    pub category: Option<String>,
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub optional_capabilities: Vec<String>,
    #[serde(default)]
    pub default_parameters: HashMap<String, Value>,
    pub estimated_duration_seconds: Option<u64>,
    #[serde(default)]
    pub resource_requirements: HashMap<String, Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// What a task needs from a service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    pub task_type: String,
    pub required_capabilities: BTreeSet<String>,
    pub optional_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resource_requirements: HashMap<String, Value>,
    #[serde(default)]
    pub performance_requirements: HashMap<String, Value>,
    #[serde(default)]
    pub constraints: HashMap<String, Value>,
}

impl TaskRequirements {
    /// Requirements with no capability constraints
    pub fn unclassified(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn new<R, O>(task_type: impl Into<String>, required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            task_type: task_type.into(),
            required_capabilities: required.into_iter().map(Into::into).collect(),
            optional_capabilities: optional.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn from_template(template: &TaskTemplate, task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            required_capabilities: template.required_capabilities.iter().cloned().collect(),
            optional_capabilities: template.optional_capabilities.iter().cloned().collect(),
            resource_requirements: template.resource_requirements.clone(),
            ..Default::default()
        }
    }

    pub fn has_capability_requirements(&self) -> bool {
        !self.required_capabilities.is_empty() || !self.optional_capabilities.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    Sequential,
    Conditional,
    ResourceSharing,
}

/// Edge in a workflow's task DAG: `dependent_task_id` waits for
/// `prerequisite_task_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub workflow_id: WorkflowId,
    pub dependent_task_id: TaskId,
    pub prerequisite_task_id: TaskId,
    #[serde(default)]
    pub dependency_type: DependencyType,
}

impl TaskDependency {
    pub fn new(workflow_id: WorkflowId, dependent_task_id: TaskId, prerequisite_task_id: TaskId) -> Self {
        Self {
            workflow_id,
            dependent_task_id,
            prerequisite_task_id,
            dependency_type: DependencyType::Sequential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_sample_id_replaces_spaces() {
        let task = Task::new(7, 3, "HPLC Purity Check", 0);
        assert_eq!(task.sample_id(), "WF3_T7_HPLC_Purity_Check");
    }

    #[test]
    fn test_deadline_parsing() {
        let mut task = Task::new(1, 1, "assay", 0);
        assert!(task.deadline().is_none());

        task.service_parameters
            .insert("deadline".into(), json!("2024-05-01T12:00:00Z"));
        assert_eq!(
            task.deadline(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );

        task.service_parameters
            .insert("deadline".into(), json!("2024-05-01T08:30:00"));
        assert_eq!(
            task.deadline(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap())
        );

        task.service_parameters.insert("deadline".into(), json!("soon"));
        assert!(task.deadline().is_none());
    }

    #[test]
    fn test_requirements_from_template() {
        let template = TaskTemplate {
            id: 1,
            name: "HPLC Analysis".into(),
            category: Some("analysis".into()),
            required_capabilities: vec!["hplc".into(), "uv_detector".into()],
            optional_capabilities: vec!["autosampler".into()],
            default_parameters: HashMap::new(),
            estimated_duration_seconds: Some(1800),
            resource_requirements: HashMap::new(),
            is_active: true,
        };
        let requirements = TaskRequirements::from_template(&template, "hplc run");
        assert_eq!(requirements.required_capabilities.len(), 2);
        assert!(requirements.optional_capabilities.contains("autosampler"));
        assert!(requirements.has_capability_requirements());
        assert!(!TaskRequirements::unclassified("x").has_capability_requirements());
    }
}
