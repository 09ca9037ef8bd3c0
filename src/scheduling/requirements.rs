//! Capability requirements for a task: its template when it has one,
//! otherwise a keyword lookup on the task name.

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::models::{Task, TaskRequirements};
use crate::persistence::Persistence;

/// Keyword rule: every keyword must appear in the lower-cased task name
struct KeywordRule {
    any_of: &'static [&'static [&'static str]],
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

/// First matching rule wins
const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        any_of: &[&["hplc"]],
        required: &["hplc", "uv_detector"],
        optional: &["autosampler", "column_oven"],
    },
    KeywordRule {
        any_of: &[&["sample", "prep"]],
        required: &["balance", "pipette"],
        optional: &["ph_measurement", "heating", "cooling"],
    },
    KeywordRule {
        any_of: &[&["balance"], &["weigh"]],
        required: &["balance"],
        optional: &[],
    },
];

/// Infer requirements from the task name. Unknown names yield unclassified
/// requirements with no capability constraints.
pub fn infer_requirements(task_name: &str) -> TaskRequirements {
    let lowered = task_name.to_lowercase();

    KEYWORD_RULES
        .iter()
        .find(|rule| {
            rule.any_of
                .iter()
                .any(|keywords| keywords.iter().all(|k| lowered.contains(k)))
        })
        .map(|rule| {
            TaskRequirements::new(
                task_name,
                rule.required.iter().copied(),
                rule.optional.iter().copied(),
            )
        })
        .unwrap_or_else(|| TaskRequirements::unclassified(task_name))
}

pub struct RequirementsResolver {
    persistence: Arc<dyn Persistence>,
}

impl RequirementsResolver {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    pub async fn resolve(&self, task: &Task) -> Result<TaskRequirements> {
        if let Some(template_id) = task.template_id {
            if let Some(template) = self.persistence.load_task_template(template_id).await? {
                debug!(
                    task_id = task.id,
                    template_id = template_id,
                    "📐 REQUIREMENTS: Using task template"
                );
                return Ok(TaskRequirements::from_template(&template, task.name.as_str()));
            }
        }

        let inferred = infer_requirements(&task.name);
        debug!(
            task_id = task.id,
            required = ?inferred.required_capabilities,
            classified = inferred.has_capability_requirements(),
            "📐 REQUIREMENTS: Inferred from task name"
        );
        Ok(inferred)
    }
}
