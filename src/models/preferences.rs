use serde::{Deserialize, Serialize};

use super::ServiceId;

/// Per-request scheduling preferences supplied by a caller
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: Option<String>,
    /// Most preferred first
    #[serde(default)]
    pub preferred_services: Vec<ServiceId>,
    #[serde(default)]
    pub blacklisted_services: Vec<ServiceId>,
}

impl UserPreferences {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn is_blacklisted(&self, service_id: ServiceId) -> bool {
        self.blacklisted_services.contains(&service_id)
    }

    /// Score boost for a preferred service: `(len - index) * 0.1`
    pub fn preference_boost(&self, service_id: ServiceId) -> f64 {
        self.preferred_services
            .iter()
            .position(|id| *id == service_id)
            .map(|index| (self.preferred_services.len() - index) as f64 * 0.1)
            .unwrap_or(0.0)
    }
}

/// Stored per-user service preference, optionally scoped to a task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserServicePreference {
    pub user_id: String,
    pub task_type: Option<String>,
    #[serde(default)]
    pub preferred_service_ids: Vec<ServiceId>,
    #[serde(default)]
    pub blacklisted_service_ids: Vec<ServiceId>,
}
