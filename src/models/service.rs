use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::ServiceId;
use crate::constants::system;
use crate::state_machine::ServiceStatus;

/// Recurring window during which a service is expected to be unavailable.
/// A window whose `end` precedes its `start` crosses midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Days on which the window opens; empty means every day
    #[serde(default)]
    pub days: Vec<Weekday>,
}

impl MaintenanceWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        let today = at.weekday();

        if self.start <= self.end {
            self.opens_on(today) && time >= self.start && time < self.end
        } else {
            (self.opens_on(today) && time >= self.start)
                || (self.opens_on(today.pred()) && time < self.end)
        }
    }

    fn opens_on(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }
}

/// Instrument service record.
///
/// `current_load` and `status` are owned by the service registry and change only
/// through its atomic load updates and health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub service_type: String,
    pub category: Option<String>,
    pub endpoint: String,
    pub health_check_endpoint: Option<String>,
    pub status: ServiceStatus,
    /// Capability name to value; a `false` or `null` value means absent
    pub capabilities: HashMap<String, Value>,
    pub max_concurrent_tasks: u32,
    pub current_load: u32,
    /// 1 is highest, 10 is lowest
    pub priority: u8,
    pub location: Option<String>,
    pub configuration: HashMap<String, Value>,
    pub cost_per_hour: Option<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn has_capability(&self, name: &str) -> bool {
        match self.capabilities.get(name) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(_) => true,
        }
    }

    pub fn capability_names(&self) -> BTreeSet<String> {
        self.capabilities
            .keys()
            .filter(|name| self.has_capability(name))
            .cloned()
            .collect()
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent_tasks
    }

    /// Online and under capacity
    pub fn is_available(&self) -> bool {
        self.status == ServiceStatus::Online && self.has_capacity()
    }

    /// Online or busy with a non-zero capacity; queued work waits for a slot
    pub fn accepts_queued_work(&self) -> bool {
        matches!(self.status, ServiceStatus::Online | ServiceStatus::Busy) && self.max_concurrent_tasks > 0
    }

    pub fn load_percentage(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 100.0;
        }
        f64::from(self.current_load) / f64::from(self.max_concurrent_tasks) * 100.0
    }

    /// Apply a load delta, clamped to `0..=max_concurrent_tasks`, and flip
    /// between online and busy as capacity is reached or freed.
    pub fn apply_load_delta(&mut self, delta: i32, now: DateTime<Utc>) -> u32 {
        let next = i64::from(self.current_load) + i64::from(delta);
        let clamped = next.clamp(0, i64::from(self.max_concurrent_tasks));
        self.current_load = u32::try_from(clamped).unwrap_or(0);

        match self.status {
            ServiceStatus::Online if !self.has_capacity() => self.status = ServiceStatus::Busy,
            ServiceStatus::Busy if self.has_capacity() => self.status = ServiceStatus::Online,
            _ => {}
        }

        self.updated_at = now;
        self.current_load
    }

    pub fn health_endpoint(&self) -> String {
        match &self.health_check_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "{}{}",
                self.endpoint.trim_end_matches('/'),
                system::DEFAULT_HEALTH_PATH
            ),
        }
    }

    pub fn heartbeat_is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.last_heartbeat.is_some_and(|beat| {
            now.signed_duration_since(beat) < Duration::seconds(system::HEARTBEAT_FRESHNESS_SECS)
        })
    }

    pub fn in_maintenance(&self, at: DateTime<Utc>) -> bool {
        self.maintenance_window
            .as_ref()
            .is_some_and(|window| window.contains(at))
    }

    /// Numeric configuration value, accepting numbers or numeric strings
    pub fn configuration_number(&self, key: &str) -> Option<f64> {
        match self.configuration.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Registration input for a new service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub service_type: String,
    #[serde(default)]
    pub category: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub health_check_endpoint: Option<String>,
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: u32,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
    #[serde(default)]
    pub cost_per_hour: Option<f64>,
    #[serde(default)]
    pub maintenance_window: Option<MaintenanceWindow>,
}

fn default_max_concurrent() -> u32 {
    1
}

fn default_priority() -> u8 {
    system::DEFAULT_PRIORITY
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            category: None,
            endpoint: endpoint.into(),
            health_check_endpoint: None,
            capabilities: HashMap::new(),
            max_concurrent_tasks: default_max_concurrent(),
            priority: default_priority(),
            location: None,
            configuration: HashMap::new(),
            cost_per_hour: None,
            maintenance_window: None,
        }
    }

    /// Build the stored record. New services start offline with no load.
    pub fn into_service(self, id: ServiceId, now: DateTime<Utc>) -> Service {
        Service {
            id,
            name: self.name,
            service_type: self.service_type,
            category: self.category,
            endpoint: self.endpoint,
            health_check_endpoint: self.health_check_endpoint,
            status: ServiceStatus::Offline,
            capabilities: self.capabilities,
            max_concurrent_tasks: self.max_concurrent_tasks,
            current_load: 0,
            priority: self.priority,
            location: self.location,
            configuration: self.configuration,
            cost_per_hour: self.cost_per_hour,
            last_heartbeat: None,
            maintenance_window: self.maintenance_window,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rolling performance metrics for a service, optionally per task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub service_id: ServiceId,
    pub task_type: Option<String>,
    pub execution_count: u64,
    pub average_duration_seconds: Option<f64>,
    /// Fraction in [0, 1]
    pub success_rate: Option<f64>,
    /// Fraction in [0, 1]
    pub uptime: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a single health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service_id: ServiceId,
    pub status: ServiceStatus,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Point-in-time load view of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadMetrics {
    pub service_id: ServiceId,
    pub status: ServiceStatus,
    pub current_load: u32,
    pub max_capacity: u32,
    pub load_percentage: f64,
    pub average_duration_seconds: Option<f64>,
    pub success_rate: Option<f64>,
    pub uptime: Option<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}
