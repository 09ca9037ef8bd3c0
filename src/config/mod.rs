//! # Configuration
//!
//! Typed configuration for the registry, matcher, scheduler and engine. Every
//! section has defaults, so an empty configuration is valid; files and
//! environment variables only override what they mention.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use labflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retries = manager.config().engine.max_retries;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::{matching, system};
use crate::error::{LabflowError, Result};
use crate::orchestration::types::{ExecutionMode, RecoveryStrategy};
use crate::scheduling::SchedulingStrategy;

pub mod loader;

pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LabflowConfig {
    pub registry: RegistryConfig,
    pub matcher: MatcherConfig,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub health_check_interval_seconds: u64,
    pub health_check_timeout_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: system::HEALTH_CHECK_INTERVAL_SECS,
            health_check_timeout_seconds: system::HEALTH_CHECK_TIMEOUT_SECS,
        }
    }
}

impl RegistryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Weight for capabilities missing from `weights`
    pub default_weight: f64,
    pub weights: HashMap<String, f64>,
    /// Ranked candidates handed to the load balancer
    pub top_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            default_weight: matching::DEFAULT_CAPABILITY_WEIGHT,
            weights: matching::DEFAULT_CAPABILITY_WEIGHTS
                .iter()
                .map(|(name, weight)| (name.to_string(), *weight))
                .collect(),
            top_candidates: system::TOP_CANDIDATES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_strategy: SchedulingStrategy,
    pub rebalance_interval_seconds: u64,
    /// Pending entries older than this get a priority boost on rebalance
    pub priority_boost_after_seconds: u64,
    pub default_task_duration_seconds: u64,
    pub duration_adjustment_min: f64,
    pub duration_adjustment_max: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_strategy: SchedulingStrategy::Priority,
            rebalance_interval_seconds: system::REBALANCE_INTERVAL_SECS,
            priority_boost_after_seconds: system::PRIORITY_BOOST_AFTER_SECS as u64,
            default_task_duration_seconds: system::DEFAULT_TASK_DURATION_SECS,
            duration_adjustment_min: system::DURATION_ADJUSTMENT_MIN,
            duration_adjustment_max: system::DURATION_ADJUSTMENT_MAX,
        }
    }
}

impl SchedulerConfig {
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_execution_mode: ExecutionMode,
    pub default_recovery_strategy: RecoveryStrategy,
    pub max_retries: u32,
    pub retry_base_delay_seconds: u64,
    pub retry_max_delay_seconds: u64,
    pub default_task_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub batch_max_concurrent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_execution_mode: ExecutionMode::Optimized,
            default_recovery_strategy: RecoveryStrategy::Fallback,
            max_retries: system::DEFAULT_MAX_RETRIES,
            retry_base_delay_seconds: system::DEFAULT_RETRY_BASE_DELAY_SECS,
            retry_max_delay_seconds: system::DEFAULT_RETRY_MAX_DELAY_SECS,
            default_task_timeout_seconds: system::DEFAULT_TASK_TIMEOUT_SECS,
            poll_interval_seconds: system::DEFAULT_POLL_INTERVAL_SECS,
            batch_max_concurrent: system::DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_seconds)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl LabflowConfig {
    /// Check cross-field constraints, collecting every violation
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.registry.health_check_interval_seconds == 0 {
            errors.push("registry.health_check_interval_seconds must be greater than 0".to_string());
        }
        if self.registry.health_check_timeout_seconds == 0 {
            errors.push("registry.health_check_timeout_seconds must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.matcher.default_weight) {
            errors.push("matcher.default_weight must be within [0, 1]".to_string());
        }
        for (name, weight) in &self.matcher.weights {
            if !(0.0..=1.0).contains(weight) {
                errors.push(format!("matcher.weights.{name} must be within [0, 1]"));
            }
        }
        if self.matcher.top_candidates == 0 {
            errors.push("matcher.top_candidates must be greater than 0".to_string());
        }

        if self.scheduler.rebalance_interval_seconds == 0 {
            errors.push("scheduler.rebalance_interval_seconds must be greater than 0".to_string());
        }
        if self.scheduler.default_task_duration_seconds == 0 {
            errors.push("scheduler.default_task_duration_seconds must be greater than 0".to_string());
        }
        if self.scheduler.duration_adjustment_min <= 0.0
            || self.scheduler.duration_adjustment_min > self.scheduler.duration_adjustment_max
        {
            errors.push(
                "scheduler.duration_adjustment_min must be positive and not exceed duration_adjustment_max"
                    .to_string(),
            );
        }

        if self.engine.poll_interval_seconds == 0 {
            errors.push("engine.poll_interval_seconds must be greater than 0".to_string());
        }
        if self.engine.default_task_timeout_seconds == 0 {
            errors.push("engine.default_task_timeout_seconds must be greater than 0".to_string());
        }
        if self.engine.retry_base_delay_seconds > self.engine.retry_max_delay_seconds {
            errors.push("engine.retry_base_delay_seconds must not exceed retry_max_delay_seconds".to_string());
        }
        if self.engine.batch_max_concurrent == 0 {
            errors.push("engine.batch_max_concurrent must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LabflowError::Configuration(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LabflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.retry_base_delay(), Duration::from_secs(30));
        assert_eq!(config.registry.health_check_timeout(), Duration::from_secs(5));
        assert_eq!(config.scheduler.rebalance_interval(), Duration::from_secs(900));
        assert_eq!(config.matcher.weights.get("pipette"), Some(&0.9));
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = LabflowConfig::default();
        config.matcher.weights.insert("laser".into(), 1.5);
        config.engine.poll_interval_seconds = 0;
        config.scheduler.duration_adjustment_min = 3.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("matcher.weights.laser"));
        assert!(err.contains("engine.poll_interval_seconds"));
        assert!(err.contains("duration_adjustment_min"));
    }
}
