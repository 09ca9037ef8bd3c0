//! # Backoff Calculator
//!
//! Exponential retry delays for failed service calls.
//!
//! ## Overview
//!
//! The delay before retry `n` (zero-based) is `base * multiplier^n`, capped at
//! the configured maximum. With the default multiplier of 2 this is
//! `base * 2^retry_count`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::constants::system;

/// Configuration for backoff calculation behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffCalculatorConfig {
    /// Base delay in seconds for exponential backoff
    pub base_delay_seconds: u64,
    /// Maximum delay cap in seconds
    pub max_delay_seconds: u64,
    /// Exponential multiplier (default: 2.0)
    pub multiplier: f64,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: system::DEFAULT_RETRY_BASE_DELAY_SECS,
            max_delay_seconds: system::DEFAULT_RETRY_MAX_DELAY_SECS,
            multiplier: 2.0,
        }
    }
}

impl From<&EngineConfig> for BackoffCalculatorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            base_delay_seconds: config.retry_base_delay_seconds,
            max_delay_seconds: config.retry_max_delay_seconds,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Exponential,
    /// The exponential delay hit the configured maximum
    Capped,
}

/// Result of a backoff calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffResult {
    pub delay_seconds: u64,
    pub backoff_type: BackoffType,
    pub next_retry_at: DateTime<Utc>,
}

impl BackoffResult {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Delay before the retry following `retry_count` earlier retries
    pub fn calculate(&self, retry_count: u32) -> BackoffResult {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let exponential = self.config.base_delay_seconds as f64 * self.config.multiplier.powi(exponent);
        let max = self.config.max_delay_seconds as f64;

        let (delay_seconds, backoff_type) = if exponential.is_finite() && exponential < max {
            (exponential as u64, BackoffType::Exponential)
        } else {
            (self.config.max_delay_seconds, BackoffType::Capped)
        };

        BackoffResult {
            delay_seconds,
            backoff_type,
            next_retry_at: Utc::now() + ChronoDuration::seconds(delay_seconds as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_config_default() {
        let config = BackoffCalculatorConfig::default();
        assert_eq!(config.base_delay_seconds, 30);
        assert_eq!(config.max_delay_seconds, 3600);
        assert_eq!(config.multiplier, 2.0);
    }

    #[test]
    fn test_exponential_growth() {
        let calculator = BackoffCalculator::default();
        let delays: Vec<u64> = (0..4).map(|n| calculator.calculate(n).delay_seconds).collect();
        assert_eq!(delays, vec![30, 60, 120, 240]);
        assert_eq!(calculator.calculate(0).backoff_type, BackoffType::Exponential);
    }

    #[test]
    fn test_cap_applies() {
        let calculator = BackoffCalculator::new(BackoffCalculatorConfig {
            base_delay_seconds: 30,
            max_delay_seconds: 100,
            multiplier: 2.0,
        });
        let result = calculator.calculate(5);
        assert_eq!(result.delay_seconds, 100);
        assert_eq!(result.backoff_type, BackoffType::Capped);
        assert_eq!(calculator.calculate(u32::MAX).delay_seconds, 100);
    }

    #[test]
    fn test_from_engine_config() {
        let mut engine = EngineConfig::default();
        engine.retry_base_delay_seconds = 5;
        let calculator = BackoffCalculator::new(BackoffCalculatorConfig::from(&engine));
        assert_eq!(calculator.calculate(2).delay(), Duration::from_secs(20));
    }
}
