//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are layered, later ones winning:
//!
//! 1. Built-in defaults ([`LabflowConfig::default`])
//! 2. `{config_dir}/labflow.toml`
//! 3. `{config_dir}/labflow.{environment}.toml`
//! 4. `LABFLOW_*` environment variables, `__` separating nested keys
//!    (`LABFLOW_ENGINE__MAX_RETRIES=5`)

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::LabflowConfig;
use crate::error::Result;

/// Loaded configuration plus the context it was loaded in
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: LabflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "🔧 CONFIG: Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        debug!(
            environment = %environment,
            max_retries = config.engine.max_retries,
            default_strategy = ?config.scheduler.default_strategy,
            "✅ CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: LabflowConfig) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> Result<LabflowConfig> {
        let defaults = Config::try_from(&LabflowConfig::default())?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_directory.join("labflow.toml")).required(false))
            .add_source(
                File::from(config_directory.join(format!("labflow.{environment}.toml"))).required(false),
            )
            .add_source(
                Environment::with_prefix("LABFLOW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<LabflowConfig>()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &LabflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        env::var("LABFLOW_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("LABFLOW_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
