//! # Adapter Registry
//!
//! Static registration table mapping service types to the [`ServiceCaller`]
//! that talks to them.
//!
//! ## Overview
//!
//! Adapters are registered explicitly at startup; nothing is discovered at
//! runtime. A service type without its own adapter falls back to the default
//! adapter when one is set. Disabling an adapter makes every service of that
//! type unreachable until it is re-enabled.
//!
//! ## Usage
//!
//! ```rust
//! use labflow_core::client::HttpServiceCaller;
//! use labflow_core::registry::AdapterRegistry;
//! use std::sync::Arc;
//!
//! let registry = AdapterRegistry::with_default(Arc::new(HttpServiceCaller::new()));
//! registry.register("hplc", Arc::new(HttpServiceCaller::new()));
//! assert!(registry.resolve("hplc").is_ok());
//! assert!(registry.resolve("balance").is_ok());
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::client::ServiceCaller;
use crate::error::{LabflowError, Result};

/// Registration metadata for an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterRegistration {
    pub service_type: String,
    pub adapter_name: String,
    pub enabled: bool,
    pub registered_at: DateTime<Utc>,
}

struct AdapterEntry {
    caller: Arc<dyn ServiceCaller>,
    registration: AdapterRegistration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterRegistryStats {
    pub total_adapters: usize,
    pub enabled_adapters: usize,
    pub disabled_adapters: usize,
    pub has_default: bool,
}

/// Registry of service callers keyed by service type
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, AdapterEntry>>,
    default: RwLock<Option<Arc<dyn ServiceCaller>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(caller: Arc<dyn ServiceCaller>) -> Self {
        let registry = Self::new();
        registry.set_default(caller);
        registry
    }

    /// Register (or replace) the adapter for a service type
    pub fn register(&self, service_type: &str, caller: Arc<dyn ServiceCaller>) {
        let registration = AdapterRegistration {
            service_type: service_type.to_string(),
            adapter_name: caller.name().to_string(),
            enabled: true,
            registered_at: Utc::now(),
        };

        info!(
            service_type = %service_type,
            adapter = %registration.adapter_name,
            "🔌 ADAPTER_REGISTRY: Registered adapter"
        );

        self.adapters.write().insert(
            service_type.to_string(),
            AdapterEntry {
                caller,
                registration,
            },
        );
    }

    pub fn set_default(&self, caller: Arc<dyn ServiceCaller>) {
        info!(adapter = %caller.name(), "🔌 ADAPTER_REGISTRY: Default adapter set");
        *self.default.write() = Some(caller);
    }

    pub fn enable(&self, service_type: &str) -> Result<()> {
        self.set_enabled(service_type, true)
    }

    pub fn disable(&self, service_type: &str) -> Result<()> {
        self.set_enabled(service_type, false)
    }

    fn set_enabled(&self, service_type: &str, enabled: bool) -> Result<()> {
        let mut adapters = self.adapters.write();
        let entry = adapters.get_mut(service_type).ok_or_else(|| {
            LabflowError::Configuration(format!("No adapter registered for service type '{service_type}'"))
        })?;
        entry.registration.enabled = enabled;
        info!(
            service_type = %service_type,
            enabled = enabled,
            "🔌 ADAPTER_REGISTRY: Adapter state changed"
        );
        Ok(())
    }

    /// Adapter for a service type, falling back to the default adapter
    pub fn resolve(&self, service_type: &str) -> Result<Arc<dyn ServiceCaller>> {
        if let Some(entry) = self.adapters.read().get(service_type) {
            if entry.registration.enabled {
                return Ok(Arc::clone(&entry.caller));
            }
            return Err(LabflowError::Configuration(format!(
                "Adapter for service type '{service_type}' is disabled"
            )));
        }

        self.default.read().clone().ok_or_else(|| {
            LabflowError::Configuration(format!(
                "No adapter registered for service type '{service_type}' and no default adapter"
            ))
        })
    }

    pub fn list(&self) -> Vec<AdapterRegistration> {
        let mut registrations: Vec<AdapterRegistration> = self
            .adapters
            .read()
            .values()
            .map(|entry| entry.registration.clone())
            .collect();
        registrations.sort_by(|a, b| a.service_type.cmp(&b.service_type));
        registrations
    }

    pub fn stats(&self) -> AdapterRegistryStats {
        let adapters = self.adapters.read();
        let enabled = adapters.values().filter(|e| e.registration.enabled).count();
        AdapterRegistryStats {
            total_adapters: adapters.len(),
            enabled_adapters: enabled,
            disabled_adapters: adapters.len() - enabled,
            has_default: self.default.read().is_some(),
        }
    }
}
