//! # Service Registry
//!
//! Owns the live view of every instrument service: status, load and
//! capabilities.
//!
//! ## Overview
//!
//! The registry keeps services in a concurrent map and mirrors every change to
//! persistence. `current_load` and `status` change only here, each change a
//! single read-modify-write under the map's entry lock, so load and the
//! online/busy flip can never be observed apart.
//!
//! ## Capacity
//!
//! Executors take a slot with [`ServiceRegistry::acquire_slot`] before invoking
//! a service and give it back with [`ServiceRegistry::release_slot`]. Waiters are
//! woken whenever load drops.
//!
//! ## Health
//!
//! [`ServiceRegistry::health_check_all`] probes every service concurrently with a
//! per-service timeout. A probe that times out or errors marks the service
//! offline; a non-success answer marks it as errored. Services in maintenance
//! are not probed.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adapter_registry::AdapterRegistry;
use super::load_balancer::{LoadBalancer, LoadBalancingStrategy, SelectionContext};
use crate::config::RegistryConfig;
use crate::constants::{events, status_groups};
use crate::error::{LabflowError, Result};
use crate::logging::{log_error, log_service_operation};
use crate::matching::CapabilityMatcher;
use crate::models::{HealthStatus, LoadMetrics, Service, ServiceConfig, ServiceId};
use crate::persistence::{Persistence, QueueFilter, ServiceFilter};
use crate::state_machine::ServiceStatus;

/// Optional filters for [`ServiceRegistry::discover`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConstraints {
    pub category: Option<String>,
    pub location: Option<String>,
    pub max_cost_per_hour: Option<f64>,
    /// Keep services at this priority level or better (numerically lower)
    pub min_priority: Option<u8>,
}

/// Result of a non-blocking slot request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAcquisition {
    Acquired,
    AtCapacity,
    Unavailable(ServiceStatus),
}

pub struct ServiceRegistry {
    persistence: Arc<dyn Persistence>,
    adapters: Arc<AdapterRegistry>,
    matcher: Arc<CapabilityMatcher>,
    balancer: LoadBalancer,
    services: DashMap<ServiceId, Service>,
    slot_released: Notify,
    config: RegistryConfig,
}

impl ServiceRegistry {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        adapters: Arc<AdapterRegistry>,
        matcher: Arc<CapabilityMatcher>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            balancer: LoadBalancer::new(Arc::clone(&persistence), Arc::clone(&matcher)),
            persistence,
            adapters,
            matcher,
            services: DashMap::new(),
            slot_released: Notify::new(),
            config,
        }
    }

    pub fn matcher(&self) -> &Arc<CapabilityMatcher> {
        &self.matcher
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// Load every stored service into the live view. Returns the count loaded.
    pub async fn load_services(&self) -> Result<usize> {
        let services = self.persistence.load_services(&ServiceFilter::default()).await?;
        let count = services.len();
        for service in services {
            self.services.insert(service.id, service);
        }
        info!(count = count, "📚 SERVICE_REGISTRY: Loaded services from store");
        Ok(count)
    }

    /// Register a new service. It starts offline and is health-checked once
    /// before being returned.
    pub async fn register(&self, config: ServiceConfig) -> Result<Service> {
        let service = self.persistence.insert_service(config).await?;
        self.services.insert(service.id, service.clone());

        let health = self.probe_and_apply(&service).await;
        log_service_operation(
            events::SERVICE_REGISTERED,
            service.id,
            Some(&service.name),
            &health.status.to_string(),
            health.error.as_deref(),
        );

        self.get(service.id)
            .ok_or_else(|| LabflowError::service_not_found(service.id))
    }

    /// Remove a service that no pending or running queue entry references
    pub async fn deregister(&self, service_id: ServiceId) -> Result<()> {
        if !self.services.contains_key(&service_id) {
            return Err(LabflowError::service_not_found(service_id));
        }

        let active = self
            .persistence
            .load_queue_entries(
                &QueueFilter::for_service(service_id).with_statuses(status_groups::ACTIVE_QUEUE_STATES),
            )
            .await?;
        if !active.is_empty() {
            return Err(LabflowError::validation(format!(
                "Service {service_id} still has {} active queue entries",
                active.len()
            )));
        }

        self.services.remove(&service_id);
        self.persistence.delete_service(service_id).await?;
        log_service_operation(events::SERVICE_DEREGISTERED, service_id, None, "removed", None);
        Ok(())
    }

    pub fn get(&self, service_id: ServiceId) -> Option<Service> {
        self.services.get(&service_id).map(|s| s.clone())
    }

    /// All live services ordered by id
    pub fn snapshot(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.iter().map(|s| s.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        services
    }

    /// Online services holding every `required` capability, filtered by
    /// `constraints` and ordered by how many `optional` capabilities they offer
    pub fn discover(
        &self,
        required: &BTreeSet<String>,
        optional: &BTreeSet<String>,
        constraints: &DiscoveryConstraints,
    ) -> Vec<Service> {
        let mut found: Vec<Service> = self
            .snapshot()
            .into_iter()
            .filter(|s| s.status == ServiceStatus::Online)
            .filter(|s| required.iter().all(|cap| s.has_capability(cap)))
            .filter(|s| {
                constraints
                    .category
                    .as_ref()
                    .map_or(true, |category| s.category.as_ref() == Some(category))
            })
            .filter(|s| {
                constraints
                    .location
                    .as_ref()
                    .map_or(true, |location| s.location.as_ref() == Some(location))
            })
            .filter(|s| {
                constraints
                    .max_cost_per_hour
                    .map_or(true, |max| s.cost_per_hour.unwrap_or(0.0) <= max)
            })
            .filter(|s| constraints.min_priority.map_or(true, |min| s.priority <= min))
            .collect();

        if !optional.is_empty() {
            found.sort_by_key(|s| {
                std::cmp::Reverse(optional.iter().filter(|cap| s.has_capability(cap)).count())
            });
        }

        debug!(
            required = ?required,
            found = found.len(),
            "🔍 SERVICE_REGISTRY: Discovery complete"
        );
        found
    }

    /// Online services under capacity, ordered by priority. With a `user_id`,
    /// the user's stored preference drops blacklisted services and moves
    /// preferred ones to the front.
    pub async fn get_available(&self, task_type: Option<&str>, user_id: Option<&str>) -> Result<Vec<Service>> {
        self.filtered_for_user(Service::is_available, task_type, user_id).await
    }

    /// Like [`get_available`](Self::get_available) but also keeps busy
    /// services: a queue entry placed on a full service waits for a slot.
    pub async fn get_schedulable(&self, task_type: Option<&str>, user_id: Option<&str>) -> Result<Vec<Service>> {
        self.filtered_for_user(Service::accepts_queued_work, task_type, user_id).await
    }

    async fn filtered_for_user(
        &self,
        keep: fn(&Service) -> bool,
        task_type: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self.snapshot().into_iter().filter(|s| keep(s)).collect();
        services.sort_by_key(|s| (s.priority, s.id));

        let Some(user_id) = user_id else {
            return Ok(services);
        };
        let Some(preference) = self.persistence.load_user_preference(user_id, task_type).await? else {
            return Ok(services);
        };

        services.retain(|s| !preference.blacklisted_service_ids.contains(&s.id));
        services.sort_by_key(|s| {
            preference
                .preferred_service_ids
                .iter()
                .position(|id| *id == s.id)
                .unwrap_or(usize::MAX)
        });
        Ok(services)
    }

    /// Choose among `candidates` using their live records. Candidates that
    /// went offline since they were listed are skipped; busy ones stay
    /// eligible and rank behind services with spare capacity.
    pub async fn select(
        &self,
        candidates: &[Service],
        strategy: LoadBalancingStrategy,
        context: &SelectionContext,
    ) -> Result<Option<Service>> {
        let live: Vec<Service> = candidates
            .iter()
            .filter_map(|c| self.get(c.id))
            .filter(Service::accepts_queued_work)
            .collect();
        self.balancer.select(&live, strategy, context).await
    }

    /// Apply a load delta atomically with the online/busy flip
    pub async fn update_load(&self, service_id: ServiceId, delta: i32) -> Result<Service> {
        let (updated, applied) = {
            let mut service = self
                .services
                .get_mut(&service_id)
                .ok_or_else(|| LabflowError::service_not_found(service_id))?;
            let before = i64::from(service.current_load);
            service.apply_load_delta(delta, Utc::now());
            (service.clone(), i64::from(service.current_load) - before)
        };

        if applied != 0 {
            self.mirror_load(service_id, applied as i32).await;
        }
        if applied < 0 {
            self.slot_released.notify_waiters();
        }

        debug!(
            service_id = service_id,
            current_load = updated.current_load,
            status = %updated.status,
            "⚖️ SERVICE_REGISTRY: Load updated"
        );
        Ok(updated)
    }

    /// Take a slot if the service is online with spare capacity
    pub async fn try_acquire_slot(&self, service_id: ServiceId) -> Result<SlotAcquisition> {
        let outcome = {
            let mut service = self
                .services
                .get_mut(&service_id)
                .ok_or_else(|| LabflowError::service_not_found(service_id))?;
            match service.status {
                ServiceStatus::Online if service.has_capacity() => {
                    service.apply_load_delta(1, Utc::now());
                    SlotAcquisition::Acquired
                }
                ServiceStatus::Online | ServiceStatus::Busy => SlotAcquisition::AtCapacity,
                other => SlotAcquisition::Unavailable(other),
            }
        };

        if outcome == SlotAcquisition::Acquired {
            self.mirror_load(service_id, 1).await;
        }
        Ok(outcome)
    }

    /// Wait up to `timeout` for a slot on the service
    pub async fn acquire_slot(
        &self,
        service_id: ServiceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.slot_released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire_slot(service_id).await? {
                SlotAcquisition::Acquired => return Ok(()),
                SlotAcquisition::Unavailable(status) => {
                    return Err(LabflowError::Capacity(format!(
                        "service {service_id} is {status}"
                    )))
                }
                SlotAcquisition::AtCapacity => {}
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(LabflowError::Capacity(format!(
                        "timed out after {}s waiting for a slot on service {service_id}",
                        timeout.as_secs()
                    )));
                }
                _ = cancel.cancelled() => {
                    return Err(LabflowError::Capacity(format!(
                        "cancelled while waiting for a slot on service {service_id}"
                    )));
                }
            }
        }
    }

    pub async fn release_slot(&self, service_id: ServiceId) -> Result<Service> {
        self.update_load(service_id, -1).await
    }

    async fn mirror_load(&self, service_id: ServiceId, delta: i32) {
        if let Err(e) = self.persistence.update_service_load(service_id, delta).await {
            log_error(
                "ServiceRegistry",
                "update_service_load",
                &e.to_string(),
                Some(&format!("service_id={service_id}")),
            );
        }
    }

    /// Put a service into or take it out of maintenance. Leaving maintenance
    /// marks it offline until the next health check.
    pub async fn set_maintenance(&self, service_id: ServiceId, maintenance: bool) -> Result<Service> {
        let updated = {
            let mut service = self
                .services
                .get_mut(&service_id)
                .ok_or_else(|| LabflowError::service_not_found(service_id))?;
            service.status = if maintenance {
                ServiceStatus::Maintenance
            } else {
                ServiceStatus::Offline
            };
            service.updated_at = Utc::now();
            service.clone()
        };
        self.persistence.save_service(&updated).await?;
        log_service_operation(
            events::SERVICE_STATUS_CHANGED,
            service_id,
            Some(&updated.name),
            &updated.status.to_string(),
            None,
        );
        Ok(updated)
    }

    /// Probe every service concurrently
    pub async fn health_check_all(&self) -> HashMap<ServiceId, HealthStatus> {
        let services: Vec<Service> = self
            .snapshot()
            .into_iter()
            .filter(|s| s.status != ServiceStatus::Maintenance)
            .collect();

        let results = join_all(services.iter().map(|s| self.probe_and_apply(s))).await;

        let online = results.iter().filter(|h| h.status.is_reachable()).count();
        info!(
            checked = results.len(),
            reachable = online,
            "🩺 SERVICE_REGISTRY: Health check sweep complete"
        );

        results.into_iter().map(|h| (h.service_id, h)).collect()
    }

    pub async fn check_service_health(&self, service_id: ServiceId) -> Result<HealthStatus> {
        let service = self
            .get(service_id)
            .ok_or_else(|| LabflowError::service_not_found(service_id))?;
        Ok(self.probe_and_apply(&service).await)
    }

    async fn probe(&self, service: &Service) -> HealthStatus {
        let timeout = self.config.health_check_timeout();
        let started = std::time::Instant::now();
        let mut health = HealthStatus {
            service_id: service.id,
            status: ServiceStatus::Offline,
            response_time_ms: None,
            error: None,
            checked_at: Utc::now(),
        };

        let caller = match self.adapters.resolve(&service.service_type) {
            Ok(caller) => caller,
            Err(e) => {
                health.status = ServiceStatus::Error;
                health.error = Some(e.to_string());
                return health;
            }
        };

        match tokio::time::timeout(timeout, caller.health_check(&service.health_endpoint(), timeout)).await {
            Ok(Ok(probe)) => {
                health.response_time_ms = Some(probe.response_time_ms);
                if probe.up {
                    health.status = ServiceStatus::Online;
                } else {
                    health.status = ServiceStatus::Error;
                    health.error = Some("health endpoint reported failure".to_string());
                }
            }
            Ok(Err(e)) => {
                health.error = Some(e.to_string());
            }
            Err(_) => {
                health.response_time_ms = Some(started.elapsed().as_millis() as u64);
                health.error = Some(format!("health check timed out after {}s", timeout.as_secs()));
            }
        }
        health
    }

    async fn probe_and_apply(&self, service: &Service) -> HealthStatus {
        let health = self.probe(service).await;

        let updated = self.services.get_mut(&service.id).map(|mut live| {
            let previous = live.status;
            live.status = match health.status {
                ServiceStatus::Online if !live.has_capacity() => ServiceStatus::Busy,
                status => status,
            };
            if health.status == ServiceStatus::Online {
                live.last_heartbeat = Some(health.checked_at);
            }
            live.updated_at = health.checked_at;
            (previous, live.clone())
        });

        if let Some((previous, updated)) = updated {
            if previous != updated.status {
                warn!(
                    service_id = updated.id,
                    from = %previous,
                    to = %updated.status,
                    error = health.error.as_deref(),
                    "🩺 SERVICE_REGISTRY: Service status changed"
                );
            }
            if let Err(e) = self.persistence.save_service(&updated).await {
                log_error("ServiceRegistry", "save_service", &e.to_string(), None);
            }
        }

        health
    }

    pub async fn get_service_metrics(&self, service_id: ServiceId) -> Result<LoadMetrics> {
        let service = self
            .get(service_id)
            .ok_or_else(|| LabflowError::service_not_found(service_id))?;
        let metrics = self.persistence.load_performance_metrics(service_id, None).await?;

        Ok(LoadMetrics {
            service_id,
            status: service.status,
            current_load: service.current_load,
            max_capacity: service.max_concurrent_tasks,
            load_percentage: service.load_percentage(),
            average_duration_seconds: metrics.as_ref().and_then(|m| m.average_duration_seconds),
            success_rate: metrics.as_ref().and_then(|m| m.success_rate),
            uptime: metrics.as_ref().and_then(|m| m.uptime),
            last_heartbeat: service.last_heartbeat,
        })
    }

    /// Run `health_check_all` every configured interval until `token` is cancelled
    pub fn spawn_health_monitor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.health_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_secs = registry.config.health_check_interval_seconds,
                "🩺 SERVICE_REGISTRY: Health monitor started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.health_check_all().await;
                    }
                }
            }

            info!("🩺 SERVICE_REGISTRY: Health monitor stopped");
        })
    }
}
