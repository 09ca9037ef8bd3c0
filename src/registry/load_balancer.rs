//! Load-balanced selection among candidate services.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::matching::CapabilityMatcher;
use crate::models::{Service, ServiceId, TaskRequirements};
use crate::persistence::Persistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    ResponseTime,
    CapabilityWeighted,
    CostOptimized,
    UserPreference,
}

/// Inputs some strategies need beyond the candidate list
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub task_type: Option<String>,
    pub requirements: Option<TaskRequirements>,
    /// Most preferred first
    pub preferred_services: Vec<ServiceId>,
    pub blacklisted_services: Vec<ServiceId>,
}

/// Round-robin counters keyed by the sorted candidate-id tuple
#[derive(Debug, Default)]
pub struct RoundRobinCounters {
    counters: Mutex<HashMap<Vec<ServiceId>, usize>>,
}

impl RoundRobinCounters {
    /// Next index into a candidate set of `key.len()` services
    pub fn next_index(&self, key: Vec<ServiceId>) -> usize {
        let len = key.len().max(1);
        let mut counters = self.counters.lock();
        let counter = counters.entry(key).or_insert(0);
        let index = *counter % len;
        *counter = counter.wrapping_add(1);
        index
    }

    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LoadBalancer {
    persistence: Arc<dyn Persistence>,
    matcher: Arc<CapabilityMatcher>,
    round_robin: RoundRobinCounters,
}

impl LoadBalancer {
    pub fn new(persistence: Arc<dyn Persistence>, matcher: Arc<CapabilityMatcher>) -> Self {
        Self {
            persistence,
            matcher,
            round_robin: RoundRobinCounters::default(),
        }
    }

    /// Pick one service from `candidates`. Candidates must already be filtered
    /// for reachability; an empty slice yields `None`.
    pub async fn select(
        &self,
        candidates: &[Service],
        strategy: LoadBalancingStrategy,
        context: &SelectionContext,
    ) -> Result<Option<Service>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let selected = match strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin(candidates),
            LoadBalancingStrategy::LeastLoaded => Self::least_loaded(candidates),
            LoadBalancingStrategy::ResponseTime => self.fastest(candidates, context).await?,
            LoadBalancingStrategy::CapabilityWeighted => self.best_capability(candidates, context).await?,
            LoadBalancingStrategy::CostOptimized => Self::cheapest(candidates),
            LoadBalancingStrategy::UserPreference => Self::preferred(candidates, context),
        };

        tracing::debug!(
            strategy = ?strategy,
            candidates = candidates.len(),
            selected = selected.as_ref().map(|s| s.id),
            "⚖️ LOAD_BALANCER: Selected service"
        );

        Ok(selected)
    }

    fn round_robin(&self, candidates: &[Service]) -> Option<Service> {
        let mut ordered: Vec<&Service> = candidates.iter().collect();
        ordered.sort_by_key(|s| s.id);
        let key: Vec<ServiceId> = ordered.iter().map(|s| s.id).collect();
        let index = self.round_robin.next_index(key);
        ordered.get(index).map(|s| (*s).clone())
    }

    fn least_loaded(candidates: &[Service]) -> Option<Service> {
        candidates
            .iter()
            .min_by(|a, b| a.load_percentage().total_cmp(&b.load_percentage()))
            .cloned()
    }

    async fn fastest(&self, candidates: &[Service], context: &SelectionContext) -> Result<Option<Service>> {
        let mut best: Option<(&Service, f64)> = None;
        for service in candidates {
            let average = self
                .persistence
                .load_performance_metrics(service.id, context.task_type.as_deref())
                .await?
                .and_then(|m| m.average_duration_seconds)
                .unwrap_or(f64::INFINITY);
            if best.map_or(true, |(_, current)| average < current) {
                best = Some((service, average));
            }
        }
        Ok(best.map(|(service, _)| service.clone()))
    }

    async fn best_capability(&self, candidates: &[Service], context: &SelectionContext) -> Result<Option<Service>> {
        let Some(requirements) = &context.requirements else {
            return Ok(candidates.first().cloned());
        };
        let scores = self.matcher.match_capabilities(requirements, candidates).await?;
        Ok(scores
            .first()
            .and_then(|best| candidates.iter().find(|s| s.id == best.service_id))
            .cloned())
    }

    fn cheapest(candidates: &[Service]) -> Option<Service> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.cost_per_hour
                    .unwrap_or(0.0)
                    .total_cmp(&b.cost_per_hour.unwrap_or(0.0))
            })
            .cloned()
    }

    fn preferred(candidates: &[Service], context: &SelectionContext) -> Option<Service> {
        let allowed: Vec<Service> = candidates
            .iter()
            .filter(|s| !context.blacklisted_services.contains(&s.id))
            .cloned()
            .collect();

        context
            .preferred_services
            .iter()
            .find_map(|id| allowed.iter().find(|s| s.id == *id))
            .cloned()
            .or_else(|| Self::least_loaded(&allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PerformanceMetrics, ServiceConfig};
    use crate::persistence::InMemoryPersistence;
    use crate::state_machine::ServiceStatus;
    use chrono::Utc;
    use serde_json::json;

    fn service(id: ServiceId, load: u32, max: u32) -> Service {
        let mut config = ServiceConfig::new(format!("svc-{id}"), "hplc", format!("http://svc-{id}"));
        config.max_concurrent_tasks = max;
        let mut service = config.into_service(id, Utc::now());
        service.status = ServiceStatus::Online;
        service.current_load = load;
        service
    }

    fn balancer(store: Arc<InMemoryPersistence>) -> LoadBalancer {
        let matcher = Arc::new(CapabilityMatcher::new(store.clone()));
        LoadBalancer::new(store, matcher)
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_candidate_once() {
        let balancer = balancer(Arc::new(InMemoryPersistence::new()));
        let candidates = vec![service(3, 0, 2), service(1, 0, 2), service(2, 0, 2)];
        let context = SelectionContext::default();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let picked = balancer
                .select(&candidates, LoadBalancingStrategy::RoundRobin, &context)
                .await
                .unwrap()
                .unwrap();
            seen.push(picked.id);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_least_loaded_and_cost() {
        let balancer = balancer(Arc::new(InMemoryPersistence::new()));
        let mut a = service(1, 1, 2);
        let mut b = service(2, 1, 4);
        a.cost_per_hour = Some(12.0);
        b.cost_per_hour = None;
        let candidates = vec![a, b];
        let context = SelectionContext::default();

        let picked = balancer
            .select(&candidates, LoadBalancingStrategy::LeastLoaded, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, 2);

        let picked = balancer
            .select(&candidates, LoadBalancingStrategy::CostOptimized, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, 2);
    }

    #[tokio::test]
    async fn test_response_time_treats_missing_history_as_slowest() {
        let store = Arc::new(InMemoryPersistence::new());
        store.insert_metrics(PerformanceMetrics {
            service_id: 2,
            task_type: Some("hplc".into()),
            execution_count: 5,
            average_duration_seconds: Some(600.0),
            success_rate: Some(1.0),
            uptime: Some(1.0),
            recorded_at: Utc::now(),
        });
        let balancer = balancer(store);
        let candidates = vec![service(1, 0, 1), service(2, 0, 1)];
        let context = SelectionContext {
            task_type: Some("hplc".into()),
            ..Default::default()
        };

        let picked = balancer
            .select(&candidates, LoadBalancingStrategy::ResponseTime, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, 2);
    }

    #[tokio::test]
    async fn test_capability_weighted_prefers_better_match() {
        let balancer = balancer(Arc::new(InMemoryPersistence::new()));
        let plain = service(1, 0, 1);
        let mut equipped = service(2, 0, 1);
        equipped.capabilities.insert("autosampler".into(), json!(true));
        let context = SelectionContext {
            requirements: Some(TaskRequirements::new("hplc", Vec::<String>::new(), ["autosampler"])),
            ..Default::default()
        };

        let picked = balancer
            .select(&[plain, equipped], LoadBalancingStrategy::CapabilityWeighted, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, 2);
    }

    #[tokio::test]
    async fn test_user_preference_with_blacklist_and_fallback() {
        let balancer = balancer(Arc::new(InMemoryPersistence::new()));
        let candidates = vec![service(1, 0, 1), service(2, 1, 4), service(3, 0, 1)];

        let context = SelectionContext {
            preferred_services: vec![9, 3],
            blacklisted_services: vec![1],
            ..Default::default()
        };
        let picked = balancer
            .select(&candidates, LoadBalancingStrategy::UserPreference, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, 3);

        let context = SelectionContext {
            blacklisted_services: vec![1, 3],
            ..Default::default()
        };
        let picked = balancer
            .select(&candidates, LoadBalancingStrategy::UserPreference, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, 2);
    }

    #[tokio::test]
    async fn test_empty_candidates() {
        let balancer = balancer(Arc::new(InMemoryPersistence::new()));
        let picked = balancer
            .select(&[], LoadBalancingStrategy::LeastLoaded, &SelectionContext::default())
            .await
            .unwrap();
        assert!(picked.is_none());
    }
}
