mod common;

use chrono::Utc;
use common::strategies::*;
use labflow_core::matching::{CapabilityMatcher, MatchQuality};
use labflow_core::models::{ServiceConfig, TaskDependency, TaskRequirements};
use labflow_core::orchestration::{BackoffCalculator, DependencyGraph};
use labflow_core::persistence::InMemoryPersistence;
use labflow_core::registry::RoundRobinCounters;
use proptest::prelude::*;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn matcher() -> CapabilityMatcher {
    CapabilityMatcher::new(Arc::new(InMemoryPersistence::new()))
}

fn dependencies(edges: &[(usize, usize)]) -> Vec<TaskDependency> {
    edges
        .iter()
        .map(|(dependent, prerequisite)| TaskDependency::new(1, *dependent as i64, *prerequisite as i64))
        .collect()
}

proptest! {
    /// Property: a service offering every required capability is never incompatible
    #[test]
    fn covered_requirements_are_fully_matched(
        (required, offered) in covered_requirements_strategy(),
        optional in capability_set_strategy(3),
    ) {
        let mut config = ServiceConfig::new("svc", "hplc", "http://svc");
        for capability in &offered {
            config.capabilities.insert(capability.clone(), json!(true));
        }
        let service = config.into_service(1, Utc::now());
        let requirements = TaskRequirements::new("task", required.iter().cloned(), optional.iter().cloned());

        let score = matcher().score_service(&requirements, &service, None, Utc::now());

        prop_assert_eq!(score.required_match_rate, 1.0);
        prop_assert_ne!(score.quality, MatchQuality::Incompatible);
        prop_assert!(score.quality.is_schedulable());
        prop_assert!((0.0..=1.0).contains(&score.score));
    }

    /// Property: capabilities set to false count as absent
    #[test]
    fn disabled_capabilities_do_not_match(required in capability_set_strategy(4)) {
        prop_assume!(!required.is_empty());
        let mut config = ServiceConfig::new("svc", "hplc", "http://svc");
        for capability in &required {
            config.capabilities.insert(capability.clone(), json!(false));
        }
        let service = config.into_service(1, Utc::now());
        let requirements = TaskRequirements::new("task", required.iter().cloned(), Vec::<String>::new());

        let score = matcher().score_service(&requirements, &service, None, Utc::now());

        prop_assert_eq!(score.required_match_rate, 0.0);
        prop_assert_eq!(score.quality, MatchQuality::Incompatible);
    }

    /// Property: every task sits exactly one level above its deepest prerequisite
    #[test]
    fn levels_respect_dependencies((n, edges) in acyclic_graph_strategy()) {
        let tasks: Vec<i64> = (1..=n as i64).collect();
        let graph = DependencyGraph::build(1, &tasks, &dependencies(&edges)).unwrap();
        let level_of = graph.level_of();

        let placed: usize = graph.levels().iter().map(Vec::len).sum();
        prop_assert_eq!(placed, n);

        for task in &tasks {
            let expected = graph
                .prerequisites(*task)
                .iter()
                .map(|p| level_of[p] + 1)
                .max()
                .unwrap_or(0);
            prop_assert_eq!(level_of[task], expected);
        }

        let position: HashMap<i64, usize> = graph
            .topological_order()
            .iter()
            .enumerate()
            .map(|(index, task)| (*task, index))
            .collect();
        for (dependent, prerequisite) in &edges {
            prop_assert!(position[&(*prerequisite as i64)] < position[&(*dependent as i64)]);
        }
    }

    /// Property: the critical path is a dependency chain at least as long as any task
    #[test]
    fn critical_path_is_a_chain((n, edges) in acyclic_graph_strategy(), base in 1u64..1000) {
        let tasks: Vec<i64> = (1..=n as i64).collect();
        let graph = DependencyGraph::build(1, &tasks, &dependencies(&edges)).unwrap();
        let durations: HashMap<i64, u64> = tasks.iter().map(|t| (*t, base * *t as u64)).collect();

        let (path, total) = graph.critical_path(&durations);

        prop_assert_eq!(total, path.iter().map(|t| durations[t]).sum::<u64>());
        prop_assert!(total >= durations.values().copied().max().unwrap_or(0));
        for pair in path.windows(2) {
            prop_assert!(graph.prerequisites(pair[1]).contains(&pair[0]));
        }
    }

    /// Property: closing any edge set back on itself is reported as a cycle
    #[test]
    fn cycles_are_rejected(n in 2usize..8) {
        let mut edges: Vec<(usize, usize)> = (2..=n).map(|t| (t, t - 1)).collect();
        edges.push((1, n));
        let tasks: Vec<i64> = (1..=n as i64).collect();
        prop_assert!(DependencyGraph::build(1, &tasks, &dependencies(&edges)).is_err());
    }

    /// Property: round-robin visits every candidate once per rotation
    #[test]
    fn round_robin_visits_each_candidate(ids in prop::collection::btree_set(1i64..500, 1..8)) {
        let counters = RoundRobinCounters::default();
        let key: Vec<i64> = ids.iter().copied().collect();

        let visited: HashSet<usize> = (0..key.len()).map(|_| counters.next_index(key.clone())).collect();

        prop_assert_eq!(visited.len(), key.len());
        prop_assert_eq!(counters.next_index(key.clone()), 0);
    }

    /// Property: backoff never decreases and never exceeds its cap
    #[test]
    fn backoff_is_monotonic_and_capped(retries in 0u32..40) {
        let calculator = BackoffCalculator::default();
        let max = calculator.config().max_delay_seconds;
        let current = calculator.calculate(retries).delay_seconds;
        let next = calculator.calculate(retries + 1).delay_seconds;
        prop_assert!(current <= next);
        prop_assert!(next <= max);
    }
}

#[test]
fn unknown_dependency_ids_are_rejected() {
    let result = DependencyGraph::build(1, &[1, 2], &dependencies(&[(2, 9)]));
    assert!(result.is_err());
}
