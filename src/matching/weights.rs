use std::collections::{BTreeSet, HashMap};

use crate::config::MatcherConfig;
use crate::constants::matching;

/// Importance of each capability when weighting a match.
///
/// Capabilities absent from the table weigh `default_weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityWeights {
    weights: HashMap<String, f64>,
    default_weight: f64,
}

impl Default for CapabilityWeights {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}

impl CapabilityWeights {
    pub fn new(weights: HashMap<String, f64>, default_weight: f64) -> Self {
        Self {
            weights,
            default_weight,
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.weights.clone(), config.default_weight)
    }

    pub fn weight(&self, capability: &str) -> f64 {
        self.weights
            .get(capability)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn total<'a>(&self, capabilities: impl IntoIterator<Item = &'a String>) -> f64 {
        capabilities.into_iter().map(|c| self.weight(c)).sum()
    }

    /// `Σw(matched requested) / Σw(requested)`; 1.0 when nothing is requested
    pub fn factor(&self, requested: &BTreeSet<String>, matched: &BTreeSet<String>) -> f64 {
        let requested_weight = self.total(requested);
        if requested.is_empty() || requested_weight <= 0.0 {
            return 1.0;
        }
        self.total(matched.intersection(requested)) / requested_weight
    }
}

impl From<HashMap<String, f64>> for CapabilityWeights {
    fn from(weights: HashMap<String, f64>) -> Self {
        Self::new(weights, matching::DEFAULT_CAPABILITY_WEIGHT)
    }
}
