//! # Capability Matcher
//!
//! Scores how well a service can execute a task.
//!
//! ## Scoring
//!
//! - `required_rate`: share of required capabilities the service has (1.0 when
//!   nothing is required); `optional_rate` likewise.
//! - `base = 0.8 * required_rate + 0.2 * optional_rate`
//! - `score = base * weight_factor`, where the factor is the summed weight of
//!   matched requested capabilities over the summed weight of all requested ones.
//! - Quality is derived from the two rates alone; confidence from the service's
//!   performance history and heartbeat freshness.
//!
//! Scoring is pure. The matcher only reads performance metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::weights::CapabilityWeights;
use crate::constants::matching;
use crate::error::Result;
use crate::models::{PerformanceMetrics, Service, ServiceId, Task, TaskRequirements, TaskTemplate};
use crate::persistence::Persistence;
use crate::state_machine::ServiceStatus;

/// Match quality, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    Incompatible,
    Poor,
    Adequate,
    Good,
    Excellent,
    Perfect,
}

impl MatchQuality {
    pub fn classify(required_rate: f64, optional_rate: f64) -> Self {
        if required_rate < matching::INCOMPATIBLE_BELOW {
            Self::Incompatible
        } else if required_rate < 1.0 {
            Self::Poor
        } else if optional_rate >= 1.0 {
            Self::Perfect
        } else if optional_rate >= matching::EXCELLENT_OPTIONAL_RATE {
            Self::Excellent
        } else if optional_rate >= matching::GOOD_OPTIONAL_RATE {
            Self::Good
        } else {
            Self::Adequate
        }
    }

    /// Good enough to schedule on
    pub fn is_schedulable(&self) -> bool {
        *self >= Self::Adequate
    }
}

impl fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incompatible => write!(f, "incompatible"),
            Self::Poor => write!(f, "poor"),
            Self::Adequate => write!(f, "adequate"),
            Self::Good => write!(f, "good"),
            Self::Excellent => write!(f, "excellent"),
            Self::Perfect => write!(f, "perfect"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub service_id: ServiceId,
    pub quality: MatchQuality,
    pub score: f64,
    pub required_match_rate: f64,
    pub optional_match_rate: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl MatchScore {
    /// Descending by score, then by confidence
    pub fn rank(a: &MatchScore, b: &MatchScore) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub service_id: ServiceId,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// How well the registered services cover a set of templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCoverage {
    pub total_templates: usize,
    /// Percentage of templates some single service fully covers
    pub template_coverage: f64,
    /// Percentage of requested optional capabilities offered by any service
    pub optional_coverage: f64,
    pub missing_required: BTreeSet<String>,
    pub missing_optional: BTreeSet<String>,
    pub recommendations: Vec<String>,
}

fn rate(matched: usize, requested: usize) -> f64 {
    if requested == 0 {
        1.0
    } else {
        matched as f64 / requested as f64
    }
}

/// Parse a memory size such as `"512MB"` or `"2 GB"` into megabytes.
/// Bare numbers are megabytes.
pub fn parse_memory_mb(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(raw) => {
            let upper = raw.trim().to_ascii_uppercase();
            let split = upper
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(upper.len());
            let (number, unit) = upper.split_at(split);
            let number: f64 = number.parse().ok()?;
            let factor = match unit.trim() {
                "" | "M" | "MB" => 1.0,
                "K" | "KB" => 1.0 / 1024.0,
                "G" | "GB" => 1024.0,
                "T" | "TB" => 1024.0 * 1024.0,
                _ => return None,
            };
            Some(number * factor)
        }
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub struct CapabilityMatcher {
    weights: CapabilityWeights,
    persistence: Arc<dyn Persistence>,
}

impl CapabilityMatcher {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_weights(persistence, CapabilityWeights::default())
    }

    pub fn with_weights(persistence: Arc<dyn Persistence>, weights: CapabilityWeights) -> Self {
        Self {
            weights,
            persistence,
        }
    }

    pub fn weights(&self) -> &CapabilityWeights {
        &self.weights
    }

    /// Score a single service against requirements
    pub fn score_service(
        &self,
        requirements: &TaskRequirements,
        service: &Service,
        metrics: Option<&PerformanceMetrics>,
        now: DateTime<Utc>,
    ) -> MatchScore {
        let capabilities = service.capability_names();
        let required = &requirements.required_capabilities;
        let optional = &requirements.optional_capabilities;

        let matched_required: BTreeSet<String> = required.intersection(&capabilities).cloned().collect();
        let matched_optional: BTreeSet<String> = optional.intersection(&capabilities).cloned().collect();

        let required_rate = rate(matched_required.len(), required.len());
        let optional_rate = rate(matched_optional.len(), optional.len());
        let base = matching::REQUIRED_WEIGHT * required_rate + matching::OPTIONAL_WEIGHT * optional_rate;

        let requested: BTreeSet<String> = required.union(optional).cloned().collect();
        let matched: BTreeSet<String> = matched_required.union(&matched_optional).cloned().collect();
        let score = (base * self.weights.factor(&requested, &matched)).clamp(0.0, 1.0);

        let mut reasons = Vec::new();
        if required.is_empty() || matched_required.len() == required.len() {
            reasons.push("All required capabilities available".to_string());
        } else {
            let missing: Vec<&str> = required.difference(&matched_required).map(String::as_str).collect();
            reasons.push(format!("Missing required capabilities: {}", missing.join(", ")));
        }
        if !optional.is_empty() {
            reasons.push(format!(
                "Optional capabilities: {}/{} available",
                matched_optional.len(),
                optional.len()
            ));
        }

        let confidence = self.confidence(service, metrics, now, &mut reasons);

        MatchScore {
            service_id: service.id,
            quality: MatchQuality::classify(required_rate, optional_rate),
            score,
            required_match_rate: required_rate,
            optional_match_rate: optional_rate,
            confidence,
            reasons,
        }
    }

    fn confidence(
        &self,
        service: &Service,
        metrics: Option<&PerformanceMetrics>,
        now: DateTime<Utc>,
        reasons: &mut Vec<String>,
    ) -> f64 {
        let mut confidence = matching::BASE_CONFIDENCE;

        if let Some(metrics) = metrics {
            if let Some(success_rate) = metrics.success_rate {
                confidence += matching::SUCCESS_RATE_CONFIDENCE * success_rate.clamp(0.0, 1.0);
                if success_rate >= 0.95 {
                    reasons.push(format!("High success rate: {:.1}%", success_rate * 100.0));
                }
            }
            if let Some(uptime) = metrics.uptime {
                confidence += matching::UPTIME_CONFIDENCE * uptime.clamp(0.0, 1.0);
            }
        }

        if service.heartbeat_is_fresh(now) {
            confidence += matching::HEARTBEAT_CONFIDENCE;
            reasons.push("Recent heartbeat".to_string());
        }

        confidence.min(1.0)
    }

    /// Score every candidate, best first
    pub async fn match_capabilities(
        &self,
        requirements: &TaskRequirements,
        candidates: &[Service],
    ) -> Result<Vec<MatchScore>> {
        let now = Utc::now();
        let mut scores = Vec::with_capacity(candidates.len());

        for service in candidates {
            let metrics = self.persistence.load_performance_metrics(service.id, None).await?;
            scores.push(self.score_service(requirements, service, metrics.as_ref(), now));
        }

        scores.sort_by(MatchScore::rank);

        tracing::debug!(
            task_type = %requirements.task_type,
            candidates = candidates.len(),
            best_score = scores.first().map(|s| s.score),
            "🎯 MATCHER: Scored candidates"
        );

        Ok(scores)
    }

    /// Services other than `primary_id` that are at least adequate, best first
    pub async fn find_alternatives(
        &self,
        primary_id: ServiceId,
        requirements: &TaskRequirements,
        all_services: &[Service],
    ) -> Result<Vec<Service>> {
        let others: Vec<Service> = all_services
            .iter()
            .filter(|s| s.id != primary_id)
            .cloned()
            .collect();

        let scores = self.match_capabilities(requirements, &others).await?;
        Ok(scores
            .into_iter()
            .filter(|score| score.quality.is_schedulable())
            .filter_map(|score| others.iter().find(|s| s.id == score.service_id).cloned())
            .collect())
    }

    /// Check whether `service` can take a task right now.
    ///
    /// Availability (online with spare capacity), missing required
    /// capabilities, resource shortfalls and out-of-range task parameters are
    /// errors. Scheduling may still queue work on a busy service; this check
    /// answers whether it could start immediately. Maintenance windows and
    /// performance shortfalls are warnings.
    pub async fn validate_constraints(
        &self,
        service: &Service,
        requirements: &TaskRequirements,
        task: Option<&Task>,
    ) -> Result<ValidationResult> {
        let now = Utc::now();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        if service.status != ServiceStatus::Online {
            errors.push(format!("Service is {}", service.status));
        }
        if !service.has_capacity() {
            errors.push(format!(
                "Service at capacity ({}/{})",
                service.current_load, service.max_concurrent_tasks
            ));
        } else if service.load_percentage() >= 80.0 {
            recommendations.push(format!(
                "Service is heavily loaded ({:.0}%)",
                service.load_percentage()
            ));
        }
        if service.in_maintenance(now) {
            warnings.push("Service is inside its maintenance window".to_string());
        }

        let capabilities = service.capability_names();
        let missing_required: Vec<&str> = requirements
            .required_capabilities
            .difference(&capabilities)
            .map(String::as_str)
            .collect();
        if !missing_required.is_empty() {
            errors.push(format!(
                "Missing required capabilities: {}",
                missing_required.join(", ")
            ));
        }
        for missing in requirements.optional_capabilities.difference(&capabilities) {
            recommendations.push(format!("Optional capability not available: {missing}"));
        }

        self.check_resources(service, requirements, &mut errors, &mut warnings);

        if !requirements.performance_requirements.is_empty() {
            let metrics = self
                .persistence
                .load_performance_metrics(service.id, Some(&requirements.task_type))
                .await?;
            Self::check_performance(requirements, metrics.as_ref(), &mut warnings);
        }

        if let Some(task) = task {
            Self::check_parameter_limits(service, task, &mut errors);
        }

        Ok(ValidationResult {
            service_id: service.id,
            is_valid: errors.is_empty(),
            errors,
            warnings,
            recommendations,
        })
    }

    fn check_resources(
        &self,
        service: &Service,
        requirements: &TaskRequirements,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        for (resource, required) in &requirements.resource_requirements {
            match resource.as_str() {
                "memory" => {
                    let needed = parse_memory_mb(required);
                    let available = service
                        .configuration
                        .get("available_memory")
                        .and_then(parse_memory_mb);
                    match (needed, available) {
                        (Some(needed), Some(available)) if available < needed => errors.push(format!(
                            "Insufficient memory: requires {needed:.0}MB, available {available:.0}MB"
                        )),
                        (Some(_), None) => warnings.push("Service does not report available memory".to_string()),
                        _ => {}
                    }
                }
                _ => {
                    let Some(needed) = as_number(required) else {
                        continue;
                    };
                    match service.configuration_number(resource) {
                        Some(available) if available < needed => errors.push(format!(
                            "Insufficient {resource}: requires {needed}, available {available}"
                        )),
                        None => warnings.push(format!("Service does not report {resource}")),
                        _ => {}
                    }
                }
            }
        }
    }

    fn check_performance(
        requirements: &TaskRequirements,
        metrics: Option<&PerformanceMetrics>,
        warnings: &mut Vec<String>,
    ) {
        let Some(metrics) = metrics else {
            warnings.push("No performance history for this task type".to_string());
            return;
        };

        let performance = &requirements.performance_requirements;
        if let (Some(max), Some(avg)) = (
            performance.get("max_duration_seconds").and_then(as_number),
            metrics.average_duration_seconds,
        ) {
            if avg > max {
                warnings.push(format!(
                    "Average duration {avg:.0}s exceeds maximum {max:.0}s"
                ));
            }
        }
        if let (Some(min), Some(actual)) = (
            performance.get("min_success_rate").and_then(as_number),
            metrics.success_rate,
        ) {
            if actual < min {
                warnings.push(format!(
                    "Success rate {:.1}% below required {:.1}%",
                    actual * 100.0,
                    min * 100.0
                ));
            }
        }
    }

    fn check_parameter_limits(service: &Service, task: &Task, errors: &mut Vec<String>) {
        let Some(Value::Object(limits)) = service.configuration.get("parameter_limits") else {
            return;
        };

        for (parameter, value) in &task.service_parameters {
            let (Some(value), Some(limit)) = (as_number(value), limits.get(parameter)) else {
                continue;
            };
            if let Some(min) = limit.get("min").and_then(as_number) {
                if value < min {
                    errors.push(format!("Parameter {parameter}={value} below minimum {min}"));
                }
            }
            if let Some(max) = limit.get("max").and_then(as_number) {
                if value > max {
                    errors.push(format!("Parameter {parameter}={value} above maximum {max}"));
                }
            }
        }
    }
}

/// Coverage of template capability needs by the given services
pub fn coverage_report(templates: &[TaskTemplate], services: &[Service]) -> CapabilityCoverage {
    let service_capabilities: Vec<BTreeSet<String>> = services
        .iter()
        .filter(|s| s.status != ServiceStatus::Offline)
        .map(Service::capability_names)
        .collect();
    let offered: BTreeSet<String> = service_capabilities.iter().flatten().cloned().collect();

    let mut covered_templates = 0;
    let mut requested_optional = BTreeSet::new();
    let mut missing_required = BTreeSet::new();
    let mut missing_optional = BTreeSet::new();

    for template in templates {
        let required: BTreeSet<String> = template.required_capabilities.iter().cloned().collect();
        if service_capabilities.iter().any(|caps| required.is_subset(caps)) {
            covered_templates += 1;
        }
        missing_required.extend(required.difference(&offered).cloned());
        for optional in &template.optional_capabilities {
            requested_optional.insert(optional.clone());
            if !offered.contains(optional) {
                missing_optional.insert(optional.clone());
            }
        }
    }

    let mut recommendations: Vec<String> = missing_required
        .iter()
        .map(|cap| format!("Add a service providing required capability: {cap}"))
        .collect();
    recommendations.extend(
        missing_optional
            .iter()
            .map(|cap| format!("Consider adding optional capability: {cap}")),
    );

    CapabilityCoverage {
        total_templates: templates.len(),
        template_coverage: rate(covered_templates, templates.len()) * 100.0,
        optional_coverage: rate(
            requested_optional.len() - missing_optional.len(),
            requested_optional.len(),
        ) * 100.0,
        missing_required,
        missing_optional,
        recommendations,
    }
}
