//! # Capability Matching
//!
//! Pure scoring of task requirements against candidate services, plus
//! constraint validation and capability coverage analysis.

pub mod capability_matcher;
pub mod weights;

pub use capability_matcher::{
    coverage_report, parse_memory_mb, CapabilityCoverage, CapabilityMatcher, MatchQuality,
    MatchScore, ValidationResult,
};
pub use weights::CapabilityWeights;
