#![allow(dead_code)]

use proptest::prelude::*;
use std::collections::BTreeSet;

const CAPABILITY_POOL: &[&str] = &[
    "hplc",
    "uv_detector",
    "autosampler",
    "column_oven",
    "balance",
    "pipette",
    "ph_measurement",
    "heating",
    "cooling",
    "centrifuge",
];

/// Strategy for generating capability names from a fixed pool
pub fn capability_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(CAPABILITY_POOL).prop_map(str::to_string)
}

/// Strategy for generating capability sets
pub fn capability_set_strategy(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(capability_strategy(), 0..=max)
}

/// A required set and a service capability set that contains it
pub fn covered_requirements_strategy() -> impl Strategy<Value = (BTreeSet<String>, BTreeSet<String>)> {
    (capability_set_strategy(4), capability_set_strategy(4)).prop_map(|(required, extra)| {
        let offered = required.union(&extra).cloned().collect();
        (required, offered)
    })
}

/// Acyclic dependency edges over `1..=n` tasks: every edge points from a
/// lower-numbered prerequisite to a higher-numbered dependent
pub fn acyclic_graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..=12).prop_flat_map(|n| {
        let edge = (1..=n, 1..=n)
            .prop_filter("No self-loops", |(a, b)| a != b)
            .prop_map(|(a, b)| if a < b { (b, a) } else { (a, b) });
        (Just(n), prop::collection::vec(edge, 0..n * 2))
    })
}
