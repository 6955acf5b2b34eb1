//! Proptest strategies for site data and its partitions.

#![allow(dead_code)]

use proptest::prelude::*;

/// Finite observations in a range where sums stay well conditioned
pub fn observation_strategy() -> impl Strategy<Value = f64> {
    (-1_000i32..1_000).prop_map(|v| f64::from(v) / 4.0)
}

/// Observations split across 1..=6 sites, each site holding at least one
pub fn site_partition_strategy() -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(observation_strategy(), 1..20), 1..=6)
}

/// Paired observations with some spread in both coordinates
pub fn paired_partition_strategy() -> impl Strategy<Value = Vec<Vec<(f64, f64)>>> {
    prop::collection::vec(
        prop::collection::vec((observation_strategy(), observation_strategy()), 1..15),
        1..=5,
    )
}

/// Categorical rows `(sex, smoker, count)` per site
pub fn table_partition_strategy() -> impl Strategy<Value = Vec<Vec<(String, String, u32)>>> {
    let row = (
        prop::sample::select(vec!["F", "M", "X"]),
        prop::sample::select(vec!["yes", "no"]),
        1u32..50,
    )
        .prop_map(|(sex, smoker, count)| (sex.to_string(), smoker.to_string(), count));
    prop::collection::vec(prop::collection::vec(row, 1..8), 1..=4)
}
