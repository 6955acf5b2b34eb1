//! # Aggregate Store
//!
//! Sufficient statistics retained by successful runs, one scope per run.
//!
//! A statistic can be finalized from stored data only when a single run's
//! fields cover its whole schema. Mixing fields of different runs would
//! combine numbers computed over different queries, so the merged view is
//! exposed for inspection only.
//!
//! Recording a run drops every earlier run whose fields it covers: such a run
//! can no longer be the latest covering run for any schema, and each of its
//! fields is shadowed in the merged view. The store therefore holds at most
//! one run per distinct field set.

use super::types::RunId;
use crate::combiner::{AggregateState, StatisticKind};
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StoredAggregate {
    pub run_id: RunId,
    pub statistic: StatisticKind,
    pub state: AggregateState,
    pub job_id: Option<String>,
    pub sites: Vec<String>,
    pub result_count: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Run-scoped aggregates in recording order
#[derive(Debug, Default)]
pub struct AggregateStore {
    entries: Vec<StoredAggregate>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: StoredAggregate) {
        let before = self.entries.len();
        self.entries
            .retain(|stored| !stored.state.field_names().all(|field| entry.state.contains(field)));
        debug!(
            run_id = %entry.run_id,
            statistic = %entry.statistic,
            fields = ?entry.state.field_names().collect::<Vec<_>>(),
            superseded = before - self.entries.len(),
            "Recording aggregate state"
        );
        self.entries.push(entry);
    }

    /// Most recent run whose fields cover `schema`
    pub fn latest_covering(&self, schema: &[&str]) -> Option<&StoredAggregate> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.state.covers(schema))
    }

    /// Statistics some stored run can finalize, in catalogue order
    pub fn runnable(&self) -> Vec<StatisticKind> {
        StatisticKind::ALL
            .into_iter()
            .filter(|kind| self.latest_covering(kind.schema()).is_some())
            .collect()
    }

    /// All stored fields, later runs overwriting earlier ones
    pub fn merged_view(&self) -> AggregateState {
        let mut merged = AggregateState::new();
        for entry in &self.entries {
            merged.extend(&entry.state);
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::AggregateValue;
    use crate::constants::fields;

    fn entry(statistic: StatisticKind, values: &[(&str, f64)]) -> StoredAggregate {
        StoredAggregate {
            run_id: RunId::new(),
            statistic,
            state: values
                .iter()
                .map(|(field, value)| (field.to_string(), AggregateValue::Scalar(*value)))
                .collect(),
            job_id: None,
            sites: Vec::new(),
            result_count: 0,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_variance_run_makes_mean_runnable() {
        let mut store = AggregateStore::new();
        store.record(entry(
            StatisticKind::Variance,
            &[(fields::N, 4.0), (fields::SUM_X2, 120.0), (fields::TOTAL, 20.0)],
        ));

        assert_eq!(
            store.runnable(),
            vec![StatisticKind::Mean, StatisticKind::Variance]
        );
        assert!(store.latest_covering(StatisticKind::PearsonCorrelation.schema()).is_none());
    }

    #[test]
    fn test_latest_covering_prefers_most_recent_run() {
        let mut store = AggregateStore::new();
        let first = entry(StatisticKind::Mean, &[(fields::N, 2.0), (fields::TOTAL, 4.0)]);
        let second = entry(StatisticKind::Mean, &[(fields::N, 3.0), (fields::TOTAL, 9.0)]);
        let second_id = second.run_id;
        store.record(first);
        store.record(second);

        let latest = store.latest_covering(StatisticKind::Mean.schema()).unwrap();
        assert_eq!(latest.run_id, second_id);
        assert_eq!(store.merged_view().scalar(fields::N), Some(3.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_covered_runs_are_superseded() {
        let mut store = AggregateStore::new();
        for n in 1..=50 {
            store.record(entry(
                StatisticKind::Mean,
                &[(fields::N, f64::from(n)), (fields::TOTAL, 1.0)],
            ));
        }
        assert_eq!(store.len(), 1);

        let variance = entry(
            StatisticKind::Variance,
            &[(fields::N, 4.0), (fields::SUM_X2, 120.0), (fields::TOTAL, 20.0)],
        );
        let variance_id = variance.run_id;
        store.record(variance);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.latest_covering(StatisticKind::Mean.schema()).unwrap().run_id,
            variance_id
        );

        // A narrower run does not displace a wider one
        store.record(entry(StatisticKind::Mean, &[(fields::N, 2.0), (fields::TOTAL, 4.0)]));
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.latest_covering(StatisticKind::Variance.schema()).unwrap().run_id,
            variance_id
        );
    }

    #[test]
    fn test_fields_from_different_runs_are_not_combined() {
        let mut store = AggregateStore::new();
        store.record(entry(StatisticKind::Mean, &[(fields::N, 2.0), (fields::TOTAL, 4.0)]));
        store.record(entry(StatisticKind::Variance, &[(fields::SUM_X2, 10.0)]));

        assert!(!store.runnable().contains(&StatisticKind::Variance));
        assert!(store.merged_view().covers(StatisticKind::Variance.schema()));
    }
}
