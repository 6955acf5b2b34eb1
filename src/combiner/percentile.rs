//! Percentile sketch combiner backed by t-digest.
//!
//! Sketch merging is associative and commutative, and an empty sketch is the
//! identity, so sites without observations can be merged freely.

use super::{
    ensure_covers, shape_mismatch, AggregateState, AggregateValue, AnalysisResult, Combiner,
    StatisticKind,
};
use crate::constants::{fields, system::SKETCH_MAX_CENTROIDS};
use crate::error::{AnalysisError, Result};
use crate::normalizer::NormalizedInput;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tdigest::TDigest;

const KIND: StatisticKind = StatisticKind::PercentileSketch;

/// Merge sketches in the given order
pub fn merge_sketches(sketches: impl IntoIterator<Item = TDigest>) -> TDigest {
    let sketches: Vec<TDigest> = sketches.into_iter().filter(|d| !d.is_empty()).collect();
    match sketches.len() {
        0 => TDigest::new_with_size(SKETCH_MAX_CENTROIDS),
        1 => sketches.into_iter().next().unwrap_or_default(),
        _ => TDigest::merge_digests(sketches),
    }
}

/// Queryable result of a merged sketch
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileSketch {
    digest: TDigest,
}

impl PercentileSketch {
    /// Estimated value at quantile `q` in `[0, 1]`
    pub fn quantile(&self, q: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(AnalysisError::statistical(
                KIND,
                fields::PERCENTILE_SKETCH,
                format!("quantile {q} is outside [0, 1]"),
            ));
        }
        Ok(self.digest.estimate_quantile(q))
    }

    /// Estimated value at percentile `p` in `[0, 100]`
    pub fn percentile(&self, p: f64) -> Result<f64> {
        if !(0.0..=100.0).contains(&p) {
            return Err(AnalysisError::statistical(
                KIND,
                fields::PERCENTILE_SKETCH,
                format!("percentile {p} is outside [0, 100]"),
            ));
        }
        self.quantile(p / 100.0)
    }

    pub fn median(&self) -> f64 {
        self.digest.estimate_quantile(0.5)
    }

    /// Number of observations summarized
    pub fn count(&self) -> f64 {
        self.digest.count()
    }

    pub fn min(&self) -> f64 {
        self.digest.min()
    }

    pub fn max(&self) -> f64 {
        self.digest.max()
    }

    pub fn mean(&self) -> f64 {
        self.digest.mean()
    }

    pub fn digest(&self) -> &TDigest {
        &self.digest
    }
}

impl Serialize for PercentileSketch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PercentileSketch", 5)?;
        state.serialize_field("count", &self.count())?;
        state.serialize_field("min", &self.min())?;
        state.serialize_field("max", &self.max())?;
        state.serialize_field("mean", &self.mean())?;
        state.serialize_field("median", &self.median())?;
        state.end()
    }
}

#[derive(Debug, Clone)]
pub struct PercentileCombiner {
    state: AggregateState,
}

impl PercentileCombiner {
    pub(crate) fn new() -> Self {
        let mut combiner = Self {
            state: AggregateState::new(),
        };
        combiner.reset();
        combiner
    }

    fn digest(&self) -> Option<&TDigest> {
        self.state
            .get(fields::PERCENTILE_SKETCH)
            .and_then(AggregateValue::as_sketch)
    }
}

impl Combiner for PercentileCombiner {
    fn kind(&self) -> StatisticKind {
        KIND
    }

    fn reduce(&mut self, input: &NormalizedInput) -> Result<&AggregateState> {
        let NormalizedInput::Sketches(sketches) = input else {
            return Err(shape_mismatch(KIND, input));
        };

        let current = self.digest().cloned();
        let merged = merge_sketches(current.into_iter().chain(sketches.iter().cloned()));
        self.state
            .insert(fields::PERCENTILE_SKETCH, AggregateValue::Sketch(merged));
        Ok(&self.state)
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        match self.digest() {
            Some(digest) if !digest.is_empty() => Ok(AnalysisResult::Sketch(PercentileSketch {
                digest: digest.clone(),
            })),
            _ => Err(AnalysisError::statistical(
                KIND,
                fields::PERCENTILE_SKETCH,
                "sketch holds no observations",
            )),
        }
    }

    fn aggregate(&self) -> &AggregateState {
        &self.state
    }

    fn restore(&mut self, state: &AggregateState) -> Result<()> {
        ensure_covers(KIND, state)?;
        let projected = state.project(KIND.schema());
        if projected
            .get(fields::PERCENTILE_SKETCH)
            .and_then(AggregateValue::as_sketch)
            .is_none()
        {
            return Err(AnalysisError::statistical(
                KIND,
                fields::PERCENTILE_SKETCH,
                "stored value is not a sketch",
            ));
        }
        self.state = projected;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = AggregateState::new();
        self.state.insert(
            fields::PERCENTILE_SKETCH,
            AggregateValue::Sketch(TDigest::new_with_size(SKETCH_MAX_CENTROIDS)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch(values: impl IntoIterator<Item = f64>) -> TDigest {
        TDigest::new_with_size(SKETCH_MAX_CENTROIDS).merge_unsorted(values.into_iter().collect())
    }

    #[test]
    fn test_merged_sites_answer_percentiles() {
        let mut combiner = PercentileCombiner::new();
        combiner
            .reduce(&NormalizedInput::Sketches(vec![
                sketch((1..=500).map(f64::from)),
                sketch((501..=1000).map(f64::from)),
                TDigest::new_with_size(SKETCH_MAX_CENTROIDS),
            ]))
            .unwrap();

        let result = combiner.finalize().unwrap();
        let sketch = result.as_sketch().unwrap();
        assert_eq!(sketch.count(), 1000.0);
        assert_eq!(sketch.min(), 1.0);
        assert_eq!(sketch.max(), 1000.0);
        assert!((sketch.median() - 500.0).abs() < 10.0);
        assert!((sketch.percentile(90.0).unwrap() - 900.0).abs() < 10.0);
        assert!(sketch.quantile(1.5).is_err());
    }

    #[test]
    fn test_reduce_accumulates_across_calls() {
        let mut combiner = PercentileCombiner::new();
        combiner
            .reduce(&NormalizedInput::Sketches(vec![sketch([1.0, 2.0])]))
            .unwrap();
        combiner
            .reduce(&NormalizedInput::Sketches(vec![sketch([3.0, 4.0])]))
            .unwrap();
        let result = combiner.finalize().unwrap();
        assert_eq!(result.as_sketch().unwrap().count(), 4.0);
    }

    #[test]
    fn test_empty_sketch_is_an_error() {
        let mut combiner = PercentileCombiner::new();
        combiner
            .reduce(&NormalizedInput::Sketches(vec![TDigest::new_with_size(10)]))
            .unwrap();
        assert!(matches!(
            combiner.finalize(),
            Err(AnalysisError::Statistical { .. })
        ));
    }

    #[test]
    fn test_merge_skips_empty_sketches() {
        let merged = merge_sketches(vec![
            TDigest::new_with_size(SKETCH_MAX_CENTROIDS),
            sketch([5.0]),
        ]);
        assert_eq!(merged.count(), 1.0);
        assert_eq!(merged.min(), 5.0);
    }
}
