//! Moment-based combiners: mean, variance and Pearson correlation.
//!
//! All three reduce by summing every schema field across sites, so the same
//! combiner type serves the whole family and only finalization differs.

use super::{
    ensure_covers, shape_mismatch, AggregateState, AggregateValue, AnalysisResult, Combiner,
    StatisticKind,
};
use crate::constants::fields;
use crate::error::{AnalysisError, Result};
use crate::normalizer::NormalizedInput;

#[derive(Debug, Clone)]
pub struct MomentCombiner {
    kind: StatisticKind,
    state: AggregateState,
}

impl MomentCombiner {
    pub(crate) fn new(kind: StatisticKind) -> Self {
        let mut combiner = Self {
            kind,
            state: AggregateState::new(),
        };
        combiner.reset();
        combiner
    }

    fn field(&self, field: &str) -> Result<f64> {
        self.state.scalar(field).ok_or_else(|| {
            AnalysisError::statistical(self.kind, field, "field is missing from the aggregate")
        })
    }

    fn mean(&self) -> Result<f64> {
        let n = self.field(fields::N)?;
        if n <= 0.0 {
            return Err(AnalysisError::statistical(
                self.kind,
                fields::N,
                "cannot compute a mean when n = 0",
            ));
        }
        Ok(self.field(fields::TOTAL)? / n)
    }

    /// Sample variance, Bessel-corrected
    fn variance(&self) -> Result<f64> {
        let n = self.field(fields::N)?;
        if n <= 1.0 {
            return Err(AnalysisError::statistical(
                self.kind,
                fields::N,
                format!("sample variance requires n > 1 (n = {n})"),
            ));
        }
        let total = self.field(fields::TOTAL)?;
        let sum_x2 = self.field(fields::SUM_X2)?;
        Ok((sum_x2 - total * total / n) / (n - 1.0))
    }

    /// Pearson's r with the deviations taken as root sums of squares about the
    /// mean (no `n` divisor) and the covariance divided by `n - 1`.
    ///
    /// This mixed convention is not the textbook estimator: the result is
    /// scaled by `1 / (n - 1)` relative to the usual sample correlation.
    fn pearson(&self) -> Result<f64> {
        let n = self.field(fields::N)?;
        if n <= 1.0 {
            return Err(AnalysisError::statistical(
                self.kind,
                fields::N,
                format!("correlation requires n > 1 (n = {n})"),
            ));
        }
        let sum_x = self.field(fields::SUM_X)?;
        let sum_y = self.field(fields::SUM_Y)?;
        let sum_xy = self.field(fields::SUM_XY)?;

        let std_x = self.deviation(fields::SUM_X2, sum_x, n)?;
        let std_y = self.deviation(fields::SUM_Y2, sum_y, n)?;

        let covariance = (sum_xy - sum_x * sum_y / n) / (n - 1.0);
        Ok(covariance / (std_x * std_y))
    }

    fn deviation(&self, squares_field: &str, sum: f64, n: f64) -> Result<f64> {
        let spread = self.field(squares_field)? - sum * sum / n;
        if spread.is_nan() || spread <= 0.0 {
            return Err(AnalysisError::statistical(
                self.kind,
                squares_field,
                "zero standard deviation; correlation is undefined",
            ));
        }
        Ok(spread.sqrt())
    }
}

impl Combiner for MomentCombiner {
    fn kind(&self) -> StatisticKind {
        self.kind
    }

    fn reduce(&mut self, input: &NormalizedInput) -> Result<&AggregateState> {
        let NormalizedInput::Scalars(values) = input else {
            return Err(shape_mismatch(self.kind, input));
        };

        for field in self.kind.schema() {
            let contribution: f64 = values
                .get(*field)
                .map(|site_values| site_values.iter().sum())
                .unwrap_or(0.0);
            let current = self.state.scalar(field).unwrap_or(0.0);
            self.state
                .insert(*field, AggregateValue::Scalar(current + contribution));
        }
        Ok(&self.state)
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        let value = match self.kind {
            StatisticKind::Mean => self.mean()?,
            StatisticKind::Variance => self.variance()?,
            StatisticKind::PearsonCorrelation => self.pearson()?,
            other => {
                return Err(AnalysisError::statistical(
                    other,
                    "",
                    "not a moment statistic",
                ))
            }
        };

        if !value.is_finite() {
            return Err(AnalysisError::statistical(
                self.kind,
                fields::N,
                format!("result is not finite ({value})"),
            ));
        }
        Ok(AnalysisResult::Scalar(value))
    }

    fn aggregate(&self) -> &AggregateState {
        &self.state
    }

    fn restore(&mut self, state: &AggregateState) -> Result<()> {
        ensure_covers(self.kind, state)?;
        let projected = state.project(self.kind.schema());
        if let Some((field, _)) = projected
            .iter()
            .find(|(_, value)| value.as_scalar().is_none())
        {
            return Err(AnalysisError::statistical(
                self.kind,
                field,
                "stored value is not a scalar",
            ));
        }
        self.state = projected;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = self
            .kind
            .schema()
            .iter()
            .map(|field| (field.to_string(), AggregateValue::Scalar(0.0)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn reduce(kind: StatisticKind, fields: Vec<(&str, Vec<f64>)>) -> MomentCombiner {
        let mut combiner = MomentCombiner::new(kind);
        combiner
            .reduce(&NormalizedInput::scalars(fields))
            .unwrap();
        combiner
    }

    #[test]
    fn test_mean_of_two_sites() {
        let combiner = reduce(
            StatisticKind::Mean,
            vec![("n", vec![2.0, 2.0]), ("total", vec![6.0, 14.0])],
        );
        assert_eq!(combiner.finalize().unwrap().as_scalar(), Some(5.0));
    }

    #[test]
    fn test_mean_of_nothing_is_an_error() {
        let combiner = MomentCombiner::new(StatisticKind::Mean);
        let err = combiner.finalize().unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Statistical { statistic: StatisticKind::Mean, ref field, .. } if field == "n"
        ));
    }

    #[test]
    fn test_reduce_merges_across_calls() {
        let mut combiner = reduce(
            StatisticKind::Mean,
            vec![("n", vec![2.0]), ("total", vec![6.0])],
        );
        combiner
            .reduce(&NormalizedInput::scalars([
                ("n", vec![2.0]),
                ("total", vec![14.0]),
            ]))
            .unwrap();
        assert_eq!(combiner.aggregate().scalar("n"), Some(4.0));
        assert_eq!(combiner.finalize().unwrap().as_scalar(), Some(5.0));

        combiner.reset();
        assert_eq!(combiner.aggregate().scalar("n"), Some(0.0));
    }

    #[test]
    fn test_variance_matches_direct_computation() {
        // [2, 4] and [6, 8]
        let combiner = reduce(
            StatisticKind::Variance,
            vec![
                ("n", vec![2.0, 2.0]),
                ("total", vec![6.0, 14.0]),
                ("sum_x2", vec![20.0, 100.0]),
            ],
        );
        let variance = combiner.finalize().unwrap().as_scalar().unwrap();
        assert!(approx_eq(variance, 20.0 / 3.0));
    }

    #[test]
    fn test_variance_single_observation_is_an_error() {
        let combiner = reduce(
            StatisticKind::Variance,
            vec![("n", vec![1.0]), ("total", vec![5.0]), ("sum_x2", vec![25.0])],
        );
        assert!(matches!(
            combiner.finalize(),
            Err(AnalysisError::Statistical { .. })
        ));
    }

    #[test]
    fn test_pearson_mixed_convention() {
        // x = [1, 2, 3], y = [2, 4, 6] across two sites
        let combiner = reduce(
            StatisticKind::PearsonCorrelation,
            vec![
                ("n", vec![2.0, 1.0]),
                ("sum_x", vec![3.0, 3.0]),
                ("sum_y", vec![6.0, 6.0]),
                ("sum_xy", vec![10.0, 18.0]),
                ("sum_x2", vec![5.0, 9.0]),
                ("sum_y2", vec![20.0, 36.0]),
            ],
        );
        let r = combiner.finalize().unwrap().as_scalar().unwrap();
        // cov = 4 / 2 = 2, std_x = sqrt(2), std_y = sqrt(8)
        assert!(approx_eq(r, 0.5));
    }

    #[test]
    fn test_pearson_zero_deviation_is_an_error() {
        let combiner = reduce(
            StatisticKind::PearsonCorrelation,
            vec![
                ("n", vec![3.0]),
                ("sum_x", vec![6.0]),
                ("sum_y", vec![6.0]),
                ("sum_xy", vec![12.0]),
                ("sum_x2", vec![12.0]),
                ("sum_y2", vec![14.0]),
            ],
        );
        assert!(matches!(
            combiner.finalize(),
            Err(AnalysisError::Statistical { ref field, .. }) if field == "sum_x2"
        ));
    }

    #[test]
    fn test_restore_from_superset_state() {
        let variance = reduce(
            StatisticKind::Variance,
            vec![
                ("n", vec![4.0]),
                ("total", vec![20.0]),
                ("sum_x2", vec![120.0]),
            ],
        );
        let mut mean = MomentCombiner::new(StatisticKind::Mean);
        mean.restore(variance.aggregate()).unwrap();
        assert_eq!(mean.aggregate().len(), 2);
        assert_eq!(mean.finalize().unwrap().as_scalar(), Some(5.0));

        let mut pearson = MomentCombiner::new(StatisticKind::PearsonCorrelation);
        assert!(matches!(
            pearson.restore(variance.aggregate()),
            Err(AnalysisError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let mut combiner = MomentCombiner::new(StatisticKind::Mean);
        assert!(combiner
            .reduce(&NormalizedInput::Sketches(Vec::new()))
            .is_err());
    }
}
