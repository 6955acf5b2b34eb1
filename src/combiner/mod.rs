//! # Statistical Combiner Framework
//!
//! One combiner per [`StatisticKind`]. Every combiner declares the named
//! sufficient-statistic fields it needs (its schema), reduces per-site partial
//! values into a retained [`AggregateState`], and finalizes an
//! [`AnalysisResult`] from that state alone.
//!
//! ## Architecture
//!
//! ```text
//! Combiner Framework
//! ├── MomentCombiner       (mean, variance, Pearson correlation)
//! ├── ContingencyCombiner  (N-dimensional count tables)
//! ├── PercentileCombiner   (t-digest sketches)
//! └── registry             (static lookup by StatisticKind)
//! ```
//!
//! Reduction merges into the retained state, so a combiner can be fed more
//! sites later and still finalize the union. [`Combiner::reset`] starts over.
//!
//! ```rust
//! use fedstat_core::combiner::StatisticKind;
//! use fedstat_core::normalizer::NormalizedInput;
//!
//! let mut combiner = StatisticKind::Mean.combiner();
//! let input = NormalizedInput::scalars([
//!     ("n", vec![2.0, 2.0]),
//!     ("total", vec![6.0, 14.0]),
//! ]);
//! combiner.reduce(&input).unwrap();
//! let mean = combiner.finalize().unwrap();
//! assert_eq!(mean.as_scalar(), Some(5.0));
//! ```

pub mod contingency;
pub mod moments;
pub mod percentile;
pub mod registry;

use crate::constants::fields;
use crate::error::{AnalysisError, Result};
use crate::normalizer::NormalizedInput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tdigest::TDigest;

pub use contingency::{
    ChiSquared, ContingencyCombiner, ContingencyCounts, ContingencyTable, SparseContingencyTable,
};
pub use moments::MomentCombiner;
pub use percentile::{PercentileCombiner, PercentileSketch};
pub use registry::create_combiner;

/// The fixed catalogue of federated statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatisticKind {
    #[serde(rename = "mean")]
    Mean,
    #[serde(rename = "variance")]
    Variance,
    #[serde(rename = "PMCC", alias = "pearson_correlation")]
    PearsonCorrelation,
    #[serde(rename = "contingency_table")]
    ContingencyTable,
    #[serde(rename = "percentile_sketch")]
    PercentileSketch,
}

/// How per-site payloads must be shaped before reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// One record per site, every schema field a number
    Scalars,
    /// Many records per site, categorical columns plus a count
    Table,
    /// One serialized t-digest per site
    Sketch,
}

impl StatisticKind {
    pub const ALL: [StatisticKind; 5] = [
        StatisticKind::Mean,
        StatisticKind::Variance,
        StatisticKind::PearsonCorrelation,
        StatisticKind::ContingencyTable,
        StatisticKind::PercentileSketch,
    ];

    /// Name used in configuration, logs and serialized results
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Variance => "variance",
            Self::PearsonCorrelation => "PMCC",
            Self::ContingencyTable => "contingency_table",
            Self::PercentileSketch => "percentile_sketch",
        }
    }

    /// Ordered sufficient-statistic fields
    pub fn schema(&self) -> &'static [&'static str] {
        match self {
            Self::Mean => &[fields::N, fields::TOTAL],
            Self::Variance => &[fields::N, fields::SUM_X2, fields::TOTAL],
            Self::PearsonCorrelation => &[
                fields::N,
                fields::SUM_X,
                fields::SUM_Y,
                fields::SUM_XY,
                fields::SUM_X2,
                fields::SUM_Y2,
            ],
            Self::ContingencyTable => &[fields::CONTINGENCY_TABLE],
            Self::PercentileSketch => &[fields::PERCENTILE_SKETCH],
        }
    }

    pub fn input_shape(&self) -> InputShape {
        match self {
            Self::Mean | Self::Variance | Self::PearsonCorrelation => InputShape::Scalars,
            Self::ContingencyTable => InputShape::Table,
            Self::PercentileSketch => InputShape::Sketch,
        }
    }

    /// A fresh combiner for this statistic
    pub fn combiner(self) -> Box<dyn Combiner> {
        create_combiner(self)
    }
}

impl fmt::Display for StatisticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatisticKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "variance" => Ok(Self::Variance),
            "pmcc" | "pearson_correlation" => Ok(Self::PearsonCorrelation),
            "contingency_table" => Ok(Self::ContingencyTable),
            "percentile_sketch" => Ok(Self::PercentileSketch),
            _ => Err(AnalysisError::UnknownStatistic(s.to_string())),
        }
    }
}

/// One accumulated sufficient statistic
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    Scalar(f64),
    Counts(ContingencyCounts),
    Sketch(TDigest),
}

impl AggregateValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_counts(&self) -> Option<&ContingencyCounts> {
        match self {
            Self::Counts(counts) => Some(counts),
            _ => None,
        }
    }

    pub fn as_sketch(&self) -> Option<&TDigest> {
        match self {
            Self::Sketch(digest) => Some(digest),
            _ => None,
        }
    }
}

/// Field name to accumulated value, owned by one combiner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateState {
    fields: BTreeMap<String, AggregateValue>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&AggregateValue> {
        self.fields.get(field)
    }

    pub fn scalar(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(AggregateValue::as_scalar)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: AggregateValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Schema fields absent from this state, in schema order
    pub fn missing_fields(&self, schema: &[&str]) -> Vec<String> {
        schema
            .iter()
            .filter(|field| !self.contains(field))
            .map(|field| field.to_string())
            .collect()
    }

    pub fn covers(&self, schema: &[&str]) -> bool {
        schema.iter().all(|field| self.contains(field))
    }

    /// Copy of the fields named by `schema`; absent fields are skipped
    pub fn project(&self, schema: &[&str]) -> AggregateState {
        let fields = schema
            .iter()
            .filter_map(|field| {
                self.fields
                    .get(*field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect();
        AggregateState { fields }
    }

    /// Overwrite this state's fields with `other`'s
    pub fn extend(&mut self, other: &AggregateState) {
        for (field, value) in &other.fields {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AggregateValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, AggregateValue)> for AggregateState {
    fn from_iter<I: IntoIterator<Item = (String, AggregateValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Final answer of a federated statistic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnalysisResult {
    Scalar(f64),
    /// Two categorical columns: dense table with sorted labels
    Table(ContingencyTable),
    /// Any other number of categorical columns
    SparseTable(SparseContingencyTable),
    Sketch(PercentileSketch),
}

impl AnalysisResult {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&ContingencyTable> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_sparse_table(&self) -> Option<&SparseContingencyTable> {
        match self {
            Self::SparseTable(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_sketch(&self) -> Option<&PercentileSketch> {
        match self {
            Self::Sketch(sketch) => Some(sketch),
            _ => None,
        }
    }
}

/// Reduce and finalize one statistic kind
pub trait Combiner: Send + Sync + fmt::Debug {
    fn kind(&self) -> StatisticKind;

    fn schema(&self) -> &'static [&'static str] {
        self.kind().schema()
    }

    /// Merge normalized per-site input into the retained state
    fn reduce(&mut self, input: &NormalizedInput) -> Result<&AggregateState>;

    /// Compute the statistic from the retained state only
    fn finalize(&self) -> Result<AnalysisResult>;

    fn aggregate(&self) -> &AggregateState;

    /// Replace the retained state with previously stored fields
    fn restore(&mut self, state: &AggregateState) -> Result<()>;

    fn reset(&mut self);
}

/// Shared check used by `restore`: every schema field present with the expected type
pub(crate) fn ensure_covers(kind: StatisticKind, state: &AggregateState) -> Result<()> {
    let missing = state.missing_fields(kind.schema());
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AnalysisError::Incompatible {
            statistic: kind,
            missing_fields: missing,
            runnable: Vec::new(),
        })
    }
}

pub(crate) fn shape_mismatch(kind: StatisticKind, input: &NormalizedInput) -> AnalysisError {
    AnalysisError::statistical(
        kind,
        kind.schema().first().copied().unwrap_or_default(),
        format!(
            "expected {:?} input, received {}",
            kind.input_shape(),
            input.shape_name()
        ),
    )
}
