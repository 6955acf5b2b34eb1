//! Contingency table combiner.
//!
//! Counts are keyed by the tuple of categorical labels, in the column order of
//! the first contribution, and summed across sites and across calls. Any
//! number of categorical columns is supported; two columns finalize to a
//! dense table, everything else to a sparse one.

use super::{
    ensure_covers, shape_mismatch, AggregateState, AggregateValue, AnalysisResult, Combiner,
    StatisticKind,
};
use crate::constants::fields;
use crate::error::{AnalysisError, Result};
use crate::normalizer::{NormalizedInput, TableRecord};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use statrs::distribution::{ChiSquared as ChiSquaredDistribution, ContinuousCDF};
use std::collections::{BTreeMap, BTreeSet};

const KIND: StatisticKind = StatisticKind::ContingencyTable;

/// Sparse N-dimensional counts, the accumulated value of `contingency_table`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContingencyCounts {
    columns: Vec<String>,
    cells: BTreeMap<Vec<String>, f64>,
}

impl ContingencyCounts {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn cells(&self) -> &BTreeMap<Vec<String>, f64> {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.cells.values().sum()
    }

    /// Add rows given in `columns` order, adopting that order if none is set yet
    pub fn add_records(&mut self, columns: &[String], records: &[TableRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if self.columns.is_empty() {
            self.columns = columns.to_vec();
        }

        let mapping = self.column_mapping(columns)?;
        for record in records {
            if record.labels.len() != columns.len() {
                return Err(AnalysisError::statistical(
                    KIND,
                    fields::CONTINGENCY_TABLE,
                    format!(
                        "row has {} labels but the table has {} columns",
                        record.labels.len(),
                        columns.len()
                    ),
                ));
            }
            let key: Vec<String> = mapping
                .iter()
                .map(|&index| record.labels[index].clone())
                .collect();
            *self.cells.entry(key).or_insert(0.0) += record.count;
        }
        Ok(())
    }

    /// Position in `columns` of each of this table's columns
    fn column_mapping(&self, columns: &[String]) -> Result<Vec<usize>> {
        let mapping: Option<Vec<usize>> = self
            .columns
            .iter()
            .map(|column| columns.iter().position(|c| c == column))
            .collect();
        match mapping {
            Some(mapping) if columns.len() == self.columns.len() => Ok(mapping),
            _ => Err(AnalysisError::statistical(
                KIND,
                fields::CONTINGENCY_TABLE,
                format!(
                    "columns {:?} do not match the accumulated columns {:?}",
                    columns, self.columns
                ),
            )),
        }
    }

    /// Sorted unique labels of dimension `dimension`
    fn labels(&self, dimension: usize) -> Vec<String> {
        self.cells
            .keys()
            .filter_map(|key| key.get(dimension).cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Two-way table with lexicographically sorted labels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyTable {
    row_variable: String,
    column_variable: String,
    row_labels: Vec<String>,
    column_labels: Vec<String>,
    counts: Vec<Vec<f64>>,
}

impl ContingencyTable {
    fn from_counts(counts: &ContingencyCounts) -> Self {
        let row_labels = counts.labels(0);
        let column_labels = counts.labels(1);
        let mut dense = vec![vec![0.0; column_labels.len()]; row_labels.len()];

        for (key, count) in &counts.cells {
            // Labels come from these same keys, so both lookups succeed
            let row = row_labels.binary_search(&key[0]);
            let column = column_labels.binary_search(&key[1]);
            if let (Ok(row), Ok(column)) = (row, column) {
                dense[row][column] += count;
            }
        }

        Self {
            row_variable: counts.columns[0].clone(),
            column_variable: counts.columns[1].clone(),
            row_labels,
            column_labels,
            counts: dense,
        }
    }

    pub fn row_variable(&self) -> &str {
        &self.row_variable
    }

    pub fn column_variable(&self) -> &str {
        &self.column_variable
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn column_labels(&self) -> &[String] {
        &self.column_labels
    }

    /// Dense counts, `counts()[row][column]` in label order
    pub fn counts(&self) -> &[Vec<f64>] {
        &self.counts
    }

    /// Count for a pair of labels; `None` if either label was never observed
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let row = self.row_labels.iter().position(|label| label == row)?;
        let column = self.column_labels.iter().position(|label| label == column)?;
        Some(self.counts[row][column])
    }

    pub fn row_totals(&self) -> Vec<f64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn column_totals(&self) -> Vec<f64> {
        (0..self.column_labels.len())
            .map(|column| self.counts.iter().map(|row| row[column]).sum())
            .collect()
    }

    pub fn total(&self) -> f64 {
        self.row_totals().iter().sum()
    }

    /// Pearson's chi-squared test of independence, without continuity correction
    pub fn chi_squared(&self) -> Result<ChiSquared> {
        if self.row_labels.len() < 2 || self.column_labels.len() < 2 {
            return Err(AnalysisError::statistical(
                KIND,
                fields::CONTINGENCY_TABLE,
                "chi-squared needs at least two rows and two columns",
            ));
        }

        let row_totals = self.row_totals();
        let column_totals = self.column_totals();
        let total: f64 = row_totals.iter().sum();
        if total <= 0.0 {
            return Err(AnalysisError::statistical(
                KIND,
                fields::CONTINGENCY_TABLE,
                "chi-squared is undefined for an empty table",
            ));
        }

        let mut statistic = 0.0;
        let mut expected = Vec::with_capacity(row_totals.len());
        for (row, row_total) in row_totals.iter().enumerate() {
            let mut expected_row = Vec::with_capacity(column_totals.len());
            for (column, column_total) in column_totals.iter().enumerate() {
                let expected_count = row_total * column_total / total;
                if expected_count <= 0.0 {
                    return Err(AnalysisError::statistical(
                        KIND,
                        fields::CONTINGENCY_TABLE,
                        format!(
                            "expected frequency is zero for ({}, {})",
                            self.row_labels[row], self.column_labels[column]
                        ),
                    ));
                }
                let deviation = self.counts[row][column] - expected_count;
                statistic += deviation * deviation / expected_count;
                expected_row.push(expected_count);
            }
            expected.push(expected_row);
        }

        let degrees_of_freedom = (self.row_labels.len() - 1) * (self.column_labels.len() - 1);
        Ok(ChiSquared {
            statistic,
            degrees_of_freedom,
            p_value: chi_squared_p_value(statistic, degrees_of_freedom)?,
            expected,
        })
    }
}

/// Upper-tail probability of `statistic` under chi-squared with `degrees_of_freedom`
pub fn chi_squared_p_value(statistic: f64, degrees_of_freedom: usize) -> Result<f64> {
    if degrees_of_freedom == 0 {
        return Err(AnalysisError::statistical(
            KIND,
            fields::CONTINGENCY_TABLE,
            "chi-squared needs at least one degree of freedom",
        ));
    }
    let distribution = ChiSquaredDistribution::new(degrees_of_freedom as f64).map_err(|e| {
        AnalysisError::statistical(KIND, fields::CONTINGENCY_TABLE, e.to_string())
    })?;
    Ok(distribution.sf(statistic.max(0.0)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChiSquared {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    /// Expected frequencies under independence, same layout as the table
    pub expected: Vec<Vec<f64>>,
}

/// Counts for one, three or more categorical columns
#[derive(Debug, Clone, PartialEq)]
pub struct SparseContingencyTable {
    columns: Vec<String>,
    cells: BTreeMap<Vec<String>, f64>,
}

impl SparseContingencyTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, labels: &[&str]) -> Option<f64> {
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        self.cells.get(&key).copied()
    }

    /// Sorted unique labels of the named column
    pub fn labels(&self, column: &str) -> Vec<String> {
        let Some(dimension) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        self.cells
            .keys()
            .map(|key| key[dimension].clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Cells in lexicographic label order
    pub fn iter(&self) -> impl Iterator<Item = (&[String], f64)> {
        self.cells.iter().map(|(key, count)| (key.as_slice(), *count))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.cells.values().sum()
    }
}

impl Serialize for SparseContingencyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Cell<'a> {
            labels: &'a [String],
            count: f64,
        }

        let cells: Vec<Cell<'_>> = self
            .cells
            .iter()
            .map(|(labels, count)| Cell {
                labels,
                count: *count,
            })
            .collect();
        let mut state = serializer.serialize_struct("SparseContingencyTable", 2)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("cells", &cells)?;
        state.end()
    }
}

#[derive(Debug, Clone)]
pub struct ContingencyCombiner {
    state: AggregateState,
}

impl ContingencyCombiner {
    pub(crate) fn new() -> Self {
        let mut combiner = Self {
            state: AggregateState::new(),
        };
        combiner.reset();
        combiner
    }

    fn counts(&self) -> Result<&ContingencyCounts> {
        self.state
            .get(fields::CONTINGENCY_TABLE)
            .and_then(AggregateValue::as_counts)
            .ok_or_else(|| {
                AnalysisError::statistical(
                    KIND,
                    fields::CONTINGENCY_TABLE,
                    "no contingency counts accumulated",
                )
            })
    }
}

impl Combiner for ContingencyCombiner {
    fn kind(&self) -> StatisticKind {
        KIND
    }

    fn reduce(&mut self, input: &NormalizedInput) -> Result<&AggregateState> {
        let NormalizedInput::Rows {
            columns, records, ..
        } = input
        else {
            return Err(shape_mismatch(KIND, input));
        };

        let mut counts = self.counts().cloned().unwrap_or_default();
        counts.add_records(columns, records)?;
        self.state
            .insert(fields::CONTINGENCY_TABLE, AggregateValue::Counts(counts));
        Ok(&self.state)
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        let counts = self.counts()?;
        if counts.is_empty() {
            return Err(AnalysisError::statistical(
                KIND,
                fields::CONTINGENCY_TABLE,
                "no table rows to combine",
            ));
        }

        if counts.columns.len() == 2 {
            Ok(AnalysisResult::Table(ContingencyTable::from_counts(counts)))
        } else {
            Ok(AnalysisResult::SparseTable(SparseContingencyTable {
                columns: counts.columns.clone(),
                cells: counts.cells.clone(),
            }))
        }
    }

    fn aggregate(&self) -> &AggregateState {
        &self.state
    }

    fn restore(&mut self, state: &AggregateState) -> Result<()> {
        ensure_covers(KIND, state)?;
        let projected = state.project(KIND.schema());
        if projected
            .get(fields::CONTINGENCY_TABLE)
            .and_then(AggregateValue::as_counts)
            .is_none()
        {
            return Err(AnalysisError::statistical(
                KIND,
                fields::CONTINGENCY_TABLE,
                "stored value is not a contingency table",
            ));
        }
        self.state = projected;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = AggregateState::new();
        self.state.insert(
            fields::CONTINGENCY_TABLE,
            AggregateValue::Counts(ContingencyCounts::default()),
        );
    }
}
