//! # Result Normalizer
//!
//! Turns the per-site payloads fetched from the result store into the one
//! canonical input a combiner reduces. Sites may answer with a delimited text
//! table, a single JSON record, or a JSON array of records; the normalizer
//! accepts any mix of the three.
//!
//! Bad lines and records are skipped with a warning so that one misbehaving
//! site does not poison an aggregate that is still well-defined with the
//! others. Only an input in which no payload could be decoded at all is an
//! [`AnalysisError::Encoding`].

use crate::combiner::{InputShape, StatisticKind};
use crate::constants::system::{COUNT_COLUMN, FIELD_DELIMITER, SKETCH_MAX_CENTROIDS};
use crate::error::{AnalysisError, Result};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tdigest::{Centroid, TDigest};
use tracing::{debug, warn};

/// One site's payload, classified by encoding
#[derive(Debug, Clone, PartialEq)]
pub enum PartialResult {
    /// Header line followed by data lines
    Text(String),
    Record(Map<String, Value>),
    Records(Vec<Map<String, Value>>),
}

impl PartialResult {
    /// Classify raw object bytes: a JSON object is a record, a JSON array of
    /// objects is a record sequence, anything else is delimited text
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| AnalysisError::Encoding(format!("payload is not valid UTF-8: {e}")))?;
        Ok(Self::from_text(text))
    }

    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(record)) => return Self::Record(record),
                Ok(Value::Array(items)) if items.iter().all(Value::is_object) => {
                    return Self::Records(
                        items
                            .into_iter()
                            .filter_map(|item| match item {
                                Value::Object(record) => Some(record),
                                _ => None,
                            })
                            .collect(),
                    );
                }
                _ => {}
            }
        }
        Self::Text(text.to_string())
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Record(_) => "record",
            Self::Records(_) => "records",
        }
    }
}

/// Decode fetched objects, skipping any that are not UTF-8
pub fn decode_payloads(objects: &[Bytes]) -> Vec<PartialResult> {
    objects
        .iter()
        .enumerate()
        .filter_map(|(site, bytes)| match PartialResult::from_bytes(bytes) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(site = site, error = %e, "Skipping undecodable payload");
                None
            }
        })
        .collect()
}

/// One row of a contingency table contribution
#[derive(Debug, Clone, PartialEq)]
pub struct TableRecord {
    /// Categorical values, in the input's column order
    pub labels: Vec<String>,
    pub count: f64,
}

/// Canonical combiner input
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedInput {
    /// Field name to one value per contributing site
    Scalars(BTreeMap<String, Vec<f64>>),
    /// Every table record of every site under the statistic's single field
    Rows {
        field: String,
        columns: Vec<String>,
        records: Vec<TableRecord>,
    },
    /// One decoded sketch per contributing site
    Sketches(Vec<TDigest>),
}

impl NormalizedInput {
    pub fn scalars<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<f64>)>,
        K: Into<String>,
    {
        Self::Scalars(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Scalars(_) => "scalars",
            Self::Rows { .. } => "rows",
            Self::Sketches(_) => "sketches",
        }
    }

    /// Number of site records (scalars, sketches) or table rows carried
    pub fn len(&self) -> usize {
        match self {
            Self::Scalars(fields) => fields.values().map(Vec::len).max().unwrap_or(0),
            Self::Rows { records, .. } => records.len(),
            Self::Sketches(sketches) => sketches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Combiner input together with the number of payloads that fed it
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub input: NormalizedInput,
    /// Payloads that contributed a value set, a table row or a sketch
    pub contributing: usize,
}

/// Normalize every payload for `kind`
pub fn normalize(kind: StatisticKind, payloads: &[PartialResult]) -> Result<Normalized> {
    let mut decoded = 0usize;
    let mut contributing = 0usize;
    let input = match kind.input_shape() {
        InputShape::Scalars => {
            let mut fields: BTreeMap<String, Vec<f64>> = kind
                .schema()
                .iter()
                .map(|field| (field.to_string(), Vec::new()))
                .collect();
            for (site, payload) in payloads.iter().enumerate() {
                if let Some(record) = scalar_record(kind, site, payload) {
                    decoded += 1;
                    contributing += 1;
                    for (field, value) in record {
                        if let Some(values) = fields.get_mut(&field) {
                            values.push(value);
                        }
                    }
                }
            }
            NormalizedInput::Scalars(fields)
        }
        InputShape::Table => {
            let field = kind.schema()[0];
            let mut table = TableBuilder::default();
            for (site, payload) in payloads.iter().enumerate() {
                let before = table.records.len();
                if table_rows(field, site, payload, &mut table) {
                    decoded += 1;
                }
                if table.records.len() > before {
                    contributing += 1;
                }
            }
            NormalizedInput::Rows {
                field: field.to_string(),
                columns: table.columns.unwrap_or_default(),
                records: table.records,
            }
        }
        InputShape::Sketch => {
            let field = kind.schema()[0];
            let mut sketches = Vec::new();
            for (site, payload) in payloads.iter().enumerate() {
                let before = sketches.len();
                sketch_records(field, site, payload, &mut sketches);
                if sketches.len() > before {
                    decoded += 1;
                    contributing += 1;
                }
            }
            NormalizedInput::Sketches(sketches)
        }
    };

    if decoded == 0 && !payloads.is_empty() {
        return Err(AnalysisError::Encoding(format!(
            "none of the {} payloads could be decoded as {} input",
            payloads.len(),
            kind
        )));
    }

    debug!(
        statistic = %kind,
        payloads = payloads.len(),
        decoded = decoded,
        contributing = contributing,
        entries = input.len(),
        "Normalized partial results"
    );
    Ok(Normalized {
        input,
        contributing,
    })
}

fn split_line(line: &str) -> Vec<String> {
    line.split(FIELD_DELIMITER)
        .map(|cell| cell.trim().trim_matches('"').to_string())
        .collect()
}

/// Header plus data lines, blank lines dropped
fn text_lines(text: &str) -> Option<(Vec<String>, Vec<(usize, Vec<String>)>)> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(number, line)| (number + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());
    let (_, header) = lines.next()?;
    let rows = lines.map(|(number, line)| (number, split_line(line))).collect();
    Some((split_line(header), rows))
}

fn parse_number(value: &Value) -> Option<f64> {
    let number: Option<f64> = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    number.filter(|number| number.is_finite())
}

fn parse_label(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Schema values of one site, or `None` when the payload contributes nothing
fn scalar_record(kind: StatisticKind, site: usize, payload: &PartialResult) -> Option<Vec<(String, f64)>> {
    let schema = kind.schema();
    match payload {
        PartialResult::Text(text) => {
            let Some((header, rows)) = text_lines(text) else {
                warn!(site = site, statistic = %kind, "Empty text payload");
                return None;
            };
            let positions: Option<Vec<usize>> = schema
                .iter()
                .map(|field| header.iter().position(|column| column == field))
                .collect();
            let Some(positions) = positions else {
                warn!(site = site, statistic = %kind, header = ?header, "Header does not name every schema field");
                return None;
            };

            let mut found = None;
            for (line, cells) in rows {
                if found.is_some() {
                    warn!(site = site, line = line, "Ignoring extra data line for single-row statistic");
                    continue;
                }
                if cells.len() != header.len() {
                    warn!(site = site, line = line, "Skipping line with wrong number of fields");
                    continue;
                }
                let values: Option<Vec<(String, f64)>> = schema
                    .iter()
                    .zip(&positions)
                    .map(|(field, &index)| {
                        cells[index]
                            .parse::<f64>()
                            .ok()
                            .filter(|value| value.is_finite())
                            .map(|value| (field.to_string(), value))
                    })
                    .collect();
                match values {
                    Some(values) => found = Some(values),
                    None => warn!(site = site, line = line, "Skipping line with non-numeric values"),
                }
            }
            found
        }
        PartialResult::Record(record) => scalar_from_map(kind, site, record),
        PartialResult::Records(records) => {
            let mut merged: Option<Vec<(String, f64)>> = None;
            for record in records {
                if let Some(values) = scalar_from_map(kind, site, record) {
                    // Several records from one site are summed into one contribution
                    merged = Some(match merged {
                        None => values,
                        Some(existing) => existing
                            .into_iter()
                            .zip(values)
                            .map(|((field, a), (_, b))| (field, a + b))
                            .collect(),
                    });
                }
            }
            merged
        }
    }
}

fn scalar_from_map(
    kind: StatisticKind,
    site: usize,
    record: &Map<String, Value>,
) -> Option<Vec<(String, f64)>> {
    let values: Option<Vec<(String, f64)>> = kind
        .schema()
        .iter()
        .map(|field| {
            record
                .get(*field)
                .and_then(parse_number)
                .map(|value| (field.to_string(), value))
        })
        .collect();
    if values.is_none() {
        warn!(
            site = site,
            statistic = %kind,
            keys = ?record.keys().collect::<Vec<_>>(),
            "Skipping record missing numeric schema fields"
        );
    }
    values
}

#[derive(Default)]
struct TableBuilder {
    columns: Option<Vec<String>>,
    records: Vec<TableRecord>,
}

impl TableBuilder {
    /// Add one row, re-ordering labels into the established column order
    fn push(&mut self, site: usize, columns: &[String], labels: Vec<String>, count: f64) -> bool {
        if columns.is_empty() {
            warn!(site = site, "Skipping table row without categorical columns");
            return false;
        }
        let established = self.columns.get_or_insert_with(|| columns.to_vec());
        if established.len() != columns.len() {
            warn!(site = site, expected = ?established, received = ?columns, "Skipping table row with different columns");
            return false;
        }
        let reordered: Option<Vec<String>> = established
            .iter()
            .map(|column| {
                columns
                    .iter()
                    .position(|c| c == column)
                    .map(|index| labels[index].clone())
            })
            .collect();
        match reordered {
            Some(labels) => {
                self.records.push(TableRecord { labels, count });
                true
            }
            None => {
                warn!(site = site, expected = ?established, received = ?columns, "Skipping table row with different columns");
                false
            }
        }
    }
}

/// Returns whether the payload was structurally decodable
fn table_rows(field: &str, site: usize, payload: &PartialResult, table: &mut TableBuilder) -> bool {
    match payload {
        PartialResult::Text(text) => {
            let Some((header, rows)) = text_lines(text) else {
                warn!(site = site, "Empty text payload");
                return false;
            };
            if header.len() < 2 {
                warn!(site = site, header = ?header, "Table header needs categorical columns and a count");
                return false;
            }
            let columns = &header[..header.len() - 1];
            for (line, mut cells) in rows {
                if cells.len() != header.len() {
                    warn!(site = site, line = line, "Skipping line with wrong number of fields");
                    continue;
                }
                let count = cells.pop().and_then(|raw| raw.parse::<f64>().ok());
                match count.filter(|count| count.is_finite()) {
                    Some(count) => {
                        table.push(site, columns, cells, count);
                    }
                    None => warn!(site = site, line = line, "Skipping line with non-numeric count"),
                }
            }
            true
        }
        PartialResult::Record(record) => match record.get(field) {
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::Object(row) => table_row_from_map(site, row, table),
                        _ => warn!(site = site, "Skipping non-record table entry"),
                    }
                }
                true
            }
            _ => {
                table_row_from_map(site, record, table);
                true
            }
        },
        PartialResult::Records(records) => {
            for record in records {
                table_row_from_map(site, record, table);
            }
            true
        }
    }
}

fn table_row_from_map(site: usize, record: &Map<String, Value>, table: &mut TableBuilder) {
    let Some(count) = record.get(COUNT_COLUMN).and_then(parse_number) else {
        warn!(site = site, "Skipping table record without a numeric count");
        return;
    };
    let mut columns = Vec::with_capacity(record.len());
    let mut labels = Vec::with_capacity(record.len());
    for (column, value) in record.iter().filter(|(key, _)| key.as_str() != COUNT_COLUMN) {
        let Some(label) = parse_label(value) else {
            warn!(site = site, column = %column, "Skipping table record with a non-categorical value");
            return;
        };
        columns.push(column.clone());
        labels.push(label);
    }
    table.push(site, &columns, labels, count);
}

fn sketch_records(field: &str, site: usize, payload: &PartialResult, sketches: &mut Vec<TDigest>) {
    match payload {
        PartialResult::Text(_) => {
            warn!(site = site, "Skipping text payload for percentile sketch");
        }
        PartialResult::Record(record) => {
            let record = match record.get(field) {
                Some(Value::Object(inner)) => inner,
                _ => record,
            };
            if let Some(digest) = decode_sketch(site, record) {
                sketches.push(digest);
            }
        }
        PartialResult::Records(records) => {
            sketches.extend(records.iter().filter_map(|record| decode_sketch(site, record)));
        }
    }
}

/// Rebuild a t-digest from `{"n", "centroids": [{"m", "c"}], "min"?, "max"?}`
fn decode_sketch(site: usize, record: &Map<String, Value>) -> Option<TDigest> {
    let Some(Value::Array(raw)) = record.get("centroids") else {
        warn!(site = site, "Skipping sketch record without a centroid list");
        return None;
    };

    let mut centroids: Vec<(f64, f64)> = Vec::with_capacity(raw.len());
    for entry in raw {
        let mean = entry.get("m").and_then(parse_number);
        let weight = entry.get("c").and_then(parse_number);
        match (mean, weight) {
            (Some(mean), Some(weight)) if weight > 0.0 => centroids.push((mean, weight)),
            _ => warn!(site = site, "Skipping malformed centroid"),
        }
    }

    if centroids.is_empty() {
        return Some(TDigest::new_with_size(SKETCH_MAX_CENTROIDS));
    }

    centroids.sort_by(|a, b| a.0.total_cmp(&b.0));
    let count: f64 = centroids.iter().map(|(_, weight)| weight).sum();
    let sum: f64 = centroids.iter().map(|(mean, weight)| mean * weight).sum();
    if let Some(declared) = record.get("n").and_then(parse_number) {
        if (declared - count).abs() > 1e-9 * count.max(1.0) {
            warn!(site = site, declared = declared, centroid_total = count, "Sketch count differs from centroid weights");
        }
    }
    let min = record
        .get("min")
        .and_then(parse_number)
        .unwrap_or(centroids[0].0);
    let max = record
        .get("max")
        .and_then(parse_number)
        .unwrap_or(centroids[centroids.len() - 1].0);

    let centroids = centroids
        .into_iter()
        .map(|(mean, weight)| Centroid::new(mean, weight))
        .collect();
    Some(TDigest::new(centroids, sum, count, max, min, SKETCH_MAX_CENTROIDS))
}
