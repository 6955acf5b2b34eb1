//! Per-site payloads in the shapes the site executor writes.

#![allow(dead_code)]

use serde_json::{json, Value};

/// `{n, total, sum_x2}` over one site's values
pub fn moments_record(values: &[f64]) -> Value {
    json!({
        "n": values.len(),
        "total": values.iter().sum::<f64>(),
        "sum_x2": values.iter().map(|v| v * v).sum::<f64>(),
    })
}

/// The same fields as a one-line delimited table
pub fn moments_csv(values: &[f64]) -> String {
    format!(
        "n,total,sum_x2\n{},{},{}\n",
        values.len(),
        values.iter().sum::<f64>(),
        values.iter().map(|v| v * v).sum::<f64>()
    )
}

pub fn pearson_record(pairs: &[(f64, f64)]) -> Value {
    json!({
        "n": pairs.len(),
        "sum_x": pairs.iter().map(|(x, _)| x).sum::<f64>(),
        "sum_y": pairs.iter().map(|(_, y)| y).sum::<f64>(),
        "sum_xy": pairs.iter().map(|(x, y)| x * y).sum::<f64>(),
        "sum_x2": pairs.iter().map(|(x, _)| x * x).sum::<f64>(),
        "sum_y2": pairs.iter().map(|(_, y)| y * y).sum::<f64>(),
    })
}

/// A sketch with one unit centroid per value
pub fn sketch_record(values: &[f64]) -> Value {
    let centroids: Vec<Value> = values.iter().map(|v| json!({"m": v, "c": 1})).collect();
    let mut record = json!({ "n": values.len(), "centroids": centroids });
    if let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) {
        record["min"] = json!(min);
        record["max"] = json!(max);
    }
    record
}

/// Categorical columns followed by the count column `n`
pub fn table_csv(columns: &[&str], rows: &[(Vec<&str>, u64)]) -> String {
    let mut text = format!("{},n\n", columns.join(","));
    for (labels, count) in rows {
        text.push_str(&format!("{},{}\n", labels.join(","), count));
    }
    text
}

/// Sample variance with the n - 1 denominator
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}
