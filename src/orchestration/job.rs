//! Submitted jobs and the result-path convention.

use crate::constants::system::RESULT_OBJECT_STEM;
use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};

/// A job accepted by the execution service, with the objects its sites will
/// write. Site `i` of job `id` writes to `"{id + i + 1}/output.{format}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub site_count: usize,
    pub expected_result_paths: Vec<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, site_count: usize, output_format: &str) -> Result<Self> {
        let id = id.into();
        let expected_result_paths = result_paths(&id, site_count, output_format)?;
        Ok(Self {
            id,
            site_count,
            expected_result_paths,
        })
    }

    pub fn expected_count(&self) -> usize {
        self.expected_result_paths.len()
    }
}

/// Object paths written by the sites of `job_id`.
///
/// The execution service numbers the per-site jobs after the parent, so the
/// id must be an unsigned integer.
pub fn result_paths(job_id: &str, site_count: usize, output_format: &str) -> Result<Vec<String>> {
    let base: u64 = job_id
        .trim()
        .parse()
        .map_err(|e| AnalysisError::InvalidJobId {
            job_id: job_id.to_string(),
            reason: format!("result paths need a numeric id: {e}"),
        })?;

    (1..=site_count as u64)
        .map(|offset| {
            base.checked_add(offset)
                .map(|site_job| format!("{site_job}/{RESULT_OBJECT_STEM}.{output_format}"))
                .ok_or_else(|| AnalysisError::InvalidJobId {
                    job_id: job_id.to_string(),
                    reason: "site job id overflows".to_string(),
                })
        })
        .collect()
}
