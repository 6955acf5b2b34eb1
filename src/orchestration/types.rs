//! # Orchestration Types
//!
//! Requests and results of the federated analysis facade.

use crate::combiner::{AnalysisResult, StatisticKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies one run and the aggregate scope it recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the answer of a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultSource {
    /// A new job was submitted to the sites
    Submitted,
    /// Results of an already submitted job were collected again
    Collected,
    /// Finalized from aggregates a previous run stored
    Stored { from_run: RunId },
}

/// Parameters of a single run.
///
/// Leaving both `query` and `sites` unset asks the facade to answer from
/// aggregates it already holds instead of submitting a job.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub statistic: StatisticKind,
    pub query: Option<String>,
    /// Overrides the configured site list
    pub sites: Option<Vec<String>>,
    /// Defaults to `"analysis {statistic}"`
    pub task_name: Option<String>,
    /// Overrides the configured result bucket
    pub bucket: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl RunRequest {
    pub fn new(statistic: StatisticKind) -> Self {
        Self {
            statistic,
            query: None,
            sites: None,
            task_name: None,
            bucket: None,
            cancel: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = Some(sites.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// True when the run should be answered from stored aggregates
    pub fn answers_from_store(&self) -> bool {
        self.query.is_none() && self.sites.is_none()
    }

    pub fn task_name(&self) -> String {
        self.task_name
            .clone()
            .unwrap_or_else(|| format!("analysis {}", self.statistic))
    }
}

/// The outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub run_id: RunId,
    pub statistic: StatisticKind,
    pub result: AnalysisResult,
    pub source: ResultSource,
    pub job_id: Option<String>,
    pub query: Option<String>,
    pub sites_used: Vec<String>,
    /// Number of site results that contributed
    pub result_count: usize,
    pub completed_at: DateTime<Utc>,
}
