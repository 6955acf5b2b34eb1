//! # Error Types
//!
//! Structured errors for the federated analysis core. Library code returns
//! [`AnalysisError`]; the orchestration facade wraps failures in [`RunError`]
//! so callers always learn which statistic failed, in which phase, and
//! against which bucket.

use crate::combiner::StatisticKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Missing or invalid settings (site list, bucket, URLs). Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A gateway call failed after the collaborator's own retry policy ran out
    #[error("Gateway error during {operation}: {reason}")]
    Gateway { operation: String, reason: String },

    /// The job service returned an identifier the result-path convention cannot use
    #[error("Invalid job id '{job_id}': {reason}")]
    InvalidJobId { job_id: String, reason: String },

    /// The whole input could not be decoded (individual bad lines are skipped instead)
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Statistical error in {statistic} for field '{field}': {reason}")]
    Statistical {
        statistic: StatisticKind,
        field: String,
        reason: String,
    },

    #[error(
        "{statistic} cannot be computed from stored data: missing fields {missing_fields:?}; runnable statistics: {runnable:?}"
    )]
    Incompatible {
        statistic: StatisticKind,
        missing_fields: Vec<String>,
        runnable: Vec<StatisticKind>,
    },

    /// The job reached a terminal status that carries no results
    #[error("Job {job_id} finished with status {status} ({description}) and produced no results")]
    JobTerminated {
        job_id: String,
        status: i32,
        description: String,
    },

    #[error("Timed out after {elapsed:?} while {operation}")]
    PollTimeout { operation: String, elapsed: Duration },

    #[error("Cancelled while {operation}")]
    Cancelled { operation: String },

    #[error("Unknown statistic: {0}")]
    UnknownStatistic(String),
}

impl AnalysisError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn gateway(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Gateway {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn statistical(
        statistic: StatisticKind,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Statistical {
            statistic,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Transport failures may succeed on a later attempt; everything else is final
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway { .. })
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(error: serde_json::Error) -> Self {
        AnalysisError::Encoding(format!("JSON error: {error}"))
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(error: reqwest::Error) -> Self {
        let operation = error
            .url()
            .map(|url| format!("request to {url}"))
            .unwrap_or_else(|| "http request".to_string());
        AnalysisError::Gateway {
            operation,
            reason: error.to_string(),
        }
    }
}

impl From<::config::ConfigError> for AnalysisError {
    fn from(error: ::config::ConfigError) -> Self {
        AnalysisError::Configuration(format!("configuration source error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Stage of a federated run in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Setup,
    Submission,
    Polling,
    Normalization,
    Combination,
    Finalization,
    Compatibility,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Submission => write!(f, "submission"),
            Self::Polling => write!(f, "polling"),
            Self::Normalization => write!(f, "normalization"),
            Self::Combination => write!(f, "combination"),
            Self::Finalization => write!(f, "finalization"),
            Self::Compatibility => write!(f, "compatibility"),
        }
    }
}

/// A failed run with its statistic, phase and bucket attached
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "{statistic} analysis failed during {phase} (bucket: {}): {source}",
    .bucket.as_deref().unwrap_or("n/a")
)]
pub struct RunError {
    pub statistic: StatisticKind,
    pub phase: RunPhase,
    pub bucket: Option<String>,
    #[source]
    pub source: AnalysisError,
}

impl RunError {
    pub fn new(
        statistic: StatisticKind,
        phase: RunPhase,
        bucket: Option<&str>,
        source: AnalysisError,
    ) -> Self {
        Self {
            statistic,
            phase,
            bucket: bucket.map(str::to_string),
            source,
        }
    }
}

pub type RunResult<T> = std::result::Result<T, RunError>;
