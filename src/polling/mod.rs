//! # Polling
//!
//! Drives a submitted job to a terminal lifecycle status, then collects the
//! per-site result objects until the expected number is available.
//!
//! Every poll is bounded: it takes a [`PollBudget`] carrying the interval, a
//! timeout and a cancellation token, and reports a [`PollOutcome`] that tells
//! "ready" apart from "timed out" and "cancelled".

pub mod poller;

use crate::config::PollingConfig;
use crate::error::{AnalysisError, Result};
use crate::state_machine::{LifecycleStatus, TaskLifecycle};
use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use poller::Poller;

/// Interval, timeout and cancellation shared by the polls of one run
#[derive(Debug, Clone)]
pub struct PollBudget {
    pub interval: Duration,
    /// Applies to each poll separately
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl PollBudget {
    pub fn new(interval: Duration, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval,
            timeout,
            cancel,
        }
    }

    pub fn from_config(config: &PollingConfig, cancel: CancellationToken) -> Self {
        Self::new(config.interval(), config.timeout(), cancel)
    }
}

/// Tri-state result of a bounded poll
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { elapsed: Duration },
    Cancelled,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PollOutcome<U> {
        match self {
            Self::Ready(value) => PollOutcome::Ready(f(value)),
            Self::TimedOut { elapsed } => PollOutcome::TimedOut { elapsed },
            Self::Cancelled => PollOutcome::Cancelled,
        }
    }

    /// Turn timeouts and cancellations into errors naming `operation`
    pub fn into_result(self, operation: &str) -> Result<T> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::TimedOut { elapsed } => Err(AnalysisError::PollTimeout {
                operation: operation.to_string(),
                elapsed,
            }),
            Self::Cancelled => Err(AnalysisError::Cancelled {
                operation: operation.to_string(),
            }),
        }
    }
}

/// The status a job stopped in, with the history that led there
#[derive(Debug, Clone)]
pub struct TerminalStatus {
    pub status: LifecycleStatus,
    pub description: String,
    pub lifecycle: TaskLifecycle,
}

/// One fetched result object
#[derive(Debug, Clone, PartialEq)]
pub struct ResultObject {
    pub path: String,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub enum PollResults {
    Collected {
        status: LifecycleStatus,
        objects: Vec<ResultObject>,
    },
    /// The job ended in a status that carries no results; nothing was fetched
    NoResults {
        status: LifecycleStatus,
        description: String,
    },
}
