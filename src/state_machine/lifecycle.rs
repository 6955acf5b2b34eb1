//! # Task Lifecycle Tracker
//!
//! Follows a submitted job through the execution service's lifecycle. The
//! tracker never decides a transition itself: every change comes from a status
//! report observed by the poller. It records the transition history so a run
//! can explain where a job spent its time or why it stopped.

use super::states::LifecycleStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One observed change of lifecycle status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub from: Option<LifecycleStatus>,
    pub to: LifecycleStatus,
    pub observed_at: DateTime<Utc>,
}

/// What a single status observation did to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First report, or a report that differs from the current status
    Transitioned,
    /// Same status as the previous report
    Unchanged,
    /// A report arrived after the job had already reached a terminal status
    IgnoredAfterTerminal,
}

#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    job_id: String,
    current: Option<LifecycleStatus>,
    transitions: Vec<LifecycleTransition>,
    observations: u64,
}

impl TaskLifecycle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            current: None,
            transitions: Vec::new(),
            observations: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current status, `None` until the first report
    pub fn current(&self) -> Option<LifecycleStatus> {
        self.current
    }

    pub fn transitions(&self) -> &[LifecycleTransition] {
        &self.transitions
    }

    /// Number of status reports seen, including repeats
    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_some_and(|status| status.is_terminal())
    }

    /// Apply a status report from the job gateway
    pub fn observe(&mut self, status: LifecycleStatus) -> Observation {
        self.observations += 1;

        if let Some(current) = self.current {
            if current.is_terminal() {
                if current != status {
                    warn!(
                        job_id = %self.job_id,
                        terminal_status = %current,
                        reported_status = %status,
                        "Ignoring status report received after terminal status"
                    );
                }
                return Observation::IgnoredAfterTerminal;
            }
            if current == status {
                debug!(job_id = %self.job_id, status = %status, "Status unchanged");
                return Observation::Unchanged;
            }
        }

        if !status.is_known() {
            warn!(job_id = %self.job_id, status = %status, "Job reported a status outside the catalogue");
        }

        info!(
            job_id = %self.job_id,
            from = ?self.current.map(|s| s.code()),
            to = status.code(),
            description = status.description(),
            terminal = status.is_terminal(),
            "Job lifecycle transition"
        );

        self.transitions.push(LifecycleTransition {
            from: self.current,
            to: status,
            observed_at: Utc::now(),
        });
        self.current = Some(status);
        Observation::Transitioned
    }
}
