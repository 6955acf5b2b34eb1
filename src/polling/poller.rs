//! Status and result polling against the job and result-store gateways.

use super::{PollBudget, PollOutcome, PollResults, ResultObject, TerminalStatus};
use crate::gateway::{JobGateway, ResultStore};
use crate::logging::log_poll_operation;
use crate::state_machine::TaskLifecycle;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum Interruption {
    Cancelled,
    TimedOut,
}

impl Interruption {
    fn into_outcome<T>(self, started: Instant) -> PollOutcome<T> {
        match self {
            Self::Cancelled => PollOutcome::Cancelled,
            Self::TimedOut => PollOutcome::TimedOut {
                elapsed: started.elapsed(),
            },
        }
    }
}

pub struct Poller {
    job_gateway: Arc<dyn JobGateway>,
    result_store: Arc<dyn ResultStore>,
    max_concurrent_fetches: usize,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .finish()
    }
}

impl Poller {
    pub fn new(
        job_gateway: Arc<dyn JobGateway>,
        result_store: Arc<dyn ResultStore>,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            job_gateway,
            result_store,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    /// Query the job status every `budget.interval` until it is terminal.
    ///
    /// A failed status query counts as "no new status": it is logged and the
    /// loop carries on until the deadline or cancellation.
    pub async fn poll_task_status(
        &self,
        job_id: &str,
        budget: &PollBudget,
    ) -> PollOutcome<TerminalStatus> {
        let started = Instant::now();
        let deadline = started + budget.timeout;
        let mut lifecycle = TaskLifecycle::new(job_id);

        loop {
            let report = tokio::select! {
                biased;
                _ = budget.cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    return Interruption::TimedOut.into_outcome(started);
                }
                report = self.job_gateway.get_status(job_id) => report,
            };

            match report {
                Ok(report) => {
                    lifecycle.observe(report.status);
                    if report.status.is_terminal() {
                        info!(
                            job_id = %job_id,
                            status = %report.status,
                            queries = lifecycle.observations(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Job reached terminal status"
                        );
                        return PollOutcome::Ready(TerminalStatus {
                            status: report.status,
                            description: report.description,
                            lifecycle,
                        });
                    }
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Status query failed, will poll again");
                }
            }

            if let Some(interruption) = pause(budget, deadline).await {
                return interruption.into_outcome(started);
            }
        }
    }

    /// Wait for a terminal status, then collect results if that status
    /// carries any
    pub async fn poll_results(
        &self,
        job_id: &str,
        paths: &[String],
        bucket: &str,
        expected_count: Option<usize>,
        budget: &PollBudget,
    ) -> PollOutcome<PollResults> {
        let terminal = match self.poll_task_status(job_id, budget).await {
            PollOutcome::Ready(terminal) => terminal,
            PollOutcome::TimedOut { elapsed } => return PollOutcome::TimedOut { elapsed },
            PollOutcome::Cancelled => return PollOutcome::Cancelled,
        };

        if !terminal.status.is_result_status() {
            warn!(
                job_id = %job_id,
                status = %terminal.status,
                "Job finished without results, skipping collection"
            );
            return PollOutcome::Ready(PollResults::NoResults {
                status: terminal.status,
                description: terminal.description,
            });
        }

        let status = terminal.status;
        self.poll_result_objects(job_id, paths, bucket, expected_count, budget)
            .await
            .map(|objects| PollResults::Collected { status, objects })
    }

    /// Fetch every path, retrying the whole set each interval until at least
    /// `expected_count` objects are available. `None` accepts one pass.
    pub async fn poll_result_objects(
        &self,
        job_id: &str,
        paths: &[String],
        bucket: &str,
        expected_count: Option<usize>,
        budget: &PollBudget,
    ) -> PollOutcome<Vec<ResultObject>> {
        let started = Instant::now();
        let deadline = started + budget.timeout;

        if let Some(expected) = expected_count {
            if expected > paths.len() {
                warn!(
                    job_id = %job_id,
                    expected = expected,
                    paths = paths.len(),
                    "Expecting more results than there are paths; collection can only time out"
                );
            }
        }

        loop {
            let objects = tokio::select! {
                biased;
                _ = budget.cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    return Interruption::TimedOut.into_outcome(started);
                }
                objects = self.fetch_round(paths, bucket) => objects,
            };

            let satisfied = expected_count.map_or(true, |expected| objects.len() >= expected);
            log_poll_operation(
                "collect_results",
                job_id,
                objects.len(),
                expected_count,
                started.elapsed().as_millis() as u64,
                if satisfied { "complete" } else { "waiting" },
            );
            if satisfied {
                return PollOutcome::Ready(objects);
            }

            if let Some(interruption) = pause(budget, deadline).await {
                return interruption.into_outcome(started);
            }
        }
    }

    /// One pass over every path; missing objects and failed fetches are
    /// both treated as "not yet available"
    async fn fetch_round(&self, paths: &[String], bucket: &str) -> Vec<ResultObject> {
        stream::iter(paths)
            .map(|path| async move {
                let fetched = self.result_store.get_object(bucket, path).await;
                (path, fetched)
            })
            .buffered(self.max_concurrent_fetches)
            .filter_map(|(path, fetched)| async move {
                match fetched {
                    Ok(Some(body)) => Some(ResultObject {
                        path: path.clone(),
                        body,
                    }),
                    Ok(None) => {
                        debug!(bucket = %bucket, path = %path, "Result not available yet");
                        None
                    }
                    Err(e) => {
                        warn!(bucket = %bucket, path = %path, error = %e, "Result fetch failed");
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

/// Sleep one interval, cut short by the deadline or cancellation
async fn pause(budget: &PollBudget, deadline: Instant) -> Option<Interruption> {
    let wake = (Instant::now() + budget.interval).min(deadline);
    tokio::select! {
        biased;
        _ = budget.cancel.cancelled() => Some(Interruption::Cancelled),
        _ = tokio::time::sleep_until(wake) => {
            (Instant::now() >= deadline).then_some(Interruption::TimedOut)
        }
    }
}
