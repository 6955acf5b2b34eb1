//! # Federated Analyser
//!
//! The facade a caller drives: one call submits a statistic to every site,
//! waits for the job, combines the partial results and returns the federated
//! answer.
//!
//! ## Flow
//!
//! 1. **Setup**: resolve sites, bucket and task name, build the job description
//! 2. **Submission**: hand the description to the [`JobGateway`]
//! 3. **Polling**: wait for a terminal status, then for every site's object
//! 4. **Normalization / Combination / Finalization**: decode, reduce, finalize
//!
//! A successful run records its sufficient statistics in the analyser's
//! [`AggregateStore`]; compatible statistics can later be finalized from them
//! with [`FederatedAnalyser::run_additional`] without contacting any site.
//! A failed run leaves the store untouched and reports a [`RunError`] naming
//! the phase that failed.

use super::aggregate_store::{AggregateStore, StoredAggregate};
use super::job::Job;
use super::types::{AnalysisRun, ResultSource, RunId, RunRequest};
use crate::combiner::{AggregateState, AnalysisResult, StatisticKind};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, RunError, RunPhase, RunResult};
use crate::gateway::{
    CredentialProvider, HttpJobGateway, HttpObjectStore, JobDescriptionBuilder,
    JobDescriptionRequest, JobGateway, RefreshTokenProvider, ResultStore, RetryingResultStore,
};
use crate::logging::{log_error, log_run_operation};
use crate::normalizer::{decode_payloads, normalize};
use crate::polling::{PollBudget, PollResults, Poller, ResultObject};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Statistic and bucket of the run in progress, attached to every failure
struct RunContext {
    statistic: StatisticKind,
    bucket: Option<String>,
}

impl RunContext {
    fn fail(&self, phase: RunPhase, source: AnalysisError) -> RunError {
        log_error(
            "analyser",
            &phase.to_string(),
            &source.to_string(),
            Some(self.statistic.as_str()),
        );
        RunError::new(self.statistic, phase, self.bucket.as_deref(), source)
    }
}

/// Sites and bucket a submission or collection will use
struct Target {
    sites: Vec<String>,
    bucket: String,
}

pub struct FederatedAnalyser {
    config: AnalysisConfig,
    job_gateway: Arc<dyn JobGateway>,
    description_builder: Arc<dyn JobDescriptionBuilder>,
    poller: Poller,
    store: Mutex<AggregateStore>,
    last_aggregates: Mutex<HashMap<StatisticKind, AggregateState>>,
}

impl std::fmt::Debug for FederatedAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedAnalyser")
            .field("config", &self.config)
            .field("stored_runs", &self.store.lock().len())
            .finish()
    }
}

impl FederatedAnalyser {
    pub fn new(
        config: AnalysisConfig,
        job_gateway: Arc<dyn JobGateway>,
        result_store: Arc<dyn ResultStore>,
        description_builder: Arc<dyn JobDescriptionBuilder>,
    ) -> Self {
        let poller = Poller::new(
            job_gateway.clone(),
            result_store,
            config.polling.max_concurrent_fetches,
        );
        Self {
            config,
            job_gateway,
            description_builder,
            poller,
            store: Mutex::new(AggregateStore::new()),
            last_aggregates: Mutex::new(HashMap::new()),
        }
    }

    /// Analyser talking to the HTTP job gateway and object store named in
    /// `config`. The configured token authenticates both; when the `auth`
    /// section names a token endpoint, expired object store credentials are
    /// renewed through it.
    pub fn with_http_gateways(
        config: AnalysisConfig,
        description_builder: Arc<dyn JobDescriptionBuilder>,
    ) -> crate::error::Result<Self> {
        let credentials = RefreshTokenProvider::from_config(&config.auth)?
            .map(|provider| Arc::new(provider) as Arc<dyn CredentialProvider>);
        Self::with_http_gateways_and_credentials(config, description_builder, credentials)
    }

    /// As [`Self::with_http_gateways`], renewing object store credentials
    /// through `credentials`
    pub fn with_http_gateways_and_credentials(
        config: AnalysisConfig,
        description_builder: Arc<dyn JobDescriptionBuilder>,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        let job_gateway = Arc::new(HttpJobGateway::new(&config.job_gateway)?);
        let mut object_store = HttpObjectStore::new(&config.result_store)?;
        if let Some(token) = &config.analysis.token {
            object_store = object_store.with_token(token.clone());
        }
        if let Some(provider) = credentials {
            object_store = object_store.with_credential_provider(provider);
        }
        let result_store = Arc::new(RetryingResultStore::new(object_store, &config.result_store));
        Ok(Self::new(config, job_gateway, result_store, description_builder))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run one federated analysis.
    ///
    /// With neither a query nor sites the answer comes from stored
    /// aggregates, exactly as [`Self::run_additional`].
    #[instrument(skip(self, request), fields(statistic = %request.statistic))]
    pub async fn run(&self, request: RunRequest) -> RunResult<AnalysisRun> {
        if request.answers_from_store() {
            return self.run_additional(request.statistic);
        }

        let statistic = request.statistic;
        let mut ctx = RunContext {
            statistic,
            bucket: request.bucket.clone().or_else(|| self.config.result_store.bucket.clone()),
        };

        let target = self
            .resolve_target(&request)
            .map_err(|e| ctx.fail(RunPhase::Setup, e))?;
        ctx.bucket = Some(target.bucket.clone());

        let query = request.query.clone().ok_or_else(|| {
            ctx.fail(
                RunPhase::Setup,
                AnalysisError::configuration("a query is required to submit a job"),
            )
        })?;

        let description = self
            .description_builder
            .build(&JobDescriptionRequest {
                statistic,
                query: query.clone(),
                sites: target.sites.clone(),
                task_name: request.task_name(),
                bucket: target.bucket.clone(),
                output_format: self.config.analysis.output_format.clone(),
                project: self.config.analysis.project.clone(),
            })
            .map_err(|e| ctx.fail(RunPhase::Setup, e))?;

        let submitted = self
            .job_gateway
            .submit(&description, self.config.analysis.token.as_deref())
            .await
            .map_err(|e| ctx.fail(RunPhase::Submission, e))?;
        let job = Job::new(
            submitted.id,
            target.sites.len(),
            &self.config.analysis.output_format,
        )
        .map_err(|e| ctx.fail(RunPhase::Submission, e))?;

        log_run_operation(
            "submit",
            statistic.as_str(),
            Some(&job.id),
            Some(&target.bucket),
            "submitted",
            Some(&format!("{} sites", job.site_count)),
        );

        let budget = self.budget(&request);
        let objects = match self
            .poller
            .poll_results(
                &job.id,
                &job.expected_result_paths,
                &target.bucket,
                Some(job.expected_count()),
                &budget,
            )
            .await
            .into_result(&format!("polling job {}", job.id))
            .map_err(|e| ctx.fail(RunPhase::Polling, e))?
        {
            PollResults::Collected { objects, .. } => objects,
            PollResults::NoResults {
                status,
                description,
            } => {
                return Err(ctx.fail(
                    RunPhase::Polling,
                    AnalysisError::JobTerminated {
                        job_id: job.id.clone(),
                        status: status.code(),
                        description,
                    },
                ))
            }
        };

        self.finish(
            &ctx,
            &job,
            target.sites,
            Some(query),
            ResultSource::Submitted,
            &objects,
        )
    }

    /// Collect and combine the results of a job submitted earlier, without
    /// resubmitting or waiting on its status
    #[instrument(skip(self, request), fields(statistic = %request.statistic))]
    pub async fn collect_results(
        &self,
        job_id: &str,
        request: RunRequest,
    ) -> RunResult<AnalysisRun> {
        let mut ctx = RunContext {
            statistic: request.statistic,
            bucket: request.bucket.clone().or_else(|| self.config.result_store.bucket.clone()),
        };
        let target = self
            .resolve_target(&request)
            .map_err(|e| ctx.fail(RunPhase::Setup, e))?;
        ctx.bucket = Some(target.bucket.clone());

        let job = Job::new(job_id, target.sites.len(), &self.config.analysis.output_format)
            .map_err(|e| ctx.fail(RunPhase::Setup, e))?;

        let budget = self.budget(&request);
        let objects = self
            .poller
            .poll_result_objects(
                &job.id,
                &job.expected_result_paths,
                &target.bucket,
                Some(job.expected_count()),
                &budget,
            )
            .await
            .into_result(&format!("collecting results of job {}", job.id))
            .map_err(|e| ctx.fail(RunPhase::Polling, e))?;

        self.finish(
            &ctx,
            &job,
            target.sites,
            request.query,
            ResultSource::Collected,
            &objects,
        )
    }

    /// Finalize `statistic` from the most recent stored run that covers its
    /// schema, without submitting anything
    pub fn run_additional(&self, statistic: StatisticKind) -> RunResult<AnalysisRun> {
        let ctx = RunContext {
            statistic,
            bucket: None,
        };

        let stored = {
            let store = self.store.lock();
            match store.latest_covering(statistic.schema()) {
                Some(entry) => entry.clone(),
                None => {
                    let missing_fields = store.merged_view().missing_fields(statistic.schema());
                    let runnable = store.runnable();
                    return Err(ctx.fail(
                        RunPhase::Compatibility,
                        AnalysisError::Incompatible {
                            statistic,
                            missing_fields,
                            runnable,
                        },
                    ));
                }
            }
        };

        let mut combiner = statistic.combiner();
        combiner
            .restore(&stored.state)
            .map_err(|e| ctx.fail(RunPhase::Compatibility, e))?;
        let result = combiner
            .finalize()
            .map_err(|e| ctx.fail(RunPhase::Finalization, e))?;

        self.last_aggregates
            .lock()
            .insert(statistic, combiner.aggregate().clone());

        info!(
            statistic = %statistic,
            from_run = %stored.run_id,
            stored_statistic = %stored.statistic,
            "Finalized from stored aggregates"
        );

        Ok(AnalysisRun {
            run_id: RunId::new(),
            statistic,
            result,
            source: ResultSource::Stored {
                from_run: stored.run_id,
            },
            job_id: stored.job_id,
            query: None,
            sites_used: stored.sites,
            result_count: stored.result_count,
            completed_at: Utc::now(),
        })
    }

    /// Statistics that [`Self::run_additional`] can answer right now
    pub fn runnable_statistics(&self) -> Vec<StatisticKind> {
        self.store.lock().runnable()
    }

    /// Retained aggregate of the last successful run of `statistic`
    pub fn last_aggregate(&self, statistic: StatisticKind) -> Option<AggregateState> {
        self.last_aggregates.lock().get(&statistic).cloned()
    }

    /// Every stored field, later runs winning
    pub fn stored_fields(&self) -> AggregateState {
        self.store.lock().merged_view()
    }

    pub fn stored_runs(&self) -> usize {
        self.store.lock().len()
    }

    /// Drop every stored aggregate
    pub fn clear_stored(&self) {
        self.store.lock().clear();
        self.last_aggregates.lock().clear();
    }

    fn resolve_target(&self, request: &RunRequest) -> crate::error::Result<Target> {
        let sites = match &request.sites {
            Some(sites) => sites.clone(),
            None => self.config.analysis.sites.clone(),
        };
        if sites.is_empty() {
            return Err(AnalysisError::configuration(
                "no sites given for the run and none configured",
            ));
        }

        let bucket = request
            .bucket
            .clone()
            .or_else(|| self.config.result_store.bucket.clone())
            .filter(|bucket| !bucket.trim().is_empty())
            .ok_or_else(|| {
                AnalysisError::configuration("no result bucket given for the run and none configured")
            })?;

        Ok(Target { sites, bucket })
    }

    fn budget(&self, request: &RunRequest) -> PollBudget {
        let cancel = request.cancel.clone().unwrap_or_else(CancellationToken::new);
        PollBudget::from_config(&self.config.polling, cancel)
    }

    /// Combine collected objects and record the aggregate
    fn finish(
        &self,
        ctx: &RunContext,
        job: &Job,
        sites: Vec<String>,
        query: Option<String>,
        source: ResultSource,
        objects: &[ResultObject],
    ) -> RunResult<AnalysisRun> {
        let Combined {
            result,
            aggregate,
            contributing,
        } = combine(ctx, objects)?;
        let run_id = RunId::new();

        self.store.lock().record(StoredAggregate {
            run_id,
            statistic: ctx.statistic,
            state: aggregate.clone(),
            job_id: Some(job.id.clone()),
            sites: sites.clone(),
            result_count: contributing,
            recorded_at: Utc::now(),
        });
        self.last_aggregates.lock().insert(ctx.statistic, aggregate);

        log_run_operation(
            "finalize",
            ctx.statistic.as_str(),
            Some(&job.id),
            ctx.bucket.as_deref(),
            "completed",
            Some(&format!(
                "{} of {} results contributed ({} fetched)",
                contributing,
                job.site_count,
                objects.len()
            )),
        );

        Ok(AnalysisRun {
            run_id,
            statistic: ctx.statistic,
            result,
            source,
            job_id: Some(job.id.clone()),
            query,
            sites_used: sites,
            result_count: contributing,
            completed_at: Utc::now(),
        })
    }
}

struct Combined {
    result: AnalysisResult,
    aggregate: AggregateState,
    contributing: usize,
}

fn combine(ctx: &RunContext, objects: &[ResultObject]) -> RunResult<Combined> {
    let bodies: Vec<Bytes> = objects.iter().map(|object| object.body.clone()).collect();
    let payloads = decode_payloads(&bodies);
    if payloads.is_empty() && !bodies.is_empty() {
        return Err(ctx.fail(
            RunPhase::Normalization,
            AnalysisError::Encoding(format!("none of the {} results is UTF-8", bodies.len())),
        ));
    }

    let normalized = normalize(ctx.statistic, &payloads)
        .map_err(|e| ctx.fail(RunPhase::Normalization, e))?;

    let mut combiner = ctx.statistic.combiner();
    combiner
        .reduce(&normalized.input)
        .map_err(|e| ctx.fail(RunPhase::Combination, e))?;
    let result = combiner
        .finalize()
        .map_err(|e| ctx.fail(RunPhase::Finalization, e))?;

    Ok(Combined {
        result,
        aggregate: combiner.aggregate().clone(),
        contributing: normalized.contributing,
    })
}
