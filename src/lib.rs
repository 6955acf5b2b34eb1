#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Fedstat Core
//!
//! Orchestration core for federated statistics over isolated execution sites.
//!
//! ## Overview
//!
//! Each site computes a partial sufficient statistic over its own data. The
//! coordinator submits one job to every site, follows the job through the
//! execution service's lifecycle, collects the per-site results from object
//! storage and combines them into one federated answer. Sufficient statistics
//! retained by a run let compatible statistics be answered later without a
//! new submission.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - The [`FederatedAnalyser`] facade and run-scoped aggregate store
//! - [`polling`] - Deadline-bounded, cancellable status and result polling
//! - [`state_machine`] - Lifecycle status catalogue and per-job transition tracking
//! - [`normalizer`] - Decoding per-site payloads into combiner input
//! - [`combiner`] - Mean, variance, Pearson correlation, contingency tables, percentile sketches
//! - [`gateway`] - Job and result-store gateways, HTTP and in-memory
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedstat_core::config::ConfigManager;
//! use fedstat_core::gateway::TesTaskBuilder;
//! use fedstat_core::{FederatedAnalyser, RunRequest, StatisticKind};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! fedstat_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?.config().clone();
//! let analyser = FederatedAnalyser::with_http_gateways(
//!     config,
//!     Arc::new(TesTaskBuilder::new("harbor.example/fedstat/executor:latest")),
//! )?;
//!
//! let run = analyser
//!     .run(RunRequest::new(StatisticKind::Variance).with_query("SELECT value FROM observations"))
//!     .await?;
//! println!("variance = {:?}", run.result.as_scalar());
//!
//! // Mean shares the variance fields, so no new job is needed
//! let mean = analyser.run_additional(StatisticKind::Mean)?;
//! println!("mean = {:?}", mean.result.as_scalar());
//! # Ok(())
//! # }
//! ```

pub mod combiner;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod normalizer;
pub mod orchestration;
pub mod polling;
pub mod state_machine;

pub use combiner::{AggregateState, AggregateValue, AnalysisResult, Combiner, StatisticKind};
pub use config::{AnalysisConfig, ConfigManager};
pub use error::{AnalysisError, Result, RunError, RunPhase, RunResult};
pub use orchestration::{AnalysisRun, FederatedAnalyser, ResultSource, RunId, RunRequest};
pub use polling::{PollBudget, PollOutcome, Poller};
pub use state_machine::{LifecycleStatus, TaskLifecycle};
