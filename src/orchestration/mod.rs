//! # Orchestration
//!
//! Coordinates a federated run end to end.
//!
//! ## Core Components
//!
//! - **FederatedAnalyser**: the facade; submits, polls, combines and answers
//! - **AggregateStore**: run-scoped sufficient statistics kept for reuse
//! - **Job**: a submitted job and the result paths its sites write
//! - **RunRequest / AnalysisRun**: what a caller asks for and gets back

pub mod aggregate_store;
pub mod analyser;
pub mod job;
pub mod types;

pub use aggregate_store::{AggregateStore, StoredAggregate};
pub use analyser::FederatedAnalyser;
pub use job::{result_paths, Job};
pub use types::{AnalysisRun, ResultSource, RunId, RunRequest};
