//! # External Gateways
//!
//! The two services every federated run depends on, consumed through traits:
//!
//! - [`JobGateway`]: submits job descriptions and reports lifecycle status
//! - [`ResultStore`]: reads the objects each site writes its partial result to
//!
//! HTTP implementations talk to a TES-style execution service and an
//! S3-compatible object store; [`memory`] holds scripted doubles.

pub mod credentials;
pub mod job;
pub mod memory;
pub mod store;

pub use credentials::RefreshTokenProvider;
pub use job::{
    HttpJobGateway, JobDescriptionBuilder, JobDescriptionRequest, JobGateway, StatusReport,
    SubmittedJob, TesTaskBuilder,
};
pub use memory::{InMemoryJobGateway, InMemoryObjectStore};
pub use store::{
    CredentialProvider, HttpObjectStore, ObjectStoreBackend, ResultStore, RetryingResultStore,
    StoreError,
};
