//! In-memory job gateway and object store.
//!
//! Scripted stand-ins for the execution service and the object store, used
//! by tests and local demonstrations.

use super::job::{JobGateway, StatusReport, SubmittedJob};
use super::store::ResultStore;
use crate::error::{AnalysisError, Result};
use crate::state_machine::LifecycleStatus;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct JobScripts {
    /// Statuses handed to every newly submitted job
    default_script: Vec<LifecycleStatus>,
    pending: HashMap<String, VecDeque<LifecycleStatus>>,
    last_reported: HashMap<String, LifecycleStatus>,
    /// Status queries that fail before the script resumes
    failures: HashMap<String, usize>,
}

/// Execution service double that hands out consecutive numeric job ids and
/// replays a status script per job. Once the script is exhausted the last
/// status is repeated.
#[derive(Debug)]
pub struct InMemoryJobGateway {
    next_id: AtomicU64,
    /// Ids reserved per submission: the job itself plus one per site
    ids_per_job: u64,
    scripts: Mutex<JobScripts>,
    submissions: Mutex<Vec<(String, Value, Option<String>)>>,
    status_queries: AtomicUsize,
}

impl InMemoryJobGateway {
    pub fn new(first_id: u64, sites_per_job: usize) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            ids_per_job: sites_per_job as u64 + 1,
            scripts: Mutex::new(JobScripts {
                default_script: vec![LifecycleStatus::Completed],
                ..Default::default()
            }),
            submissions: Mutex::new(Vec::new()),
            status_queries: AtomicUsize::new(0),
        }
    }

    /// Script used for every job submitted from now on
    pub fn with_default_script(self, script: Vec<LifecycleStatus>) -> Self {
        self.scripts.lock().default_script = script;
        self
    }

    /// Make the next `count` status queries for `job_id` fail
    pub fn fail_next_status_queries(&self, job_id: &str, count: usize) {
        self.scripts
            .lock()
            .failures
            .insert(job_id.to_string(), count);
    }

    /// Job id, description and credential of every submission, in order
    pub fn submissions(&self) -> Vec<(String, Value, Option<String>)> {
        self.submissions.lock().clone()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobGateway for InMemoryJobGateway {
    async fn submit(&self, description: &Value, credential: Option<&str>) -> Result<SubmittedJob> {
        let id = self
            .next_id
            .fetch_add(self.ids_per_job, Ordering::SeqCst)
            .to_string();
        {
            let mut scripts = self.scripts.lock();
            let script = scripts.default_script.clone();
            scripts.pending.insert(id.clone(), script.into());
        }
        self.submissions.lock().push((
            id.clone(),
            description.clone(),
            credential.map(str::to_string),
        ));
        Ok(SubmittedJob { id })
    }

    async fn get_status(&self, job_id: &str) -> Result<StatusReport> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock();

        if let Some(remaining) = scripts.failures.get_mut(job_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AnalysisError::gateway("get_status", "service unavailable"));
            }
        }

        let next = scripts
            .pending
            .get_mut(job_id)
            .and_then(VecDeque::pop_front);
        let status = match next {
            Some(status) => status,
            None => *scripts.last_reported.get(job_id).ok_or_else(|| {
                AnalysisError::gateway("get_status", format!("unknown job {job_id}"))
            })?,
        };
        scripts.last_reported.insert(job_id.to_string(), status);
        Ok(StatusReport::new(status))
    }
}

/// Object store double keyed by bucket and path
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), Bytes>,
    requests: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, path: &str, body: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), path.to_string()), body.into());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of `get_object` calls served, hits and misses alike
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, path: &str) -> Result<Option<Bytes>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|entry| entry.value().clone()))
    }
}
