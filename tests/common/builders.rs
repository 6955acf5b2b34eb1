//! Builders for an in-memory federation: analyser, job gateway and object
//! store wired together with fast polling.

#![allow(dead_code)]

use bytes::Bytes;
use fedstat_core::config::AnalysisConfig;
use fedstat_core::gateway::{InMemoryJobGateway, InMemoryObjectStore, TesTaskBuilder};
use fedstat_core::{FederatedAnalyser, LifecycleStatus};
use std::sync::Arc;

pub const BUCKET: &str = "federated-results";
pub const FIRST_JOB_ID: u64 = 1000;

pub struct FederationBuilder {
    sites: Vec<String>,
    output_format: String,
    script: Vec<LifecycleStatus>,
    interval_ms: u64,
    timeout_ms: u64,
    bucket: Option<String>,
}

impl FederationBuilder {
    pub fn new() -> Self {
        Self {
            sites: vec!["Nottingham".to_string(), "Swansea".to_string()],
            output_format: "json".to_string(),
            script: vec![LifecycleStatus::Completed],
            interval_ms: 5,
            timeout_ms: 2_000,
            bucket: Some(BUCKET.to_string()),
        }
    }

    pub fn with_sites(mut self, sites: &[&str]) -> Self {
        self.sites = sites.iter().map(|site| site.to_string()).collect();
        self
    }

    pub fn with_output_format(mut self, format: &str) -> Self {
        self.output_format = format.to_string();
        self
    }

    pub fn with_script(mut self, script: Vec<LifecycleStatus>) -> Self {
        self.script = script;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn without_bucket(mut self) -> Self {
        self.bucket = None;
        self
    }

    pub fn build(self) -> Federation {
        let mut config = AnalysisConfig::default();
        config.polling.interval_ms = self.interval_ms;
        config.polling.timeout_ms = self.timeout_ms;
        config.result_store.bucket = self.bucket;
        config.analysis.output_format = self.output_format.clone();
        config.analysis.sites = self.sites.clone();
        config.analysis.project = Some("federated-demo".to_string());

        let gateway = Arc::new(
            InMemoryJobGateway::new(FIRST_JOB_ID, self.sites.len()).with_default_script(self.script),
        );
        let store = Arc::new(InMemoryObjectStore::new());
        let analyser = FederatedAnalyser::new(
            config,
            gateway.clone(),
            store.clone(),
            Arc::new(TesTaskBuilder::new("harbor.example/fedstat/executor:latest")),
        );

        Federation {
            analyser,
            gateway,
            store,
            site_count: self.sites.len(),
            output_format: self.output_format,
        }
    }
}

pub struct Federation {
    pub analyser: FederatedAnalyser,
    pub gateway: Arc<InMemoryJobGateway>,
    pub store: Arc<InMemoryObjectStore>,
    pub site_count: usize,
    pub output_format: String,
}

impl Federation {
    /// Id the gateway hands out for the `n`th submission (0-based)
    pub fn job_id(&self, n: u64) -> u64 {
        FIRST_JOB_ID + n * (self.site_count as u64 + 1)
    }

    /// Write one payload per site where the sites of `job_id` write theirs
    pub fn publish<B: Into<Bytes>>(&self, job_id: u64, payloads: Vec<B>) {
        for (site, payload) in payloads.into_iter().enumerate() {
            let path = format!("{}/output.{}", job_id + site as u64 + 1, self.output_format);
            self.store.put(BUCKET, &path, payload);
        }
    }

    pub fn publish_json(&self, job_id: u64, records: Vec<serde_json::Value>) {
        self.publish(
            job_id,
            records.into_iter().map(|record| record.to_string()).collect(),
        );
    }
}
