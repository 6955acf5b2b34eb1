//! Job execution service gateway.
//!
//! Submits task descriptions and reports the lifecycle status of submitted
//! jobs. [`HttpJobGateway`] talks to a TES-style REST API; job descriptions
//! themselves are produced by a [`JobDescriptionBuilder`].

use crate::combiner::StatisticKind;
use crate::config::JobGatewayConfig;
use crate::error::{AnalysisError, Result};
use crate::state_machine::LifecycleStatus;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Identifier returned by the execution service for an accepted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
}

/// Services return the id either as a JSON number or a string
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(number) => number.to_string(),
        Id::Text(text) => text,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: LifecycleStatus,
    pub description: String,
}

impl StatusReport {
    pub fn new(status: LifecycleStatus) -> Self {
        Self {
            status,
            description: status.description().to_string(),
        }
    }
}

#[async_trait]
pub trait JobGateway: Send + Sync {
    /// Submit a job description, authenticating with `credential` when given
    async fn submit(&self, description: &Value, credential: Option<&str>) -> Result<SubmittedJob>;

    async fn get_status(&self, job_id: &str) -> Result<StatusReport>;
}

/// What a job description must carry for one federated run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescriptionRequest {
    pub statistic: StatisticKind,
    pub query: String,
    pub sites: Vec<String>,
    pub task_name: String,
    pub bucket: String,
    pub output_format: String,
    pub project: Option<String>,
}

/// Produces the service-specific job description
pub trait JobDescriptionBuilder: Send + Sync {
    fn build(&self, request: &JobDescriptionRequest) -> Result<Value>;
}

/// Builds TES task messages that run the per-site executor image
#[derive(Debug, Clone)]
pub struct TesTaskBuilder {
    image: String,
    workdir: String,
    output_path: String,
}

impl TesTaskBuilder {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            workdir: "/app".to_string(),
            output_path: "/outputs".to_string(),
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_output_path(mut self, output_path: impl Into<String>) -> Self {
        self.output_path = output_path.into();
        self
    }
}

impl JobDescriptionBuilder for TesTaskBuilder {
    fn build(&self, request: &JobDescriptionRequest) -> Result<Value> {
        if request.sites.is_empty() {
            return Err(AnalysisError::configuration(
                "a job description needs at least one site",
            ));
        }

        let mut tags = serde_json::Map::new();
        if let Some(project) = &request.project {
            tags.insert("Project".to_string(), Value::String(project.clone()));
        }
        tags.insert("tres".to_string(), Value::String(request.sites.join("|")));

        Ok(json!({
            "name": request.task_name,
            "description": format!("Federated {} analysis", request.statistic),
            "inputs": [],
            "outputs": [{
                "name": "workdir",
                "url": format!("s3://{}", request.bucket),
                "path": self.output_path,
                "type": "DIRECTORY",
            }],
            "executors": [{
                "image": self.image,
                "command": [
                    format!("--user-query={}", request.query),
                    format!("--analysis={}", request.statistic),
                    format!("--output-filename={}/output", self.output_path),
                    format!("--output-format={}", request.output_format),
                ],
                "workdir": self.workdir,
            }],
            "tags": tags,
        }))
    }
}

/// TES submission API plus the submission-status API
#[derive(Clone)]
pub struct HttpJobGateway {
    client: Client,
    tes_url: Url,
    submission_url: Url,
    max_retries: u32,
}

impl std::fmt::Debug for HttpJobGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJobGateway")
            .field("tes_url", &self.tes_url.as_str())
            .field("submission_url", &self.submission_url.as_str())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Deserialize)]
struct SubmissionStatus {
    status: i32,
}

impl HttpJobGateway {
    pub fn new(config: &JobGatewayConfig) -> Result<Self> {
        let tes_url = parse_base(&config.resolved_tes_url())?;
        let submission_url = parse_base(&config.resolved_submission_url())?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("fedstat-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            tes_url,
            submission_url,
            max_retries: config.max_retries.max(1),
        })
    }

    pub fn tasks_url(&self) -> Result<Url> {
        join(&self.tes_url, "tasks")
    }

    pub fn status_url(&self, job_id: &str) -> Result<Url> {
        join(&self.submission_url, &format!("GetASubmission/{job_id}"))
    }

    /// Client errors are final; server and network errors are retried with
    /// exponential backoff (1s, 2s, 4s, ...) until `max_retries` attempts
    async fn send_with_retry<F>(&self, operation: &str, request: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            match request().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());

                    if status.is_client_error() {
                        error!(operation = %operation, status = %status, error = %error_text, "Client error from job service");
                        return Err(AnalysisError::gateway(
                            operation,
                            format!("HTTP {status}: {error_text}"),
                        ));
                    }

                    warn!(
                        operation = %operation,
                        status = %status,
                        error = %error_text,
                        retry = retries + 1,
                        max_retries = self.max_retries,
                        "Server error from job service, will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        operation = %operation,
                        error = %e,
                        retry = retries + 1,
                        max_retries = self.max_retries,
                        "Network error contacting job service, will retry"
                    );
                }
            }

            retries += 1;
            if retries >= self.max_retries {
                error!(operation = %operation, retries = retries, "Exhausted all retries");
                return Err(AnalysisError::gateway(
                    operation,
                    format!("failed after {retries} attempts"),
                ));
            }

            let delay = Duration::from_secs(1 << retries.min(6));
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl JobGateway for HttpJobGateway {
    async fn submit(&self, description: &Value, credential: Option<&str>) -> Result<SubmittedJob> {
        let url = self.tasks_url()?;
        debug!(url = %url, "Submitting job");

        let response = self
            .send_with_retry("submit", || {
                let request = self
                    .client
                    .post(url.clone())
                    .header(reqwest::header::ACCEPT, "text/plain")
                    .json(description);
                match credential {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;

        let job: SubmittedJob = response.json().await.map_err(|e| {
            AnalysisError::gateway("submit", format!("Invalid response format: {e}"))
        })?;
        info!(job_id = %job.id, "Job submitted");
        Ok(job)
    }

    async fn get_status(&self, job_id: &str) -> Result<StatusReport> {
        let url = self.status_url(job_id)?;
        let response = self
            .send_with_retry("get_status", || {
                self.client
                    .get(url.clone())
                    .header(reqwest::header::ACCEPT, "text/plain")
            })
            .await?;

        let body: SubmissionStatus = response.json().await.map_err(|e| {
            AnalysisError::gateway("get_status", format!("Invalid response format: {e}"))
        })?;
        let report = StatusReport::new(LifecycleStatus::from_code(body.status));
        debug!(job_id = %job_id, status = %report.status, "Job status retrieved");
        Ok(report)
    }
}

/// Parse a base URL, keeping its path as a directory for later joins
fn parse_base(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| AnalysisError::configuration(format!("Invalid URL '{raw}': {e}")))
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| AnalysisError::configuration(format!("Failed to construct URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobDescriptionRequest {
        JobDescriptionRequest {
            statistic: StatisticKind::Variance,
            query: "SELECT value_as_number FROM measurement".to_string(),
            sites: vec!["Nottingham".to_string(), "Swansea".to_string()],
            task_name: "analysis variance".to_string(),
            bucket: "results".to_string(),
            output_format: "json".to_string(),
            project: Some("demo".to_string()),
        }
    }

    #[test]
    fn test_urls_follow_service_layout() {
        let gateway = HttpJobGateway::new(&JobGatewayConfig {
            base_url: "https://api.example.com".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            gateway.tasks_url().unwrap().as_str(),
            "https://api.example.com/v1/tasks"
        );
        assert_eq!(
            gateway.status_url("1042").unwrap().as_str(),
            "https://api.example.com/api/Submission/GetASubmission/1042"
        );
    }

    #[test]
    fn test_submitted_job_accepts_numeric_id() {
        let job: SubmittedJob = serde_json::from_str(r#"{"id": 1042}"#).unwrap();
        assert_eq!(job.id, "1042");
        let job: SubmittedJob = serde_json::from_str(r#"{"id": "77", "extra": true}"#).unwrap();
        assert_eq!(job.id, "77");
    }

    #[test]
    fn test_tes_task_description() {
        let description = TesTaskBuilder::new("executor:latest").build(&request()).unwrap();

        assert_eq!(description["name"], "analysis variance");
        assert_eq!(description["tags"]["tres"], "Nottingham|Swansea");
        assert_eq!(description["tags"]["Project"], "demo");
        assert_eq!(description["outputs"][0]["url"], "s3://results");
        let command = description["executors"][0]["command"].as_array().unwrap();
        assert!(command.contains(&json!("--analysis=variance")));
        assert!(command.contains(&json!("--output-format=json")));
    }

    #[test]
    fn test_tes_task_requires_sites() {
        let mut request = request();
        request.sites.clear();
        assert!(TesTaskBuilder::new("executor:latest").build(&request).is_err());
    }
}
