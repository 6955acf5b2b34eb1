//! # Configuration
//!
//! Settings for polling, the job execution service, the result object store
//! and the defaults applied to every federated run.
//!
//! Values are layered by [`ConfigManager`]: built-in defaults, then
//! `fedstat.toml`, then `fedstat.{environment}.toml`, then `FEDSTAT__*`
//! environment variables (double underscore separates sections, e.g.
//! `FEDSTAT__POLLING__INTERVAL_MS=500`).
//!
//! ```rust,no_run
//! use fedstat_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().polling.interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::system;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Accept a site list either as a sequence or as a comma-separated string,
/// the form it takes when supplied through an environment variable
fn deserialize_sites<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sites {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Sites::deserialize(deserializer)? {
        Sites::List(list) => list
            .into_iter()
            .map(|site| site.trim().to_string())
            .filter(|site| !site.is_empty())
            .collect(),
        Sites::Joined(joined) => parse_sites(&joined),
    })
}

/// Split a comma-separated list of site names, dropping blanks
pub fn parse_sites(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|site| !site.is_empty())
        .map(str::to_string)
        .collect()
}

/// Root configuration structure mirroring fedstat.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Status and result polling behaviour
    pub polling: PollingConfig,

    /// Job execution service connection
    pub job_gateway: JobGatewayConfig,

    /// Object store holding per-site results
    pub result_store: ResultStoreConfig,

    /// Defaults applied to every run
    pub analysis: AnalysisDefaults,

    /// Token refresh for the object store
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Deadline for each poll (status or result collection)
    pub timeout_ms: u64,
    /// Upper bound on concurrent object fetches within one collection round
    pub max_concurrent_fetches: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: system::DEFAULT_POLLING_INTERVAL.as_millis() as u64,
            timeout_ms: system::DEFAULT_POLLING_TIMEOUT.as_millis() as u64,
            max_concurrent_fetches: system::DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobGatewayConfig {
    pub base_url: String,
    /// Task submission API; defaults to `{base_url}/v1`
    pub tes_url: Option<String>,
    /// Submission status API; defaults to `{base_url}/api/Submission`
    pub submission_url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for JobGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            tes_url: None,
            submission_url: None,
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl JobGatewayConfig {
    pub fn resolved_tes_url(&self) -> String {
        self.tes_url
            .clone()
            .unwrap_or_else(|| join_url(&self.base_url, "v1"))
    }

    pub fn resolved_submission_url(&self) -> String {
        self.submission_url
            .clone()
            .unwrap_or_else(|| join_url(&self.base_url, "api/Submission"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResultStoreConfig {
    pub endpoint: String,
    /// Default bucket when a run does not name one
    pub bucket: Option<String>,
    pub max_retries: u32,
    /// Base delay of the exponential backoff between fetch attempts
    pub backoff_base_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: None,
            max_retries: 3,
            backoff_base_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

impl ResultStoreConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisDefaults {
    /// Extension of the object each site writes (`json` or `csv`)
    pub output_format: String,
    /// Sites used when a run does not list its own
    #[serde(deserialize_with = "deserialize_sites")]
    pub sites: Vec<String>,
    pub project: Option<String>,
    /// Credential forwarded to the job gateway on submission
    pub token: Option<String>,
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            output_format: system::DEFAULT_OUTPUT_FORMAT.to_string(),
            sites: Vec::new(),
            project: None,
            token: None,
        }
    }
}

/// OIDC refresh-token grant used to renew the object store bearer token
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token endpoint; refresh is disabled when unset
    pub token_url: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: "fedstat".to_string(),
            client_secret: None,
            refresh_token: None,
            timeout_ms: 10_000,
        }
    }
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        self.token_url.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AnalysisConfig {
    /// Reject values that would make polling or the gateways misbehave
    pub fn validate(&self) -> ConfigResult<()> {
        if self.polling.interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.interval_ms",
                "0",
                "polling interval must be greater than zero",
            ));
        }

        if self.polling.timeout_ms < self.polling.interval_ms {
            return Err(ConfigurationError::invalid_value(
                "polling.timeout_ms",
                self.polling.timeout_ms.to_string(),
                format!(
                    "timeout must be at least the polling interval ({}ms)",
                    self.polling.interval_ms
                ),
            ));
        }

        if self.polling.max_concurrent_fetches == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.max_concurrent_fetches",
                "0",
                "at least one concurrent fetch is required",
            ));
        }

        for (field, url) in [
            ("job_gateway.base_url", self.job_gateway.base_url.as_str()),
            ("result_store.endpoint", self.result_store.endpoint.as_str()),
        ] {
            reqwest::Url::parse(url).map_err(|e| {
                ConfigurationError::invalid_value(field, url, format!("invalid URL: {e}"))
            })?;
        }

        if let Some(token_url) = &self.auth.token_url {
            reqwest::Url::parse(token_url).map_err(|e| {
                ConfigurationError::invalid_value("auth.token_url", token_url, format!("invalid URL: {e}"))
            })?;
            if self.auth.refresh_token.is_none() {
                return Err(ConfigurationError::missing_required_field(
                    "refresh_token",
                    "auth (required when auth.token_url is set)",
                ));
            }
        }

        let format = &self.analysis.output_format;
        if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigurationError::invalid_value(
                "analysis.output_format",
                format.clone(),
                "output format must be a non-empty alphanumeric file extension",
            ));
        }

        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
