//! Result object store gateway.
//!
//! [`ResultStore`] is what the poller sees: an idempotent read that yields the
//! object or "not found". [`RetryingResultStore`] layers the retry and
//! credential-refresh policy over a raw [`ObjectStoreBackend`] such as
//! [`HttpObjectStore`].

use crate::config::ResultStoreConfig;
use crate::error::{AnalysisError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist (yet)
    async fn get_object(&self, bucket: &str, path: &str) -> Result<Option<Bytes>>;
}

/// Failure of a single backend read, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("credentials expired: {0}")]
    ExpiredCredentials(String),

    #[error("store request rejected: {0}")]
    Rejected(String),
}

/// A raw object store without any retry policy
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync {
    async fn fetch(&self, bucket: &str, path: &str) -> std::result::Result<Option<Bytes>, StoreError>;

    /// Obtain fresh credentials after an expiry
    async fn refresh_credentials(&self) -> Result<()>;
}

/// Source of bearer tokens for the object store
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Retries transient failures with exponential backoff and refreshes
/// credentials once per read when they have expired
pub struct RetryingResultStore<B> {
    backend: B,
    max_attempts: u32,
    backoff_base: Duration,
}

impl<B: ObjectStoreBackend> RetryingResultStore<B> {
    pub fn new(backend: B, config: &ResultStoreConfig) -> Self {
        Self {
            backend,
            max_attempts: config.max_retries.max(1),
            backoff_base: config.backoff_base(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: ObjectStoreBackend> ResultStore for RetryingResultStore<B> {
    async fn get_object(&self, bucket: &str, path: &str) -> Result<Option<Bytes>> {
        let mut attempt = 0u32;
        let mut refreshed = false;

        loop {
            match self.backend.fetch(bucket, path).await {
                Ok(object) => return Ok(object),
                Err(StoreError::ExpiredCredentials(reason)) if !refreshed => {
                    info!(bucket = %bucket, path = %path, reason = %reason, "Refreshing object store credentials");
                    self.backend.refresh_credentials().await?;
                    refreshed = true;
                }
                Err(StoreError::Transient(reason)) if attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_base * 2u32.pow(attempt.min(16));
                    warn!(
                        bucket = %bucket,
                        path = %path,
                        error = %reason,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Object fetch failed, will retry"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AnalysisError::gateway(
                        format!("get_object {bucket}/{path}"),
                        e.to_string(),
                    ))
                }
            }
        }
    }
}

/// Object store reached over HTTP as `GET {endpoint}/{bucket}/{path}`
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    token: RwLock<Option<String>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl std::fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.token.read().is_some())
            .finish()
    }
}

impl HttpObjectStore {
    pub fn new(config: &ResultStoreConfig) -> Result<Self> {
        let raw = &config.endpoint;
        let endpoint = Url::parse(&format!("{}/", raw.trim_end_matches('/')))
            .map_err(|e| AnalysisError::configuration(format!("Invalid endpoint '{raw}': {e}")))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("fedstat-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token: RwLock::new(None),
            credentials: None,
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn object_url(&self, bucket: &str, path: &str) -> Result<Url> {
        self.endpoint
            .join(&format!("{bucket}/{}", path.trim_start_matches('/')))
            .map_err(|e| AnalysisError::configuration(format!("Failed to construct URL: {e}")))
    }
}

#[async_trait]
impl ObjectStoreBackend for HttpObjectStore {
    async fn fetch(&self, bucket: &str, path: &str) -> std::result::Result<Option<Bytes>, StoreError> {
        let url = self
            .object_url(bucket, path)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let mut request = self.client.get(url.clone());
        let token = self.token.read().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        let status = response.status();
        match status {
            s if s.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Transient(e.to_string()))?;
                debug!(url = %url, bytes = body.len(), "Fetched object");
                Ok(Some(body))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StoreError::ExpiredCredentials(format!("HTTP {status}")))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                Err(StoreError::Transient(format!("HTTP {status}")))
            }
            _ => Err(StoreError::Rejected(format!("HTTP {status}"))),
        }
    }

    async fn refresh_credentials(&self) -> Result<()> {
        let Some(provider) = &self.credentials else {
            return Err(AnalysisError::gateway(
                "refresh_credentials",
                "no credential provider configured",
            ));
        };
        let token = provider.token().await?;
        *self.token.write() = Some(token);
        Ok(())
    }
}
