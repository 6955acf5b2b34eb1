//! Bearer token renewal for the object store.
//!
//! [`RefreshTokenProvider`] runs the OIDC refresh-token grant against the
//! identity provider's token endpoint. Providers that rotate refresh tokens
//! are followed: the next refresh uses the token returned by the last one.

use super::store::CredentialProvider;
use crate::config::AuthConfig;
use crate::error::{AnalysisError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, error};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

pub struct RefreshTokenProvider {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: Option<String>,
    refresh_token: RwLock<String>,
}

impl std::fmt::Debug for RefreshTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenProvider")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl RefreshTokenProvider {
    pub fn new(
        token_url: &str,
        client_id: impl Into<String>,
        refresh_token: impl Into<String>,
        config: &AuthConfig,
    ) -> Result<Self> {
        let token_url = Url::parse(token_url).map_err(|e| {
            AnalysisError::configuration(format!("Invalid token URL '{token_url}': {e}"))
        })?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("fedstat-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: config.client_secret.clone(),
            refresh_token: RwLock::new(refresh_token.into()),
        })
    }

    /// Provider described by the `auth` section, or `None` when refresh is not configured
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>> {
        let (Some(token_url), Some(refresh_token)) = (&config.token_url, &config.refresh_token)
        else {
            return Ok(None);
        };
        Self::new(token_url, config.client_id.clone(), refresh_token.clone(), config).map(Some)
    }
}

#[async_trait]
impl CredentialProvider for RefreshTokenProvider {
    async fn token(&self) -> Result<String> {
        let refresh_token = self.refresh_token.read().clone();
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", self.client_id.clone()),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(url = %self.token_url, status = %status, error = %error_text, "Token refresh rejected");
            return Err(AnalysisError::gateway(
                "refresh_credentials",
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| {
            AnalysisError::gateway("refresh_credentials", format!("Invalid token response: {e}"))
        })?;
        if let Some(rotated) = tokens.refresh_token {
            *self.refresh_token.write() = rotated;
        }
        debug!(url = %self.token_url, "Obtained fresh access token");
        Ok(tokens.access_token)
    }
}
