//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles file discovery,
//! environment detection and layering of defaults, files and environment
//! variables through the `config` crate.

use super::error::{ConfigResult, ConfigurationError};
use super::AnalysisConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "fedstat";
const ENV_PREFIX: &str = "FEDSTAT";

pub struct ConfigManager {
    config: AnalysisConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let environment_file =
            config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let sources = vec![base_file.clone(), environment_file.clone()];
        let load_error = |error: config::ConfigError| ConfigurationError::LoadError {
            sources: sources.clone(),
            error: error.to_string(),
        };

        let config: AnalysisConfig = Config::builder()
            .add_source(Config::try_from(&AnalysisConfig::default()).map_err(load_error)?)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(environment_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_error)?
            .try_deserialize()
            .map_err(load_error)?;

        config.validate()?;

        info!(
            environment = %environment,
            polling_interval_ms = config.polling.interval_ms,
            polling_timeout_ms = config.polling.timeout_ms,
            job_gateway = %config.job_gateway.base_url,
            result_store = %config.result_store.endpoint,
            default_sites = config.analysis.sites.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: AnalysisConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked, safe to log
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        sanitize_json_recursive(&mut value, &["token", "secret", "password", "credential"]);
        value
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("FEDSTAT_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("FEDSTAT_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    if !val.is_null() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    }
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}
