//! Configuration Error Types
//!
//! Errors raised while loading and validating [`AnalysisConfig`](super::AnalysisConfig).

use crate::error::AnalysisError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A configuration source could not be read or parsed
    #[error("Failed to load configuration from {sources:?}: {error}")]
    LoadError { sources: Vec<PathBuf>, error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

impl From<ConfigurationError> for AnalysisError {
    fn from(error: ConfigurationError) -> Self {
        AnalysisError::Configuration(error.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
