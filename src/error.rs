use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Leibniz
#[derive(Error, Debug)]
pub enum LeibnizError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Malformed search request, rejected before any backend work
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A reference backend could not be built
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Leibniz operations
pub type Result<T> = std::result::Result<T, LeibnizError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_index_build_context_is_kept() {
        let failed: anyhow::Result<()> =
            Err(anyhow::anyhow!("disk full")).context("Failed to commit keyword index");
        let err: LeibnizError = failed.unwrap_err().into();

        assert!(matches!(err, LeibnizError::Other(_)));
        assert_eq!(err.to_string(), "Failed to commit keyword index");
        assert_eq!(
            format!("{:#}", err),
            "Failed to commit keyword index: disk full"
        );
    }
}
