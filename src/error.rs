use crate::backends::SearchError;
use crate::retrieval::RerankError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rankmix
#[derive(Error, Debug)]
pub enum RankmixError {
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

    /// Database errors (SQLite cache store)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Both search backends failed for the same query
    #[error("All search backends unavailable (dense: {dense}; keyword: {keyword})")]
    BackendsUnavailable {
        dense: SearchError,
        keyword: SearchError,
    },

    /// The cross-encoder could not score the candidates
    #[error("Reranking failed: {0}")]
    Rerank(#[from] RerankError),

    /// The caller cancelled the retrieval
    #[error("Retrieval cancelled")]
    Cancelled,

    /// The retrieval did not finish before its deadline
    #[error("Retrieval exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

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

/// Result type for rankmix operations
pub type Result<T> = std::result::Result<T, RankmixError>;
