//! Configuration management for rankmix
//!
//! Loads the TOML configuration, applies `RANKMIX_SECTION__KEY` environment
//! overrides and validates the result before any component is built from it.

use crate::error::{RankmixError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
    pub reranker: RerankerConfig,
    pub cache: CacheConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Candidate generation and fusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hits requested from the dense backend
    pub dense_top_k: usize,
    /// Hits requested from the keyword backend
    pub bm25_top_k: usize,
    /// RRF smoothing constant
    pub rrf_k: f64,
    /// Candidates kept after fusion
    pub final_top_k: usize,
    /// Optional deadline for a whole retrieval call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_top_k: 50,
            bm25_top_k: 50,
            rrf_k: 60.0,
            final_top_k: 50,
            timeout_ms: None,
        }
    }
}

/// Final score blending settings
///
/// The four weights are tuned against each other: the cross-encoder output is
/// unbounded while RRF scores sit near [0, 0.03] for `rrf_k = 60`. Changing one
/// weight without re-tuning the others changes which signal dominates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub cross_encoder_weight: f64,
    pub base_retrieval_weight: f64,
    pub freshness_weight: f64,
    pub credibility_weight: f64,
    /// Decay constant for freshness, in days
    pub freshness_tau_days: f64,
    /// Jaccard similarity above which two results are near-duplicates
    pub dedup_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cross_encoder_weight: 0.55,
            base_retrieval_weight: 0.25,
            freshness_weight: 0.12,
            credibility_weight: 0.08,
            freshness_tau_days: 30.0,
            dedup_threshold: 0.9,
        }
    }
}

/// Cross-encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub model: String,
    pub batch_size: usize,
    /// Result size used when a caller does not ask for one
    pub top_k: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: "BAAI/bge-reranker-base".to_string(),
            batch_size: 32,
            top_k: 24,
        }
    }
}

/// Which cache store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
    Disabled,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(format!(
                "Cache backend must be 'memory', 'sqlite' or 'disabled', got '{}'",
                other
            )),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// SQLite database file (sqlite backend only)
    pub path: PathBuf,
    /// TTL of whole-query result lists
    pub query_ttl_seconds: u64,
    /// TTL of per-(document, query) rerank scores
    pub rerank_ttl_seconds: u64,
    /// Values at least this large are zstd-compressed (sqlite backend only)
    pub compression_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: PathBuf::from("~/.rankmix/cache.sqlite"),
            query_ttl_seconds: 3600,
            rerank_ttl_seconds: 3600,
            compression_threshold: 1024,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RankmixError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RankmixError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RankmixError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RANKMIX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RANKMIX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "RETRIEVAL__DENSE_TOP_K" => self.retrieval.dense_top_k = parse_value(path, value)?,
            "RETRIEVAL__BM25_TOP_K" => self.retrieval.bm25_top_k = parse_value(path, value)?,
            "RETRIEVAL__RRF_K" => self.retrieval.rrf_k = parse_value(path, value)?,
            "RETRIEVAL__FINAL_TOP_K" => self.retrieval.final_top_k = parse_value(path, value)?,
            "RETRIEVAL__TIMEOUT_MS" => {
                self.retrieval.timeout_ms = Some(parse_value(path, value)?);
            }
            "RERANKER__MODEL" => {
                self.reranker.model = value.to_string();
            }
            "RERANKER__TOP_K" => self.reranker.top_k = parse_value(path, value)?,
            "RERANKER__BATCH_SIZE" => self.reranker.batch_size = parse_value(path, value)?,
            "CACHE__BACKEND" => self.cache.backend = parse_value(path, value)?,
            "CACHE__PATH" => {
                self.cache.path = PathBuf::from(value);
            }
            "CACHE__QUERY_TTL_SECONDS" => {
                self.cache.query_ttl_seconds = parse_value(path, value)?;
            }
            "CACHE__RERANK_TTL_SECONDS" => {
                self.cache.rerank_ttl_seconds = parse_value(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RankmixError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("rankmix").join("config.toml"))
    }
}

fn parse_value<T>(path: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    value.parse().map_err(|_| RankmixError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().ok_or_else(|| {
                RankmixError::Config("Cannot determine home directory".to_string())
            })?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}
