use crate::config::Config;
use crate::error::{RankmixError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_scoring(config, &mut errors);
        Self::validate_reranker(config, &mut errors);
        Self::validate_cache(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RankmixError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.dense_top_k == 0 && retrieval.bm25_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.dense_top_k",
                "At least one backend must request results",
            ));
        }

        if !(retrieval.rrf_k.is_finite() && retrieval.rrf_k >= 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be a non-negative number, got {}", retrieval.rrf_k),
            ));
        }

        if retrieval.final_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.final_top_k",
                "Final top k must be greater than 0",
            ));
        }

        if retrieval.timeout_ms == Some(0) {
            errors.push(ValidationError::new(
                "retrieval.timeout_ms",
                "Timeout must be greater than 0 when set",
            ));
        }
    }

    fn validate_scoring(config: &Config, errors: &mut Vec<ValidationError>) {
        let scoring = &config.scoring;
        let weights = [
            ("scoring.cross_encoder_weight", scoring.cross_encoder_weight),
            ("scoring.base_retrieval_weight", scoring.base_retrieval_weight),
            ("scoring.freshness_weight", scoring.freshness_weight),
            ("scoring.credibility_weight", scoring.credibility_weight),
        ];

        for (path, weight) in weights {
            if !(weight.is_finite() && weight >= 0.0) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }

        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total.is_finite() && (total - 1.0).abs() > 0.01 {
            // Not fatal: the weights are a coupled set and may be tuned on purpose
            tracing::warn!(
                "Scoring weights sum to {:.3}; they are tuned as a set against the reranker scale",
                total
            );
        }

        if !(scoring.freshness_tau_days.is_finite() && scoring.freshness_tau_days > 0.0) {
            errors.push(ValidationError::new(
                "scoring.freshness_tau_days",
                format!(
                    "Freshness tau must be greater than 0, got {}",
                    scoring.freshness_tau_days
                ),
            ));
        }

        if !(0.0..=1.0).contains(&scoring.dedup_threshold) {
            errors.push(ValidationError::new(
                "scoring.dedup_threshold",
                format!(
                    "Dedup threshold must be between 0.0 and 1.0, got {}",
                    scoring.dedup_threshold
                ),
            ));
        }
    }

    fn validate_reranker(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.reranker.model.is_empty() {
            errors.push(ValidationError::new(
                "reranker.model",
                "Model name cannot be empty",
            ));
        }

        if config.reranker.batch_size == 0 {
            errors.push(ValidationError::new(
                "reranker.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.reranker.top_k == 0 {
            errors.push(ValidationError::new(
                "reranker.top_k",
                "Top k must be greater than 0",
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.query_ttl_seconds == 0 {
            errors.push(ValidationError::new(
                "cache.query_ttl_seconds",
                "TTL must be greater than 0",
            ));
        }

        if config.cache.rerank_ttl_seconds == 0 {
            errors.push(ValidationError::new(
                "cache.rerank_ttl_seconds",
                "TTL must be greater than 0",
            ));
        }

        if config.cache.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "cache.path",
                "Cache path cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_negative_weight() {
        let mut config = Config::default();
        config.scoring.cross_encoder_weight = -0.1;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_unbalanced_weights_are_allowed() {
        let mut config = Config::default();
        config.scoring.cross_encoder_weight = 0.9;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = Config::default();
        config.scoring.dedup_threshold = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.retrieval.final_top_k = 0;
        config.reranker.top_k = 0;
        config.cache.query_ttl_seconds = 0;

        match ConfigValidator::validate(&config) {
            Err(RankmixError::ConfigValidation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }
}
