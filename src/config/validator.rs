use crate::config::Config;
use crate::error::{LeibnizError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_backends(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LeibnizError::ConfigValidation { errors })
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

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if search.max_limit == 0 {
            errors.push(ValidationError::new(
                "search.max_limit",
                "Max limit must be greater than 0",
            ));
        }

        if search.default_limit == 0 || search.default_limit > search.max_limit {
            errors.push(ValidationError::new(
                "search.default_limit",
                format!(
                    "Default limit must be between 1 and max_limit ({}), got {}",
                    search.max_limit, search.default_limit
                ),
            ));
        }

        if search.max_query_chars == 0 {
            errors.push(ValidationError::new(
                "search.max_query_chars",
                "Max query length must be greater than 0",
            ));
        }

        if search.deadline_ms == 0 || search.deadline_ms > search.max_deadline_ms {
            errors.push(ValidationError::new(
                "search.deadline_ms",
                format!(
                    "Deadline must be between 1 and max_deadline_ms ({}), got {}",
                    search.max_deadline_ms, search.deadline_ms
                ),
            ));
        }

        // An adapter may never outlive the fan-out that awaits it
        if search.backend_timeout_ms == 0 || search.backend_timeout_ms > search.deadline_ms {
            errors.push(ValidationError::new(
                "search.backend_timeout_ms",
                format!(
                    "Backend timeout must be between 1 and deadline_ms ({}), got {}",
                    search.deadline_ms, search.backend_timeout_ms
                ),
            ));
        }

        if search.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "search.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let fusion = &config.fusion;

        let valid_methods = ["weighted", "reciprocal_rank"];
        if !valid_methods.contains(&fusion.method.as_str()) {
            errors.push(ValidationError::new(
                "fusion.method",
                format!(
                    "Method must be one of {:?}, got '{}'",
                    valid_methods, fusion.method
                ),
            ));
        }

        if fusion.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                "RRF K must be greater than 0",
            ));
        }

        if fusion.default_weight <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.default_weight",
                "Default weight must be positive",
            ));
        }

        for (backend, weight) in &fusion.weights {
            if !weight.is_finite() || *weight <= 0.0 {
                errors.push(ValidationError::new(
                    format!("fusion.weights.{}", backend),
                    format!("Weight must be positive, got {}", weight),
                ));
            }
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        let cache = &config.cache;

        let valid_shared = ["sqlite", "memory", "none"];
        if !valid_shared.contains(&cache.shared.as_str()) {
            errors.push(ValidationError::new(
                "cache.shared",
                format!(
                    "Shared tier must be one of {:?}, got '{}'",
                    valid_shared, cache.shared
                ),
            ));
        }

        if cache.enabled && cache.local_capacity == 0 {
            errors.push(ValidationError::new(
                "cache.local_capacity",
                "Local capacity must be greater than 0",
            ));
        }

        if cache.ttl_secs == 0 {
            errors.push(ValidationError::new(
                "cache.ttl_secs",
                "TTL must be greater than 0",
            ));
        }

        if cache.cache_empty_results && cache.empty_ttl_secs == 0 {
            errors.push(ValidationError::new(
                "cache.empty_ttl_secs",
                "Empty-result TTL must be greater than 0 when empty results are cached",
            ));
        }

        if cache.shared_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "cache.shared_timeout_ms",
                "Shared tier timeout must be greater than 0",
            ));
        }
    }

    fn validate_backends(config: &Config, errors: &mut Vec<ValidationError>) {
        let backends = &config.backends;

        if !backends.vector && !backends.graph && !backends.keyword {
            errors.push(ValidationError::new(
                "backends",
                "At least one backend must be enabled",
            ));
        }

        if backends.vector_dim == 0 {
            errors.push(ValidationError::new(
                "backends.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if backends.hnsw_m == 0
            || backends.hnsw_ef_construction == 0
            || backends.hnsw_ef_search == 0
        {
            errors.push(ValidationError::new(
                "backends.hnsw",
                "HNSW parameters must be greater than 0",
            ));
        }

        let decay = backends.graph_hop_decay;
        if decay.is_nan() || decay <= 0.0 || decay > 1.0 {
            errors.push(ValidationError::new(
                "backends.graph_hop_decay",
                format!("Hop decay must be in (0, 1], got {}", decay),
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
    fn test_backend_timeout_exceeding_deadline() {
        let mut config = Config::default();
        config.search.backend_timeout_ms = config.search.deadline_ms + 1;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_method() {
        let mut config = Config::default();
        config.fusion.method = "borda".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_violation() {
        let mut config = Config::default();
        config.fusion.weights.insert("graph".to_string(), 0.0);
        config.cache.shared = "redis".to_string();
        config.backends.vector = false;
        config.backends.graph = false;
        config.backends.keyword = false;

        match ConfigValidator::validate(&config) {
            Err(LeibnizError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert!(paths.contains(&"fusion.weights.graph"));
                assert!(paths.contains(&"cache.shared"));
                assert!(paths.contains(&"backends"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
