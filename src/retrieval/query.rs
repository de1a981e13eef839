//! Search requests, validated queries and cache fingerprints

use crate::config::SearchConfig;
use crate::error::{LeibnizError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque structured filters passed through to adapters.
///
/// A `BTreeMap` keeps the key order stable, which the fingerprint relies on.
pub type Filters = BTreeMap<String, String>;

/// A search request as it arrives from the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free query text (1-500 characters after trimming)
    pub text: String,

    /// Requested result count (1-100, default 20)
    #[serde(default)]
    pub limit: Option<usize>,

    /// Structured filters, e.g. `year_min = "2022"`
    #[serde(default)]
    pub filters: Filters,

    /// Fan-out deadline override in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Skip the cache lookup and force a fresh fan-out
    #[serde(default)]
    pub bypass_cache: bool,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Bounds applied while turning a request into a [`Query`]
#[derive(Debug, Clone)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_query_chars: usize,
    pub default_deadline: Duration,
    pub max_deadline: Duration,
    pub candidate_multiplier: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for QueryLimits {
    fn from(config: &SearchConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            max_query_chars: config.max_query_chars,
            default_deadline: Duration::from_millis(config.deadline_ms),
            max_deadline: Duration::from_millis(config.max_deadline_ms),
            candidate_multiplier: config.candidate_multiplier.max(1),
        }
    }
}

/// Stable cache key derived from a query's normalized text, limit and filters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn compute(normalized_text: &str, limit: usize, filters: &Filters) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"leibniz/query/v1\0");
        hasher.update(normalized_text.as_bytes());
        hasher.update(b"\0");
        hasher.update(&(limit as u64).to_le_bytes());
        for (key, value) in filters {
            // Length prefixes keep "a=bc" and "ab=c" apart
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable, validated search query
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    normalized: String,
    limit: usize,
    candidate_limit: usize,
    filters: Filters,
    deadline: Duration,
    bypass_cache: bool,
    fingerprint: Fingerprint,
}

impl Query {
    /// Validate a request against the configured limits.
    ///
    /// This is the only place a request can fail hard; it runs before any
    /// cache or backend work.
    pub fn parse(request: &SearchRequest, limits: &QueryLimits) -> Result<Self> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(LeibnizError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let chars = text.chars().count();
        if chars > limits.max_query_chars {
            return Err(LeibnizError::InvalidQuery(format!(
                "Query text is {} characters, maximum is {}",
                chars, limits.max_query_chars
            )));
        }

        let limit = request.limit.unwrap_or(limits.default_limit);
        if limit == 0 || limit > limits.max_limit {
            return Err(LeibnizError::InvalidQuery(format!(
                "Limit must be between 1 and {}, got {}",
                limits.max_limit, limit
            )));
        }

        let deadline = match request.deadline_ms {
            Some(0) => {
                return Err(LeibnizError::InvalidQuery(
                    "Deadline must be at least 1ms".to_string(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => limits.default_deadline,
        };
        if deadline > limits.max_deadline {
            return Err(LeibnizError::InvalidQuery(format!(
                "Deadline must be at most {}ms, got {}ms",
                limits.max_deadline.as_millis(),
                deadline.as_millis()
            )));
        }

        if request.filters.keys().any(|k| k.trim().is_empty()) {
            return Err(LeibnizError::InvalidQuery(
                "Filter keys cannot be empty".to_string(),
            ));
        }

        let normalized = normalize_text(text);
        let fingerprint = Fingerprint::compute(&normalized, limit, &request.filters);

        Ok(Self {
            text: text.to_string(),
            normalized,
            limit,
            candidate_limit: limit.saturating_mul(limits.candidate_multiplier),
            filters: request.filters.clone(),
            deadline,
            bypass_cache: request.bypass_cache,
            fingerprint,
        })
    }

    /// Shorthand for a query with default limits
    pub fn new(text: impl Into<String>, limit: usize) -> Result<Self> {
        Self::parse(
            &SearchRequest::new(text).with_limit(limit),
            &QueryLimits::default(),
        )
    }

    /// Trimmed query text as supplied
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lowercased, whitespace-collapsed text
    pub fn normalized_text(&self) -> &str {
        &self.normalized
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// How many candidates each adapter should return
    pub fn candidate_limit(&self) -> usize {
        self.candidate_limit
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn bypass_cache(&self) -> bool {
        self.bypass_cache
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Lowercase and collapse runs of whitespace into single spaces
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
