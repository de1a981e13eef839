//! End-to-end request handling: cache check, fan-out, fusion, write-back

use crate::cache::TwoTierCache;
use crate::config::{CacheConfig, Config};
use crate::error::{LeibnizError, Result};
use crate::retrieval::{
    fuse_outcomes, successful, FanOutCoordinator, FusedResult, FusionConfig, Query, QueryLimits,
    RetrievalAdapter, SearchRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Every backend answered
    Complete,
    /// At least one backend failed or timed out
    Degraded,
    /// Served from the cache without touching backends
    Cached,
    /// No backend answered and nothing was cached
    AllBackendsFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub request_id: Uuid,
    pub results: Vec<FusedResult>,
    pub elapsed_ms: u64,
    pub served_from_cache: bool,
    /// Backends with at least one document in `results`, sorted by name
    pub contributing_backends: Vec<String>,
    /// Backends that failed or timed out during this request's fan-out
    pub failed_backends: Vec<String>,
    pub status: ResponseStatus,
}

/// When and for how long fused lists are cached
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
    pub empty_ttl: Duration,
    pub cache_empty_results: bool,
}

impl CachePolicy {
    /// TTL for a fused list, or `None` if it should not be cached
    fn ttl_for(&self, results: &[FusedResult]) -> Option<Duration> {
        match (results.is_empty(), self.cache_empty_results) {
            (false, _) => Some(self.ttl),
            (true, true) => Some(self.empty_ttl),
            (true, false) => None,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_secs),
            empty_ttl: Duration::from_secs(config.empty_ttl_secs),
            cache_empty_results: config.cache_empty_results,
        }
    }
}

pub struct QueryOrchestrator {
    coordinator: FanOutCoordinator,
    cache: Option<Arc<TwoTierCache>>,
    fusion: FusionConfig,
    limits: QueryLimits,
    policy: CachePolicy,
}

impl QueryOrchestrator {
    /// Build an orchestrator over a fixed adapter set.
    ///
    /// Adapter names must be unique; they key the fusion weights and the
    /// response metadata.
    pub fn new(
        adapters: Vec<Arc<dyn RetrievalAdapter>>,
        cache: Option<Arc<TwoTierCache>>,
        fusion: FusionConfig,
        limits: QueryLimits,
        policy: CachePolicy,
    ) -> Result<Self> {
        if adapters.is_empty() {
            return Err(LeibnizError::Config(
                "At least one retrieval adapter is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for adapter in &adapters {
            if !seen.insert(adapter.name().to_string()) {
                return Err(LeibnizError::Config(format!(
                    "Duplicate adapter name: {}",
                    adapter.name()
                )));
            }
        }

        Ok(Self {
            coordinator: FanOutCoordinator::new(adapters),
            cache,
            fusion,
            limits,
            policy,
        })
    }

    /// Build an orchestrator using the search, fusion and cache sections of `config`
    pub fn from_config(
        config: &Config,
        adapters: Vec<Arc<dyn RetrievalAdapter>>,
        cache: Option<Arc<TwoTierCache>>,
    ) -> Result<Self> {
        let fusion = FusionConfig::from_settings(&config.fusion)
            .map_err(|e| LeibnizError::Config(e.to_string()))?;
        Self::new(
            adapters,
            cache,
            fusion,
            QueryLimits::from(&config.search),
            CachePolicy::from(&config.cache),
        )
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.coordinator.adapter_names()
    }

    fn cache(&self) -> Option<&TwoTierCache> {
        if self.policy.enabled {
            self.cache.as_deref()
        } else {
            None
        }
    }

    /// Answer one search request.
    ///
    /// Only a malformed request is an error. Backend failures reduce the
    /// set of contributing backends; if none answer, the response carries
    /// [`ResponseStatus::AllBackendsFailed`] with an empty result list.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let query = Arc::new(Query::parse(request, &self.limits)?);
        let fingerprint = query.fingerprint().clone();

        tracing::debug!(%request_id, fingerprint = %fingerprint, "stage: cache check");
        if !query.bypass_cache() {
            if let Some(cache) = self.cache() {
                if let Some(results) = cache.get(&fingerprint).await {
                    let response =
                        cached_response(request_id, results, Vec::new(), started.elapsed());
                    tracing::info!(
                        %request_id,
                        hits = response.results.len(),
                        elapsed_ms = response.elapsed_ms,
                        "served from cache"
                    );
                    return Ok(response);
                }
            }
        }

        let deadline_ms = query.deadline().as_millis() as u64;
        tracing::debug!(%request_id, deadline_ms, "stage: fan-out");
        let outcomes = self
            .coordinator
            .fan_out(Arc::clone(&query), query.deadline())
            .await;

        let failed_backends: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.backend.clone())
            .collect();

        if successful(&outcomes).is_empty() {
            // Bypassed lookups fall back to the cache once nothing answered
            if query.bypass_cache() {
                if let Some(cache) = self.cache() {
                    if let Some(results) = cache.get(&fingerprint).await {
                        tracing::warn!(%request_id, "all backends failed, serving cached results");
                        return Ok(cached_response(
                            request_id,
                            results,
                            failed_backends,
                            started.elapsed(),
                        ));
                    }
                }
            }

            tracing::warn!(%request_id, failed = ?failed_backends, "all backends failed");
            return Ok(SearchResponse {
                request_id,
                results: Vec::new(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                served_from_cache: false,
                contributing_backends: Vec::new(),
                failed_backends,
                status: ResponseStatus::AllBackendsFailed,
            });
        }

        tracing::debug!(%request_id, "stage: fuse");
        let results = fuse_outcomes(&outcomes, query.limit(), &self.fusion);

        tracing::debug!(%request_id, "stage: cache write");
        if let Some(cache) = self.cache() {
            if let Some(ttl) = self.policy.ttl_for(&results) {
                cache.put(&fingerprint, results.clone(), ttl);
            }
        }

        let status = if failed_backends.is_empty() {
            ResponseStatus::Complete
        } else {
            ResponseStatus::Degraded
        };
        let response = SearchResponse {
            request_id,
            contributing_backends: contributing(&results),
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
            served_from_cache: false,
            failed_backends,
            status,
        };

        tracing::info!(
            %request_id,
            hits = response.results.len(),
            backends = ?response.contributing_backends,
            elapsed_ms = response.elapsed_ms,
            "search complete"
        );
        Ok(response)
    }
}

fn cached_response(
    request_id: Uuid,
    results: Vec<FusedResult>,
    failed_backends: Vec<String>,
    elapsed: Duration,
) -> SearchResponse {
    SearchResponse {
        request_id,
        contributing_backends: contributing(&results),
        results,
        elapsed_ms: elapsed.as_millis() as u64,
        served_from_cache: true,
        failed_backends,
        status: ResponseStatus::Cached,
    }
}

fn contributing(results: &[FusedResult]) -> Vec<String> {
    results
        .iter()
        .flat_map(|r| r.backends.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
