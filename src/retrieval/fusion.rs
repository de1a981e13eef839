//! Score fusion for combining result lists from several backends

use crate::config::FusionSettings;
use crate::retrieval::{deduplicate_results, BackendOutcome, RetrievalResult};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight for {backend}: weights must be positive")]
    InvalidWeight { backend: String },

    #[error("Invalid RRF K constant: must be positive")]
    InvalidRrfK,

    #[error("Unknown fusion method: {0}")]
    UnknownMethod(String),
}

/// How each backend's raw scores become per-backend relevance in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMethod {
    /// Divide by the backend's maximum score in the current response
    Weighted,
    /// Reciprocal rank `1 / (k + rank)`, scaled so rank one scores 1.0
    ReciprocalRank { k: f32 },
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    method: FusionMethod,
    weights: BTreeMap<String, f32>,
    default_weight: f32,
}

impl FusionConfig {
    pub fn new(
        method: FusionMethod,
        weights: BTreeMap<String, f32>,
        default_weight: f32,
    ) -> Result<Self, FusionError> {
        if let FusionMethod::ReciprocalRank { k } = method {
            if !k.is_finite() || k <= 0.0 {
                return Err(FusionError::InvalidRrfK);
            }
        }

        if !default_weight.is_finite() || default_weight <= 0.0 {
            return Err(FusionError::InvalidWeight {
                backend: "<default>".to_string(),
            });
        }

        if let Some((backend, _)) = weights.iter().find(|(_, w)| !w.is_finite() || **w <= 0.0) {
            return Err(FusionError::InvalidWeight {
                backend: backend.clone(),
            });
        }

        Ok(Self {
            method,
            weights,
            default_weight,
        })
    }

    pub fn from_settings(settings: &FusionSettings) -> Result<Self, FusionError> {
        let method = match settings.method.as_str() {
            "weighted" => FusionMethod::Weighted,
            "reciprocal_rank" => FusionMethod::ReciprocalRank { k: settings.rrf_k },
            other => return Err(FusionError::UnknownMethod(other.to_string())),
        };
        Self::new(method, settings.weights.clone(), settings.default_weight)
    }

    pub fn method(&self) -> FusionMethod {
        self.method
    }

    /// Weight of a backend, falling back to the default weight
    pub fn weight_for(&self, backend: &str) -> f32 {
        self.weights
            .get(backend)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        let settings = FusionSettings::default();
        Self {
            method: FusionMethod::Weighted,
            weights: settings.weights,
            default_weight: settings.default_weight,
        }
    }
}

/// A ranked, deduplicated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub doc_id: String,

    /// Fused relevance in [0, 1]
    pub score: f32,

    /// Backends that returned this document
    pub backends: BTreeSet<String>,

    /// Excerpt from the highest-weighted contributing backend that had one
    pub excerpt: Option<String>,
}

#[derive(Default)]
struct Group {
    weighted_sum: f32,
    backends: BTreeSet<String>,
    excerpt: Option<(f32, String)>,
}

/// Fuse backend outcomes into one ranked list
///
/// Failed outcomes and empty result lists contribute nothing. Each
/// surviving backend's scores are normalized independently, then combined
/// per document as a weighted sum over the contributing backends, divided by
/// the total weight of the surviving backends. Documents found by several
/// backends therefore accumulate a higher score.
///
/// Ordering is score descending, then number of contributing backends
/// descending, then document id ascending.
pub fn fuse_outcomes(
    outcomes: &[BackendOutcome],
    limit: usize,
    config: &FusionConfig,
) -> Vec<FusedResult> {
    let mut surviving: Vec<(&str, Vec<RetrievalResult>)> = outcomes
        .iter()
        .filter_map(|outcome| {
            let results = outcome.results()?;
            let deduped = deduplicate_results(results);
            (!deduped.is_empty()).then(|| (outcome.backend.as_str(), deduped))
        })
        .collect();

    if surviving.is_empty() || limit == 0 {
        return Vec::new();
    }

    // Fixed accumulation order keeps float sums reproducible
    surviving.sort_by(|a, b| a.0.cmp(b.0));

    let total_weight: f32 = surviving
        .iter()
        .map(|(backend, _)| config.weight_for(backend))
        .sum();

    let mut groups: HashMap<String, Group> = HashMap::new();
    for (backend, results) in &surviving {
        let weight = config.weight_for(backend);
        for (doc_id, relevance, excerpt) in normalize(results, config.method) {
            let group = groups.entry(doc_id.to_string()).or_default();
            group.weighted_sum += weight * relevance;
            group.backends.insert(backend.to_string());

            if let Some(text) = excerpt {
                let better = match &group.excerpt {
                    Some((held, _)) => weight > *held,
                    None => true,
                };
                if better {
                    group.excerpt = Some((weight, text.to_string()));
                }
            }
        }
    }

    let mut fused: Vec<FusedResult> = groups
        .into_iter()
        .map(|(doc_id, group)| FusedResult {
            doc_id,
            score: (group.weighted_sum / total_weight).clamp(0.0, 1.0),
            backends: group.backends,
            excerpt: group.excerpt.map(|(_, text)| text),
        })
        .collect();

    fused.sort_by(compare_fused);
    fused.truncate(limit);
    fused
}

/// Total order used for fused results
pub fn compare_fused(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.backends.len().cmp(&a.backends.len()))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Per-backend relevance in [0, 1] for each result
fn normalize(results: &[RetrievalResult], method: FusionMethod) -> Vec<(&str, f32, Option<&str>)> {
    match method {
        FusionMethod::Weighted => {
            let max = results.iter().map(|r| r.score).fold(0.0f32, f32::max);
            results
                .iter()
                .map(|r| {
                    // A zero maximum carries no ranking signal, so all results tie at 1.0
                    let relevance = if max > 0.0 { r.score / max } else { 1.0 };
                    (r.doc_id.as_str(), relevance, r.excerpt.as_deref())
                })
                .collect()
        }
        FusionMethod::ReciprocalRank { k } => {
            let mut ranked: Vec<&RetrievalResult> = results.iter().collect();
            ranked.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.doc_id.cmp(&b.doc_id))
            });
            ranked
                .into_iter()
                .enumerate()
                .map(|(rank, r)| {
                    let relevance = (k + 1.0) / (k + rank as f32 + 1.0);
                    (r.doc_id.as_str(), relevance, r.excerpt.as_deref())
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::AdapterError;
    use std::time::Duration;

    fn outcome(backend: &str, hits: &[(&str, f32)]) -> BackendOutcome {
        BackendOutcome {
            backend: backend.to_string(),
            result: Ok(hits
                .iter()
                .map(|(id, score)| RetrievalResult::new(*id, *score))
                .collect()),
            elapsed: Duration::from_millis(1),
        }
    }

    fn failed(backend: &str) -> BackendOutcome {
        BackendOutcome {
            backend: backend.to_string(),
            result: Err(AdapterError::timeout(backend, Duration::from_millis(200))),
            elapsed: Duration::from_millis(200),
        }
    }

    fn equal_weights(names: &[&str]) -> FusionConfig {
        let weights = names.iter().map(|n| (n.to_string(), 1.0)).collect();
        FusionConfig::new(FusionMethod::Weighted, weights, 1.0).unwrap()
    }

    #[test]
    fn test_normalizes_by_backend_maximum() {
        let outcomes = vec![outcome("x", &[("a", 10.0), ("b", 5.0)])];
        let fused = fuse_outcomes(&outcomes, 10, &equal_weights(&["x"]));

        assert_eq!(fused[0].doc_id, "a");
        assert_eq!(fused[0].score, 1.0);
        assert_eq!(fused[1].score, 0.5);
    }

    #[test]
    fn test_identical_scores_normalize_to_one() {
        let outcomes = vec![
            outcome("x", &[("a", 3.0), ("b", 3.0)]),
            outcome("y", &[("c", 0.0)]),
        ];
        let fused = fuse_outcomes(&outcomes, 10, &equal_weights(&["x", "y"]));

        // Every document has relevance 1.0 in its own backend
        assert!(fused.iter().all(|f| (f.score - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_failed_and_empty_backends_contribute_nothing() {
        let outcomes = vec![outcome("x", &[("a", 2.0)]), outcome("y", &[]), failed("z")];
        let fused = fuse_outcomes(&outcomes, 10, &equal_weights(&["x", "y", "z"]));

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].score, 1.0);
        assert_eq!(fused[0].backends.len(), 1);
    }

    #[test]
    fn test_all_failed_yields_empty() {
        let outcomes = vec![failed("x"), failed("y")];
        assert!(fuse_outcomes(&outcomes, 10, &FusionConfig::default()).is_empty());
    }

    #[test]
    fn test_corroborated_document_ranks_higher() {
        let outcomes = vec![
            outcome("x", &[("solo", 1.0), ("both", 0.8)]),
            outcome("y", &[("both", 1.0), ("other", 0.9)]),
        ];
        let fused = fuse_outcomes(&outcomes, 10, &equal_weights(&["x", "y"]));

        assert_eq!(fused[0].doc_id, "both");
        assert_eq!(fused[0].backends.len(), 2);
    }

    #[test]
    fn test_tie_break_by_backend_count_then_id() {
        let outcomes = vec![
            outcome("x", &[("b", 1.0), ("z", 0.5)]),
            outcome("y", &[("c", 1.0), ("z", 0.5)]),
        ];
        let fused = fuse_outcomes(&outcomes, 10, &equal_weights(&["x", "y"]));

        let ids: Vec<&str> = fused.iter().map(|f| f.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "b", "c"]);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let outcomes = vec![
            outcome("vector", &[("p1", 0.9), ("p2", 0.9), ("p3", 0.4)]),
            outcome("keyword", &[("p4", 7.0), ("p2", 7.0), ("p5", 7.0)]),
            outcome("graph", &[("p6", 1.0), ("p1", 0.5)]),
        ];
        let config = FusionConfig::default();
        let first = fuse_outcomes(&outcomes, 20, &config);

        for _ in 0..20 {
            assert_eq!(fuse_outcomes(&outcomes, 20, &config), first);
        }
    }

    #[test]
    fn test_document_ids_are_unique() {
        let outcomes = vec![
            outcome("x", &[("a", 1.0), ("a", 0.2), (" b", 0.3)]),
            outcome("y", &[("b", 1.0), ("a", 0.1)]),
        ];
        let fused = fuse_outcomes(&outcomes, 10, &equal_weights(&["x", "y"]));

        let ids: BTreeSet<&str> = fused.iter().map(|f| f.doc_id.as_str()).collect();
        assert_eq!(ids.len(), fused.len());
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_truncates_to_limit() {
        let hits: Vec<(String, f32)> = (0..30)
            .map(|i| (format!("p{:02}", i), i as f32))
            .collect();
        let hits: Vec<(&str, f32)> = hits.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let fused = fuse_outcomes(&[outcome("x", &hits)], 5, &equal_weights(&["x"]));

        assert_eq!(fused.len(), 5);
        assert_eq!(fused[0].doc_id, "p29");
    }

    #[test]
    fn test_excerpt_from_highest_weighted_backend() {
        let heavy = BackendOutcome {
            backend: "vector".to_string(),
            result: Ok(vec![RetrievalResult::new("p1", 1.0).with_excerpt("from vector")]),
            elapsed: Duration::from_millis(1),
        };
        let light = BackendOutcome {
            backend: "keyword".to_string(),
            result: Ok(vec![RetrievalResult::new("p1", 1.0).with_excerpt("from keyword")]),
            elapsed: Duration::from_millis(1),
        };
        let bare = BackendOutcome {
            backend: "graph".to_string(),
            result: Ok(vec![RetrievalResult::new("p1", 1.0)]),
            elapsed: Duration::from_millis(1),
        };

        let fused = fuse_outcomes(&[light, bare, heavy], 10, &FusionConfig::default());
        assert_eq!(fused[0].excerpt.as_deref(), Some("from vector"));
    }

    #[test]
    fn test_reciprocal_rank_method() {
        let weights = [("x".to_string(), 1.0)].into_iter().collect();
        let config =
            FusionConfig::new(FusionMethod::ReciprocalRank { k: 60.0 }, weights, 1.0).unwrap();
        let outcomes = vec![outcome("x", &[("a", 0.2), ("b", 0.9)])];

        let fused = fuse_outcomes(&outcomes, 10, &config);
        assert_eq!(fused[0].doc_id, "b");
        assert_eq!(fused[0].score, 1.0);
        assert!((fused[1].score - 61.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_non_positive_weights() {
        let weights = [("x".to_string(), 0.0)].into_iter().collect();
        assert!(FusionConfig::new(FusionMethod::Weighted, weights, 1.0).is_err());
        assert!(FusionConfig::new(FusionMethod::Weighted, BTreeMap::new(), -1.0).is_err());
        let rrf = FusionMethod::ReciprocalRank { k: 0.0 };
        assert!(FusionConfig::new(rrf, BTreeMap::new(), 1.0).is_err());
    }
}
