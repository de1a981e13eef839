//! Per-backend deduplication by canonical document identifier

use crate::retrieval::RetrievalResult;
use ahash::{HashMap, HashMapExt};

/// Canonical form of a document identifier
pub fn canonical_doc_id(id: &str) -> &str {
    id.trim()
}

/// Deduplicate one backend's results by document id, keeping the
/// highest-scored instance.
///
/// Identifiers are canonicalized, blank identifiers are dropped and
/// non-finite or negative scores are clamped to zero. First-seen order is
/// preserved.
pub fn deduplicate_results(results: &[RetrievalResult]) -> Vec<RetrievalResult> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(results.len());
    let mut unique: Vec<RetrievalResult> = Vec::with_capacity(results.len());

    for result in results {
        let id = canonical_doc_id(&result.doc_id);
        if id.is_empty() {
            continue;
        }

        let score = if result.score.is_finite() {
            result.score.max(0.0)
        } else {
            0.0
        };

        match positions.get(id) {
            Some(&pos) => {
                if score > unique[pos].score {
                    unique[pos].score = score;
                    if result.excerpt.is_some() {
                        unique[pos].excerpt = result.excerpt.clone();
                    }
                }
            }
            None => {
                positions.insert(id.to_string(), unique.len());
                unique.push(RetrievalResult {
                    doc_id: id.to_string(),
                    score,
                    excerpt: result.excerpt.clone(),
                });
            }
        }
    }

    unique
}
