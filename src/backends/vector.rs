//! Dense-vector similarity backend over an HNSW index

use crate::backends::{
    run_blocking, Cancellation, Corpus, EmbeddingError, EmbeddingProvider, PaperFilter,
};
use crate::config::BackendsConfig;
use crate::error::{LeibnizError, Result};
use crate::retrieval::{AdapterError, Query, RetrievalAdapter, RetrievalResult};
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::sync::Arc;

const NAME: &str = "vector";
const MAX_LAYERS: usize = 16;

pub struct VectorAdapter {
    index: Arc<VectorIndex>,
}

struct VectorIndex {
    corpus: Arc<Corpus>,
    embedder: Arc<dyn EmbeddingProvider>,
    hnsw: Hnsw<'static, f32, DistCosine>,
    indexed: usize,
    ef_search: usize,
}

impl VectorAdapter {
    /// Embed every paper and insert it into a fresh index.
    ///
    /// Papers whose text embeds to the zero vector have no direction and are
    /// left out of the index.
    pub fn build(
        corpus: Arc<Corpus>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &BackendsConfig,
    ) -> Result<Self> {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            config.hnsw_m,
            corpus.len().max(1),
            MAX_LAYERS,
            config.hnsw_ef_construction,
            DistCosine,
        );

        let texts: Vec<String> = corpus
            .papers()
            .iter()
            .map(|p| p.searchable_text())
            .collect();
        let vectors = embedder
            .embed_batch(&texts)
            .map_err(|e| LeibnizError::Backend(format!("Embedding failed: {}", e)))?;

        let mut indexed = 0;
        for (pos, data) in vectors.iter().enumerate() {
            if data.len() != embedder.dimension() {
                return Err(LeibnizError::Backend(
                    EmbeddingError::DimensionMismatch {
                        expected: embedder.dimension(),
                        actual: data.len(),
                    }
                    .to_string(),
                ));
            }
            if data.iter().all(|v| *v == 0.0) {
                continue;
            }
            hnsw.insert((data.as_slice(), pos));
            indexed += 1;
        }

        tracing::debug!(
            model = embedder.model_name(),
            dimension = embedder.dimension(),
            "Indexed {} of {} papers",
            indexed,
            corpus.len()
        );

        Ok(Self {
            index: Arc::new(VectorIndex {
                corpus,
                embedder,
                hnsw,
                indexed,
                ef_search: config.hnsw_ef_search,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.index.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.index.indexed == 0
    }
}

impl VectorIndex {
    fn nearest(
        &self,
        query: &Query,
        filter: &PaperFilter,
        cancel: &Cancellation,
    ) -> std::result::Result<Vec<RetrievalResult>, AdapterError> {
        if self.indexed == 0 {
            return Ok(Vec::new());
        }

        let embedding = self
            .embedder
            .embed(query.text())
            .map_err(|e| AdapterError::backend(NAME, e))?;
        if embedding.iter().all(|v| *v == 0.0) {
            return Ok(Vec::new());
        }
        cancel.check(NAME)?;

        // Filtering happens after the graph search, so widen it when filters apply
        let k = if filter.is_empty() {
            query.candidate_limit().min(self.indexed)
        } else {
            self.indexed
        };
        let ef = self.ef_search.max(k);
        let neighbours = self.hnsw.search(&embedding, k, ef);
        cancel.check(NAME)?;

        let mut results: Vec<RetrievalResult> = neighbours
            .into_iter()
            .filter_map(|neighbour| {
                let paper = self.corpus.papers().get(neighbour.d_id)?;
                let similarity = 1.0 - neighbour.distance;
                (similarity > 0.0 && filter.matches(paper))
                    .then(|| RetrievalResult::new(&paper.id, similarity).with_excerpt(&paper.title))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results.truncate(query.candidate_limit());
        Ok(results)
    }
}

#[async_trait]
impl RetrievalAdapter for VectorAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(
        &self,
        query: &Query,
    ) -> std::result::Result<Vec<RetrievalResult>, AdapterError> {
        let filter = PaperFilter::from_filters(query.filters())
            .map_err(|e| AdapterError::backend(NAME, e))?;

        let index = Arc::clone(&self.index);
        let query = query.clone();
        run_blocking(NAME, move |cancel| index.nearest(&query, &filter, cancel)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::HashingEmbedder;
    use crate::retrieval::{QueryLimits, SearchRequest};

    fn adapter() -> VectorAdapter {
        let config = BackendsConfig::default();
        VectorAdapter::build(
            Arc::new(Corpus::demo()),
            Arc::new(HashingEmbedder::new(config.vector_dim)),
            &config,
        )
        .unwrap()
    }

    fn query(request: SearchRequest) -> Query {
        Query::parse(&request, &QueryLimits::default()).unwrap()
    }

    #[tokio::test]
    async fn test_nearest_paper_ranks_first() {
        let adapter = adapter();
        assert_eq!(adapter.len(), 12);

        let request = SearchRequest::new("Efficient Transformers via Sparse Attention");
        let results = adapter.search(&query(request)).await.unwrap();

        assert_eq!(results[0].doc_id, "test_p_1");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(
            results[0].excerpt.as_deref(),
            Some("Efficient Transformers via Sparse Attention")
        );
    }

    #[tokio::test]
    async fn test_year_filter_applies() {
        let adapter = adapter();
        let results = adapter
            .search(&query(
                SearchRequest::new("transformer attention").with_filter("year_max", "2021"),
            ))
            .await
            .unwrap();

        let corpus = Corpus::demo();
        assert!(results
            .iter()
            .all(|r| corpus.get(&r.doc_id).unwrap().year <= 2021));
    }

    #[tokio::test]
    async fn test_stopword_query_returns_nothing() {
        let adapter = adapter();
        let results = adapter
            .search(&query(SearchRequest::new("the of and")))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
