//! Citation graph backend
//!
//! Seeds are papers whose title or abstract share terms with the query,
//! scored by the fraction of query terms they contain. Each seed then
//! passes a decayed score one hop along its citation edges, in both
//! directions. A paper keeps the best score it receives.

use crate::backends::{run_blocking, tokenize, Cancellation, Corpus, PaperFilter};
use crate::retrieval::{AdapterError, Query, RetrievalAdapter, RetrievalResult};
use ahash::{HashMap, HashMapExt, HashSet};
use async_trait::async_trait;
use std::sync::Arc;

const NAME: &str = "graph";
/// Papers scanned between cancellation checks
const CANCEL_STRIDE: usize = 1024;

pub struct GraphAdapter {
    graph: Arc<CitationGraph>,
}

struct CitationGraph {
    corpus: Arc<Corpus>,
    /// Terms of each paper, by corpus position
    terms: Vec<HashSet<String>>,
    /// Undirected citation neighbours, by corpus position
    neighbours: Vec<Vec<usize>>,
    hop_decay: f32,
}

impl GraphAdapter {
    pub fn new(corpus: Arc<Corpus>, hop_decay: f32) -> Self {
        let terms = corpus
            .papers()
            .iter()
            .map(|p| tokenize(&p.searchable_text()).into_iter().collect())
            .collect();

        let mut neighbours = vec![Vec::new(); corpus.len()];
        for (pos, paper) in corpus.papers().iter().enumerate() {
            for cited in &paper.cites {
                // Dangling citations point outside the collection
                let Some(target) = corpus.position(cited) else {
                    continue;
                };
                if target != pos {
                    neighbours[pos].push(target);
                    neighbours[target].push(pos);
                }
            }
        }
        for list in &mut neighbours {
            list.sort_unstable();
            list.dedup();
        }

        Self {
            graph: Arc::new(CitationGraph {
                corpus,
                terms,
                neighbours,
                hop_decay,
            }),
        }
    }

    pub fn neighbours_of(&self, id: &str) -> Vec<&str> {
        let graph = &*self.graph;
        graph
            .corpus
            .position(id)
            .map(|pos| {
                graph.neighbours[pos]
                    .iter()
                    .map(|&n| graph.corpus.papers()[n].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl CitationGraph {
    fn rank(
        &self,
        query: &Query,
        filter: &PaperFilter,
        cancel: &Cancellation,
    ) -> Result<Vec<RetrievalResult>, AdapterError> {
        let query_terms: HashSet<String> = tokenize(query.text()).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for (pos, terms) in self.terms.iter().enumerate() {
            if pos % CANCEL_STRIDE == 0 {
                cancel.check(NAME)?;
            }
            let matched = query_terms.iter().filter(|t| terms.contains(*t)).count();
            if matched == 0 {
                continue;
            }
            let seed = matched as f32 / query_terms.len() as f32;
            raise(&mut scores, pos, seed);
            for &neighbour in &self.neighbours[pos] {
                raise(&mut scores, neighbour, seed * self.hop_decay);
            }
        }

        let papers = self.corpus.papers();
        let mut results: Vec<RetrievalResult> = scores
            .into_iter()
            .filter(|(pos, _)| filter.matches(&papers[*pos]))
            .map(|(pos, score)| RetrievalResult::new(&papers[pos].id, score))
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
impl RetrievalAdapter for GraphAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(&self, query: &Query) -> Result<Vec<RetrievalResult>, AdapterError> {
        let filter = PaperFilter::from_filters(query.filters())
            .map_err(|e| AdapterError::backend(NAME, e))?;

        let graph = Arc::clone(&self.graph);
        let query = query.clone();
        run_blocking(NAME, move |cancel| graph.rank(&query, &filter, cancel)).await
    }
}

fn raise(scores: &mut HashMap<usize, f32>, pos: usize, score: f32) {
    let entry = scores.entry(pos).or_insert(0.0);
    if score > *entry {
        *entry = score;
    }
}
