//! Reference retrieval backends over an in-memory paper collection
//!
//! Three adapters share one [`Corpus`]: dense-vector similarity over HNSW,
//! BM25 keyword search over tantivy, and a citation graph walk. Each one
//! honors the `year_min`, `year_max` and `venue` filters and ignores other
//! filter keys.

mod embedding;
mod graph;
mod keyword;
mod vector;

pub use embedding::{EmbeddingError, EmbeddingProvider, HashingEmbedder};
pub use graph::GraphAdapter;
pub use keyword::KeywordAdapter;
pub use vector::VectorAdapter;

use crate::config::{BackendsConfig, Config};
use crate::error::{LeibnizError, Result};
use crate::retrieval::{AdapterError, Filters, RetrievalAdapter, TimeLimited};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    pub year: i32,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Ids of papers this one cites
    #[serde(default)]
    pub cites: Vec<String>,
}

impl Paper {
    /// Title and abstract, the text every backend indexes
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.abstract_text)
    }
}

/// Immutable paper collection with id lookup
#[derive(Debug, Clone)]
pub struct Corpus {
    papers: Vec<Paper>,
    by_id: HashMap<String, usize>,
}

impl Corpus {
    pub fn from_papers(papers: Vec<Paper>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(papers.len());
        for (pos, paper) in papers.iter().enumerate() {
            if paper.id.trim().is_empty() {
                return Err(LeibnizError::Backend(format!(
                    "Paper at position {} has an empty id",
                    pos
                )));
            }
            if by_id.insert(paper.id.clone(), pos).is_some() {
                return Err(LeibnizError::Backend(format!(
                    "Duplicate paper id: {}",
                    paper.id
                )));
            }
        }
        Ok(Self { papers, by_id })
    }

    /// Load a JSON array of papers
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LeibnizError::Io {
            source: e,
            context: format!("Failed to read corpus file: {:?}", path),
        })?;
        let papers: Vec<Paper> = serde_json::from_str(&content).map_err(|e| LeibnizError::Json {
            source: e,
            context: format!("Failed to parse corpus file: {:?}", path),
        })?;
        Self::from_papers(papers)
    }

    /// Built-in collection used when no corpus file is configured
    pub fn demo() -> Self {
        let papers = demo_papers();
        let by_id = papers
            .iter()
            .enumerate()
            .map(|(pos, paper)| (paper.id.clone(), pos))
            .collect();
        Self { papers, by_id }
    }

    pub fn papers(&self) -> &[Paper] {
        &self.papers
    }

    pub fn get(&self, id: &str) -> Option<&Paper> {
        self.by_id.get(id).map(|&pos| &self.papers[pos])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }
}

/// Structured filters understood by the reference backends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperFilter {
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub venue: Option<String>,
}

impl PaperFilter {
    /// Extract the known keys, rejecting unparsable year bounds
    pub fn from_filters(filters: &Filters) -> std::result::Result<Self, String> {
        let year = |key: &str| -> std::result::Result<Option<i32>, String> {
            filters
                .get(key)
                .map(|value| {
                    value
                        .trim()
                        .parse::<i32>()
                        .map_err(|_| format!("filter {} expects a year, got '{}'", key, value))
                })
                .transpose()
        };

        Ok(Self {
            year_min: year("year_min")?,
            year_max: year("year_max")?,
            venue: filters
                .get("venue")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.year_min.is_none() && self.year_max.is_none() && self.venue.is_none()
    }

    pub fn matches(&self, paper: &Paper) -> bool {
        if self.year_min.is_some_and(|min| paper.year < min) {
            return false;
        }
        if self.year_max.is_some_and(|max| paper.year > max) {
            return false;
        }
        match &self.venue {
            Some(venue) => paper.venue.eq_ignore_ascii_case(venue),
            None => true,
        }
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "for", "from", "in", "is", "of", "on", "or", "that",
    "the", "this", "to", "via", "we", "with",
];

/// Lowercased alphanumeric terms with stopwords removed
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Raised once the future awaiting a blocking search is dropped
#[derive(Debug, Clone, Default)]
pub(crate) struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err` for `backend` if the caller has gone away
    pub(crate) fn check(&self, backend: &str) -> std::result::Result<(), AdapterError> {
        if self.is_cancelled() {
            Err(AdapterError::backend(backend, "search cancelled"))
        } else {
            Ok(())
        }
    }
}

struct CancelOnDrop(Cancellation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        (self.0).0.store(true, Ordering::Relaxed);
    }
}

/// Run CPU-bound search work on the blocking pool.
///
/// The async caller stays responsive to timeouts and aborts. Dropping the
/// returned future raises the cancellation flag handed to `work`.
pub(crate) async fn run_blocking<T, F>(
    backend: &'static str,
    work: F,
) -> std::result::Result<T, AdapterError>
where
    T: Send + 'static,
    F: FnOnce(&Cancellation) -> std::result::Result<T, AdapterError> + Send + 'static,
{
    let cancel = Cancellation::default();
    let _guard = CancelOnDrop(cancel.clone());
    tokio::task::spawn_blocking(move || work(&cancel))
        .await
        .map_err(|e| AdapterError::backend(backend, format!("search task failed: {}", e)))?
}

/// Load the configured corpus, or the demo collection if none is set
pub fn load_corpus(config: &BackendsConfig) -> Result<Corpus> {
    match &config.corpus_path {
        Some(path) => {
            let path = crate::config::expand_tilde(path)?;
            let corpus = Corpus::from_json_file(&path)?;
            tracing::info!("Loaded {} papers from {}", corpus.len(), path.display());
            Ok(corpus)
        }
        None => {
            tracing::debug!("No corpus configured, using the demo collection");
            Ok(Corpus::demo())
        }
    }
}

/// Build every enabled reference adapter, each behind its own timeout
pub fn build_adapters(
    config: &Config,
    corpus: Arc<Corpus>,
) -> Result<Vec<Arc<dyn RetrievalAdapter>>> {
    let backends = &config.backends;
    let timeout = Duration::from_millis(config.search.backend_timeout_ms);
    let mut adapters: Vec<Arc<dyn RetrievalAdapter>> = Vec::new();

    if backends.vector {
        let embedder = HashingEmbedder::new(backends.vector_dim);
        let adapter = VectorAdapter::build(Arc::clone(&corpus), Arc::new(embedder), backends)?;
        adapters.push(Arc::new(TimeLimited::new(adapter, timeout)));
    }
    if backends.graph {
        let adapter = GraphAdapter::new(Arc::clone(&corpus), backends.graph_hop_decay);
        adapters.push(Arc::new(TimeLimited::new(adapter, timeout)));
    }
    if backends.keyword {
        let adapter = KeywordAdapter::build(Arc::clone(&corpus))?;
        adapters.push(Arc::new(TimeLimited::new(adapter, timeout)));
    }

    tracing::debug!(
        "Built {} adapters over {} papers",
        adapters.len(),
        corpus.len()
    );
    Ok(adapters)
}

fn paper(
    id: &str,
    title: &str,
    abstract_text: &str,
    year: i32,
    venue: &str,
    authors: &[&str],
    cites: &[&str],
) -> Paper {
    Paper {
        id: id.to_string(),
        title: title.to_string(),
        abstract_text: abstract_text.to_string(),
        year,
        venue: venue.to_string(),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        cites: cites.iter().map(|c| c.to_string()).collect(),
    }
}

fn demo_papers() -> Vec<Paper> {
    vec![
        paper(
            "test_p_1",
            "Efficient Transformers via Sparse Attention",
            "We propose a sparse attention pattern that reduces the quadratic cost of transformer \
             self-attention to near-linear while preserving accuracy on long-context benchmarks.",
            2023,
            "NeurIPS",
            &["Ada Moreau", "Kenji Sato"],
            &["test_p_4", "test_p_6"],
        ),
        paper(
            "test_p_2",
            "BERT Performance on SQuAD: A Critical Analysis",
            "We revisit reported BERT F1 scores on SQuAD and find that evaluation differences \
             account for most of the claimed improvements.",
            2023,
            "ICLR",
            &["Lena Fischer", "Omar Haddad"],
            &["test_p_5"],
        ),
        paper(
            "test_p_3",
            "Linear-Time Transformer Efficiency with Kernelized Attention",
            "Kernel feature maps approximate softmax attention, giving transformers linear time \
             and memory in sequence length with small accuracy loss on WikiText.",
            2022,
            "ICML",
            &["Priya Raman", "Tomas Novak"],
            &["test_p_6"],
        ),
        paper(
            "test_p_4",
            "Longformer-Style Windowed Attention for Document Understanding",
            "Local windowed attention combined with global tokens scales transformer encoders \
             to long documents.",
            2021,
            "ACL",
            &["Maya Lindqvist"],
            &["test_p_6"],
        ),
        paper(
            "test_p_5",
            "Pretraining Deep Bidirectional Encoders for Question Answering",
            "Masked language model pretraining of bidirectional encoders improves question \
             answering accuracy on SQuAD and GLUE.",
            2020,
            "NAACL",
            &["Omar Haddad", "Ines Duarte"],
            &[],
        ),
        paper(
            "test_p_6",
            "Attention Is the Bottleneck: Profiling Transformer Inference",
            "We profile transformer inference and show attention dominates latency and memory \
             for long sequences, motivating efficient attention variants.",
            2020,
            "MLSys",
            &["Kenji Sato"],
            &[],
        ),
        paper(
            "test_p_7",
            "ViT Improvements on ImageNet: Data-Efficient Training",
            "Distillation tokens and strong augmentation let vision transformers train \
             efficiently on ImageNet without extra data.",
            2021,
            "CVPR",
            &["Clara Bianchi", "Jun Park"],
            &["test_p_6"],
        ),
        paper(
            "test_p_8",
            "Swin Transformers for Dense Prediction on COCO",
            "Shifted-window attention builds hierarchical vision transformers that reach strong \
             mAP on COCO detection.",
            2022,
            "ICCV",
            &["Jun Park"],
            &["test_p_7"],
        ),
        paper(
            "test_p_9",
            "CLIP Retrieval Benchmarks: Contrastive Image-Text Search",
            "Contrastive image-text pretraining yields embeddings that support zero-shot \
             retrieval across image and caption collections.",
            2022,
            "NeurIPS",
            &["Ines Duarte", "Clara Bianchi"],
            &["test_p_7"],
        ),
        paper(
            "test_p_10",
            "Hybrid Dense and Sparse Retrieval for Scientific Literature",
            "Fusing BM25 keyword ranking with dense embeddings and citation signals improves \
             recall for literature search.",
            2024,
            "EMNLP",
            &["Ada Moreau", "Lena Fischer"],
            &["test_p_2", "test_p_5", "test_p_9"],
        ),
        paper(
            "test_p_11",
            "GPT Improvements on WikiText: Perplexity Under a Compute Budget",
            "Scaling laws for decoder-only transformers show perplexity on WikiText improves \
             predictably with compute when attention is made efficient.",
            2024,
            "ICLR",
            &["Tomas Novak"],
            &["test_p_1", "test_p_3"],
        ),
        paper(
            "test_p_12",
            "ResNet Baselines Revisited on CIFAR-10",
            "Careful training recipes close most of the accuracy gap between residual networks \
             and newer architectures on CIFAR-10.",
            2021,
            "ICML",
            &["Maya Lindqvist", "Priya Raman"],
            &[],
        ),
    ]
}
