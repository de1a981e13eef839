//! BM25 keyword backend over an in-RAM tantivy index
use crate::backends::{run_blocking, Cancellation, Corpus, PaperFilter};
use crate::error::Result;
use crate::retrieval::{AdapterError, Query, RetrievalAdapter, RetrievalResult};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

const NAME: &str = "keyword";
const SNIPPET_CHARS: usize = 200;

pub struct KeywordAdapter {
    index: Arc<KeywordIndex>,
}

struct KeywordIndex {
    corpus: Arc<Corpus>,
    index: Index,
    reader: IndexReader,
    id_field: Field,
    title_field: Field,
    abstract_field: Field,
}

impl KeywordAdapter {
    /// Index title and abstract of every paper
    pub fn build(corpus: Arc<Corpus>) -> Result<Self> {
        let index = KeywordIndex::open(corpus)?;
        Ok(Self {
            index: Arc::new(index),
        })
    }
}

impl KeywordIndex {
    fn open(corpus: Arc<Corpus>) -> anyhow::Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let title_field = schema_builder.add_text_field("title", TEXT | STORED);
        let abstract_field = schema_builder.add_text_field("abstract", TEXT | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, 50_000_000)
            .context("Failed to create keyword index writer")?;

        for paper in corpus.papers() {
            writer
                .add_document(doc!(
                    id_field => paper.id.as_str(),
                    title_field => paper.title.as_str(),
                    abstract_field => paper.abstract_text.as_str(),
                ))
                .with_context(|| format!("Failed to index paper {}", paper.id))?;
        }
        writer.commit().context("Failed to commit keyword index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to open keyword index reader")?;

        tracing::debug!("Keyword index holds {} papers", corpus.len());

        Ok(Self {
            corpus,
            index,
            reader,
            id_field,
            title_field,
            abstract_field,
        })
    }

    /// All-terms matching first, then any term if that found nothing
    fn lookup(
        &self,
        query: &Query,
        filter: &PaperFilter,
        cancel: &Cancellation,
    ) -> std::result::Result<Vec<RetrievalResult>, AdapterError> {
        let results = self
            .run(query, filter, true)
            .map_err(|e| AdapterError::backend(NAME, e))?;
        if !results.is_empty() {
            return Ok(results);
        }

        cancel.check(NAME)?;
        self.run(query, filter, false)
            .map_err(|e| AdapterError::backend(NAME, e))
    }

    fn run(
        &self,
        query: &Query,
        filter: &PaperFilter,
        conjunctive: bool,
    ) -> tantivy::Result<Vec<RetrievalResult>> {
        let searcher = self.reader.searcher();

        let mut parser =
            QueryParser::for_index(&self.index, vec![self.title_field, self.abstract_field]);
        if conjunctive {
            parser.set_conjunction_by_default();
        }
        // Titles count double
        parser.set_field_boost(self.title_field, 2.0);

        // Free text is never a syntax error; unparsable fragments are dropped
        let (parsed, _errors) = parser.parse_query_lenient(query.text());

        let limit = if filter.is_empty() {
            query.candidate_limit()
        } else {
            self.corpus.len().max(1)
        };
        let top_docs = searcher.search(parsed.as_ref(), &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(address)?;
            let Some(id) = retrieved.get_first(self.id_field).and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(paper) = self.corpus.get(id) else {
                continue;
            };
            if filter.matches(paper) {
                let excerpt = snippet(&paper.abstract_text);
                results.push(RetrievalResult::new(id, score).with_excerpt(excerpt));
            }
        }

        results.truncate(query.candidate_limit());
        Ok(results)
    }
}

#[async_trait]
impl RetrievalAdapter for KeywordAdapter {
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
        run_blocking(NAME, move |cancel| index.lookup(&query, &filter, cancel)).await
    }
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
