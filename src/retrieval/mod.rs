//! Multi-source retrieval
//!
//! A [`QueryOrchestrator`] validates a [`SearchRequest`], checks the cache,
//! fans the query out to every [`RetrievalAdapter`] under one deadline,
//! fuses the surviving result lists and writes the fused list back.

mod adapter;
mod coordinator;
mod deduplication;
mod fusion;
mod orchestrator;
mod query;

pub use adapter::{AdapterError, RetrievalAdapter, RetrievalResult, TimeLimited};
pub use coordinator::{successful, BackendOutcome, FanOutCoordinator};
pub use deduplication::{canonical_doc_id, deduplicate_results};
pub use fusion::{
    compare_fused, fuse_outcomes, FusedResult, FusionConfig, FusionError, FusionMethod,
};
pub use orchestrator::{CachePolicy, QueryOrchestrator, ResponseStatus, SearchResponse};
pub use query::{normalize_text, Filters, Fingerprint, Query, QueryLimits, SearchRequest};
