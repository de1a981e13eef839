//! Uniform contract for retrieval backends

use crate::retrieval::Query;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One hit returned by a single backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Document identifier shared across backends
    pub doc_id: String,

    /// Backend-specific relevance score, higher is better
    pub score: f32,

    /// Optional short text excerpt
    pub excerpt: Option<String>,
}

impl RetrievalResult {
    pub fn new(doc_id: impl Into<String>, score: f32) -> Self {
        Self {
            doc_id: doc_id.into(),
            score,
            excerpt: None,
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }
}

/// Closed set of adapter failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{backend} timed out after {elapsed_ms}ms")]
    Timeout { backend: String, elapsed_ms: u64 },

    #[error("{backend} failed: {message}")]
    Backend { backend: String, message: String },
}

impl AdapterError {
    pub fn timeout(backend: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            backend: backend.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Name of the backend that failed
    pub fn backend_name(&self) -> &str {
        match self {
            Self::Timeout { backend, .. } | Self::Backend { backend, .. } => backend,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A retrieval backend behind the fan-out coordinator.
///
/// Implementations must return [`AdapterError::Timeout`] or
/// [`AdapterError::Backend`] instead of blocking indefinitely, and must stop
/// promptly when their future is dropped.
#[async_trait]
pub trait RetrievalAdapter: Send + Sync {
    /// Unique backend name, also the key into the fusion weight table
    fn name(&self) -> &str;

    /// Return up to `query.candidate_limit()` results, best first
    async fn search(&self, query: &Query) -> Result<Vec<RetrievalResult>, AdapterError>;
}

#[async_trait]
impl<A: RetrievalAdapter + ?Sized> RetrievalAdapter for Arc<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn search(&self, query: &Query) -> Result<Vec<RetrievalResult>, AdapterError> {
        (**self).search(query).await
    }
}

/// Enforces a per-call timeout around any adapter
pub struct TimeLimited<A> {
    inner: A,
    limit: Duration,
}

impl<A: RetrievalAdapter> TimeLimited<A> {
    pub fn new(inner: A, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl<A: RetrievalAdapter> RetrievalAdapter for TimeLimited<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &Query) -> Result<Vec<RetrievalResult>, AdapterError> {
        match tokio::time::timeout(self.limit, self.inner.search(query)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::timeout(self.inner.name(), self.limit)),
        }
    }
}
