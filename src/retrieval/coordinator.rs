//! Bounded-time fan-out across every configured adapter

use crate::retrieval::{AdapterError, Query, RetrievalAdapter, RetrievalResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Result of one fan-out slot
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub backend: String,
    pub result: Result<Vec<RetrievalResult>, AdapterError>,
    pub elapsed: Duration,
}

impl BackendOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Results if the slot succeeded, otherwise `None`
    pub fn results(&self) -> Option<&[RetrievalResult]> {
        self.result.as_deref().ok()
    }
}

/// Runs adapters concurrently against one shared deadline
pub struct FanOutCoordinator {
    adapters: Vec<Arc<dyn RetrievalAdapter>>,
}

impl FanOutCoordinator {
    pub fn new(adapters: Vec<Arc<dyn RetrievalAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Launch one task per adapter and collect whatever finishes in time.
    ///
    /// Returns one outcome per adapter, in adapter order. Tasks still running
    /// at the deadline are aborted and reported as [`AdapterError::Timeout`];
    /// the coordinator never waits for them to acknowledge. Call
    /// [`successful`] to drop the failed slots.
    pub async fn fan_out(&self, query: Arc<Query>, deadline: Duration) -> Vec<BackendOutcome> {
        let started = Instant::now();
        let deadline_at = started + deadline;

        let mut tasks = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let query = Arc::clone(&query);
            tasks.spawn(async move {
                let task_started = Instant::now();
                let result = adapter.search(&query).await;
                BackendOutcome {
                    backend: adapter.name().to_string(),
                    result,
                    elapsed: task_started.elapsed(),
                }
            });
        }

        let mut finished = Vec::with_capacity(self.adapters.len());
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline_at, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    match &outcome.result {
                        Ok(results) => tracing::debug!(
                            backend = %outcome.backend,
                            hits = results.len(),
                            elapsed_ms = outcome.elapsed.as_millis() as u64,
                            "Backend completed"
                        ),
                        Err(e) => tracing::warn!(
                            backend = %outcome.backend,
                            elapsed_ms = outcome.elapsed.as_millis() as u64,
                            "Backend failed: {}",
                            e
                        ),
                    }
                    finished.push(outcome);
                }
                Ok(Some(Err(join_error))) => {
                    // The slot is filled in below once every task is accounted for
                    tracing::warn!("Backend task ended abnormally: {}", join_error);
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    break;
                }
            }
        }

        if deadline_hit {
            tasks.abort_all();
        }
        drop(tasks);

        let elapsed = started.elapsed();
        let mut outcomes = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let name = adapter.name();
            if let Some(pos) = finished.iter().position(|o| o.backend == name) {
                outcomes.push(finished.swap_remove(pos));
            } else {
                let error = if deadline_hit {
                    tracing::warn!(
                        backend = name,
                        deadline_ms = deadline.as_millis() as u64,
                        "Backend cancelled at deadline"
                    );
                    AdapterError::timeout(name, elapsed)
                } else {
                    AdapterError::backend(name, "task panicked")
                };
                outcomes.push(BackendOutcome {
                    backend: name.to_string(),
                    result: Err(error),
                    elapsed,
                });
            }
        }

        outcomes
    }
}

/// Keep only the outcomes that produced a result list
pub fn successful(outcomes: &[BackendOutcome]) -> Vec<&BackendOutcome> {
    outcomes.iter().filter(|o| o.is_success()).collect()
}
