//! Scripted adapters and builders shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use leibniz::cache::{Clock, ManualClock, TwoTierCache};
use leibniz::retrieval::{
    AdapterError, CachePolicy, FusionConfig, Query, QueryLimits, QueryOrchestrator,
    RetrievalAdapter, RetrievalResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Adapter with a fixed answer that can be switched to failing or hanging
pub struct ScriptedAdapter {
    name: String,
    results: Vec<RetrievalResult>,
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn with_results(name: &str, hits: &[(&str, f32)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            results: hits
                .iter()
                .map(|(id, score)| {
                    RetrievalResult::new(*id, *score)
                        .with_excerpt(format!("{} excerpt of {}", name, id))
                })
                .collect(),
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        let adapter = Self::with_results(name, &[]);
        adapter.set_failing(true);
        adapter
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        let adapter = Self::with_results(name, &[("never", 1.0)]);
        adapter.hanging.store(true, Ordering::SeqCst);
        adapter
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &Query) -> Result<Vec<RetrievalResult>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.hanging.load(Ordering::SeqCst) {
            let never: Result<Vec<RetrievalResult>, AdapterError> =
                std::future::pending().await;
            return never;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::backend(&self.name, "service unavailable"));
        }

        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(self.results.clone())
    }
}

pub fn as_dyn(adapters: &[&Arc<ScriptedAdapter>]) -> Vec<Arc<dyn RetrievalAdapter>> {
    adapters
        .iter()
        .map(|a| Arc::clone(*a) as Arc<dyn RetrievalAdapter>)
        .collect()
}

/// Local-only cache on a manual clock
pub fn manual_cache() -> (Arc<TwoTierCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let cache = TwoTierCache::local_only(1_000, Arc::clone(&clock) as Arc<dyn Clock>);
    (Arc::new(cache), clock)
}

pub fn orchestrator(
    adapters: Vec<Arc<dyn RetrievalAdapter>>,
    cache: Option<Arc<TwoTierCache>>,
) -> QueryOrchestrator {
    QueryOrchestrator::new(
        adapters,
        cache,
        FusionConfig::default(),
        QueryLimits::default(),
        CachePolicy::default(),
    )
    .unwrap()
}

/// Five hits per backend; vector and keyword share `shared_1` and `shared_2`
pub fn scenario_backends() -> (
    Arc<ScriptedAdapter>,
    Arc<ScriptedAdapter>,
    Arc<ScriptedAdapter>,
) {
    let vector = ScriptedAdapter::with_results(
        "vector",
        &[
            ("vec_1", 0.95),
            ("shared_1", 0.90),
            ("vec_2", 0.80),
            ("shared_2", 0.70),
            ("vec_3", 0.50),
        ],
    );
    // The graph walk rediscovers the vector hits
    let graph = ScriptedAdapter::with_results(
        "graph",
        &[
            ("vec_1", 0.40),
            ("shared_1", 0.35),
            ("vec_2", 0.30),
            ("shared_2", 0.20),
            ("vec_3", 0.10),
        ],
    );
    let keyword = ScriptedAdapter::with_results(
        "keyword",
        &[
            ("kw_1", 12.0),
            ("shared_1", 11.0),
            ("kw_2", 8.0),
            ("shared_2", 6.0),
            ("kw_3", 3.0),
        ],
    );
    (vector, graph, keyword)
}
