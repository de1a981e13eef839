//! End-to-end behavior of the query orchestrator with scripted backends

mod common;

use common::{as_dyn, manual_cache, orchestrator, scenario_backends, ScriptedAdapter};
use leibniz::retrieval::{ResponseStatus, RetrievalAdapter, SearchRequest, TimeLimited};
use leibniz::LeibnizError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn fuses_three_backends_into_unique_ranked_list() {
    let (vector, graph, keyword) = scenario_backends();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), None);

    let response = orchestrator
        .search(&SearchRequest::new("transformer efficiency"))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Complete);
    assert!(!response.served_from_cache);
    assert!(response.results.len() <= 20);

    let ids: Vec<&str> = response.results.iter().map(|r| r.doc_id.as_str()).collect();
    let unique: HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 8);
    assert_eq!(unique.len(), 8);

    // Corroborated documents outrank every single-backend document
    let rank = |id: &str| ids.iter().position(|d| *d == id).unwrap();
    let single: Vec<usize> = response
        .results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.backends.len() == 1)
        .map(|(pos, _)| pos)
        .collect();
    assert!(!single.is_empty());
    for shared in ["shared_1", "shared_2"] {
        assert!(single.iter().all(|&pos| rank(shared) < pos));
    }

    assert_eq!(ids[0], "shared_1");
    assert!(response
        .results
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
    for result in &response.results {
        assert!((0.0..=1.0).contains(&result.score));
    }
    assert_eq!(
        response.results[0].excerpt.as_deref(),
        Some("vector excerpt of shared_1")
    );
    assert_eq!(
        response.contributing_backends,
        vec!["graph", "keyword", "vector"]
    );
}

#[tokio::test]
async fn repeat_query_within_ttl_is_served_from_cache() {
    let (vector, graph, keyword) = scenario_backends();
    let (cache, _clock) = manual_cache();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), Some(cache));
    let request = SearchRequest::new("transformer efficiency");

    let first = orchestrator.search(&request).await.unwrap();
    let second = orchestrator
        .search(&SearchRequest::new("  Transformer   EFFICIENCY "))
        .await
        .unwrap();

    assert!(second.served_from_cache);
    assert_eq!(second.status, ResponseStatus::Cached);
    assert_eq!(second.results, first.results);
    assert_eq!(second.contributing_backends, first.contributing_backends);
    assert_ne!(second.request_id, first.request_id);
    assert!(second.elapsed_ms <= first.elapsed_ms.max(1));
    assert_eq!(vector.calls(), 1);
    assert_eq!(graph.calls(), 1);
    assert_eq!(keyword.calls(), 1);
}

#[tokio::test]
async fn timed_out_backend_is_left_out() {
    let (vector, _, keyword) = scenario_backends();
    let graph = ScriptedAdapter::hanging("graph");
    let adapters: Vec<Arc<dyn RetrievalAdapter>> = vec![
        vector.clone() as Arc<dyn RetrievalAdapter>,
        Arc::new(TimeLimited::new(graph.clone(), Duration::from_millis(30))),
        keyword.clone() as Arc<dyn RetrievalAdapter>,
    ];
    let orchestrator = orchestrator(adapters, None);

    let response = orchestrator
        .search(&SearchRequest::new("transformer efficiency").with_deadline_ms(500))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Degraded);
    assert_eq!(response.contributing_backends, vec!["keyword", "vector"]);
    assert_eq!(response.failed_backends, vec!["graph"]);
    for result in &response.results {
        assert!(!result.backends.contains("graph"));
    }
    assert_eq!(graph.calls(), 1);
}

#[tokio::test]
async fn all_backends_failing_is_an_explicit_empty_response() {
    let vector = ScriptedAdapter::failing("vector");
    let graph = ScriptedAdapter::failing("graph");
    let keyword = ScriptedAdapter::failing("keyword");
    let (cache, _clock) = manual_cache();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), Some(cache));
    let request = SearchRequest::new("transformer efficiency");

    let response = orchestrator.search(&request).await.unwrap();
    assert_eq!(response.status, ResponseStatus::AllBackendsFailed);
    assert!(response.results.is_empty());
    assert!(!response.served_from_cache);
    assert!(response.contributing_backends.is_empty());
    assert_eq!(response.failed_backends, vec!["vector", "graph", "keyword"]);

    // Total failure is never cached
    orchestrator.search(&request).await.unwrap();
    assert_eq!(vector.calls(), 2);
}

#[tokio::test]
async fn invalid_query_fails_before_any_backend_runs() {
    let (vector, graph, keyword) = scenario_backends();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), None);

    let too_long = "a".repeat(501);
    let requests = [
        SearchRequest::new(""),
        SearchRequest::new("   \t "),
        SearchRequest::new(too_long.as_str()),
        SearchRequest::new("attention").with_limit(0),
        SearchRequest::new("attention").with_limit(101),
        SearchRequest::new("attention").with_deadline_ms(0),
    ];

    for request in &requests {
        match orchestrator.search(request).await {
            Err(LeibnizError::InvalidQuery(_)) => {}
            other => panic!(
                "expected InvalidQuery for {:?}, got {:?}",
                request.text, other
            ),
        }
    }

    assert_eq!(vector.calls(), 0);
    assert_eq!(graph.calls(), 0);
    assert_eq!(keyword.calls(), 0);
}

#[tokio::test]
async fn two_failures_leave_only_the_survivor() {
    let (vector, _, _) = scenario_backends();
    let graph = ScriptedAdapter::failing("graph");
    let keyword = ScriptedAdapter::failing("keyword");
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), None);

    let response = orchestrator
        .search(&SearchRequest::new("transformer efficiency"))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Degraded);
    assert_eq!(response.contributing_backends, vec!["vector"]);
    assert_eq!(response.failed_backends, vec!["graph", "keyword"]);
    assert_eq!(response.results.len(), 5);
    assert!(response
        .results
        .iter()
        .all(|r| r.backends.len() == 1 && r.backends.contains("vector")));
    // A lone backend's top hit normalizes to the full score
    assert_eq!(response.results[0].doc_id, "vec_1");
    assert!((response.results[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn hanging_backend_cannot_hold_the_request_past_its_deadline() {
    let (vector, _, keyword) = scenario_backends();
    let graph = ScriptedAdapter::hanging("graph");
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), None);

    let started = Instant::now();
    let response = orchestrator
        .search(&SearchRequest::new("transformer efficiency").with_deadline_ms(100))
        .await
        .unwrap();
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_millis(400), "waited {:?}", waited);
    assert_eq!(response.failed_backends, vec!["graph"]);
    assert_eq!(response.contributing_backends, vec!["keyword", "vector"]);
}

#[tokio::test]
async fn cached_results_expire_with_the_clock() {
    let (vector, graph, keyword) = scenario_backends();
    let (cache, clock) = manual_cache();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), Some(cache));
    let request = SearchRequest::new("sparse attention");

    orchestrator.search(&request).await.unwrap();
    clock.advance(Duration::from_secs(3599));
    let cached = orchestrator.search(&request).await.unwrap();
    assert!(cached.served_from_cache);

    clock.advance(Duration::from_secs(1));
    let refreshed = orchestrator.search(&request).await.unwrap();
    assert!(!refreshed.served_from_cache);
    assert_eq!(vector.calls(), 2);
}

#[tokio::test]
async fn bypassed_cache_is_the_fallback_when_every_backend_fails() {
    let vector = ScriptedAdapter::with_results("vector", &[("p1", 0.9), ("p2", 0.4)]);
    let keyword = ScriptedAdapter::with_results("keyword", &[("p2", 3.0)]);
    let (cache, _clock) = manual_cache();
    let orchestrator = orchestrator(as_dyn(&[&vector, &keyword]), Some(cache));
    let request = SearchRequest::new("sparse attention");

    let fresh = orchestrator.search(&request).await.unwrap();

    vector.set_failing(true);
    keyword.set_failing(true);
    let fallback = orchestrator
        .search(&request.clone().bypassing_cache())
        .await
        .unwrap();

    assert_eq!(fallback.status, ResponseStatus::Cached);
    assert!(fallback.served_from_cache);
    assert_eq!(fallback.results, fresh.results);
    assert_eq!(fallback.failed_backends, vec!["vector", "keyword"]);
}

#[tokio::test]
async fn different_limits_and_filters_are_cached_separately() {
    let (vector, graph, keyword) = scenario_backends();
    let (cache, _clock) = manual_cache();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), Some(cache));

    let full = orchestrator
        .search(&SearchRequest::new("transformer efficiency"))
        .await
        .unwrap();
    let top3 = orchestrator
        .search(&SearchRequest::new("transformer efficiency").with_limit(3))
        .await
        .unwrap();
    let filtered = orchestrator
        .search(&SearchRequest::new("transformer efficiency").with_filter("year_min", "2022"))
        .await
        .unwrap();

    assert!(!top3.served_from_cache);
    assert!(!filtered.served_from_cache);
    assert_eq!(top3.results.len(), 3);
    assert_eq!(top3.results[..], full.results[..3]);
    assert_eq!(vector.calls(), 3);
}

#[tokio::test]
async fn fused_ordering_is_reproducible() {
    let (vector, graph, keyword) = scenario_backends();
    let orchestrator = orchestrator(as_dyn(&[&vector, &graph, &keyword]), None);
    let request = SearchRequest::new("transformer efficiency");

    let first = orchestrator.search(&request).await.unwrap();
    let first_bytes = serde_json::to_vec(&first.results).unwrap();
    for _ in 0..10 {
        let again = orchestrator.search(&request).await.unwrap();
        assert_eq!(serde_json::to_vec(&again.results).unwrap(), first_bytes);
    }
}
