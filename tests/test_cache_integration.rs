//! Cache stores behind the typed result cache

use rankmix::cache::{query_key, CacheStore, MemoryCache, ResultCache, SqliteCache};
use rankmix::config::{CacheBackend, CacheConfig};
use rankmix::retrieval::{Candidate, Document};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn candidates(n: usize) -> Vec<Candidate> {
    (0..n)
        .map(|i| {
            let mut candidate = Candidate::new(
                Document::new(
                    format!("doc-{}", i),
                    format!("body of document {} ", i).repeat(20),
                    "https://example.com",
                )
                .with_updated_at("2024-01-01T00:00:00Z")
                .with_credibility(0.75),
            );
            candidate.dense_rank = Some(i);
            candidate.rrf_score = 1.0 / (61.0 + i as f64);
            candidate.rerank_score = Some(3.25 - i as f64);
            candidate.final_score = Some(1.5 - i as f64 * 0.1);
            candidate
        })
        .collect()
}

#[tokio::test]
async fn test_sqlite_backed_result_cache() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteCache::open(&temp.path().join("cache.sqlite"), 256).unwrap());
    let cache = ResultCache::new(
        store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(60),
    );

    let results = candidates(5);
    cache.set_query("rust async", 5, &results).await;
    cache.set_rerank_score("rust async", "doc-0", 3.25).await;

    assert_eq!(cache.get_query("rust async", 5).await, Some(results));
    assert_eq!(
        cache
            .get_rerank_scores("rust async", &["doc-0", "doc-1"])
            .await,
        vec![Some(3.25), None]
    );

    let stats = store.stats().unwrap();
    assert_eq!(stats.entries, 2);
    // The result list is far above the 256 byte threshold
    assert_eq!(stats.compressed_entries, 1);
}

#[tokio::test]
async fn test_query_and_rerank_ttls_are_independent() {
    let cache = ResultCache::new(
        Arc::new(MemoryCache::new()),
        Duration::ZERO,
        Duration::from_secs(60),
    );

    cache.set_query("q", 3, &candidates(3)).await;
    cache.set_rerank_score("q", "doc-0", 1.0).await;

    assert!(cache.get_query("q", 3).await.is_none());
    assert_eq!(cache.get_rerank_scores("q", &["doc-0"]).await, vec![Some(1.0)]);
}

#[tokio::test]
async fn test_store_sees_namespaced_keys() {
    let store = Arc::new(MemoryCache::new());
    let cache = ResultCache::new(
        store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(60),
    );

    cache.set_query("q", 7, &candidates(1)).await;

    let key = query_key("q", 7).unwrap();
    assert!(key.starts_with("query:"));
    assert!(store.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_result_cache_from_config() {
    let temp = TempDir::new().unwrap();

    let disabled = ResultCache::from_config(&CacheConfig {
        backend: CacheBackend::Disabled,
        ..Default::default()
    })
    .unwrap();
    assert!(!disabled.is_enabled());

    let config = CacheConfig {
        backend: CacheBackend::Sqlite,
        path: temp.path().join("nested").join("cache.sqlite"),
        ..Default::default()
    };
    let sqlite = ResultCache::from_config(&config).unwrap();
    sqlite.set_rerank_score("q", "d", 0.5).await;
    assert_eq!(sqlite.get_rerank_scores("q", &["d"]).await, vec![Some(0.5)]);
    assert!(config.path.exists());
}

#[tokio::test]
async fn test_expired_rerank_scores_are_evicted_on_lookup() {
    let store = Arc::new(MemoryCache::new());
    let cache = ResultCache::new(
        store.clone(),
        Duration::from_millis(1),
        Duration::from_millis(1),
    );

    let doc_ids: Vec<String> = (0..20).map(|i| format!("doc-{}", i)).collect();
    let doc_refs: Vec<&str> = doc_ids.iter().map(String::as_str).collect();
    for q in 0..5 {
        let query = format!("query {}", q);
        for doc_id in &doc_refs {
            cache.set_rerank_score(&query, doc_id, 1.0).await;
        }
    }
    assert_eq!(store.len().await, 100);

    tokio::time::sleep(Duration::from_millis(20)).await;

    for q in 0..5 {
        let scores = cache
            .get_rerank_scores(&format!("query {}", q), &doc_refs)
            .await;
        assert!(scores.iter().all(Option::is_none));
    }
    assert!(store.is_empty().await);
}
