//! Cache stores for whole-query results and per-pair rerank scores
//!
//! The engine only depends on [`CacheStore`]; [`ResultCache`] wraps a store
//! with typed accessors, independent TTLs and best-effort error handling.

mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::{SqliteCache, SqliteCacheStats};

use crate::config::{expand_path, CacheBackend, CacheConfig};
use crate::retrieval::Candidate;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache value could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Key/value store with per-key TTL
///
/// Values are JSON; an expired entry must read as absent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Look up several keys at once, answers in key order
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }
}

/// Namespace of whole-query result lists
pub const QUERY_NAMESPACE: &str = "query";

/// Namespace of per-(document, query) rerank scores
pub const RERANK_NAMESPACE: &str = "rerank";

/// Derive a cache key from a namespace and its parameters
///
/// The parameters are serialized to JSON with object keys sorted, hashed with
/// BLAKE3, and the first 16 hex digits appended to the namespace.
pub fn make_key<P: Serialize>(namespace: &str, params: &P) -> Result<String, CacheError> {
    // serde_json's Map is ordered by key, so to_value canonicalizes objects
    let canonical = serde_json::to_value(params)?;
    let encoded = serde_json::to_string(&canonical)?;
    let hash = blake3::hash(encoded.as_bytes());
    Ok(format!("{}:{}", namespace, &hash.to_hex()[..16]))
}

#[derive(Serialize)]
struct QueryKey<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Serialize)]
struct RerankKey<'a> {
    doc_id: &'a str,
    query: &'a str,
}

/// Key of a whole-query result list
pub fn query_key(query: &str, top_k: usize) -> Result<String, CacheError> {
    make_key(QUERY_NAMESPACE, &QueryKey { query, top_k })
}

/// Key of a rerank score; independent of `top_k`
pub fn rerank_key(doc_id: &str, query: &str) -> Result<String, CacheError> {
    make_key(RERANK_NAMESPACE, &RerankKey { doc_id, query })
}

/// Typed, best-effort view over a [`CacheStore`]
///
/// No method returns an error: store failures and undecodable values are
/// logged and read as misses, so a cache outage only costs recomputation.
#[derive(Clone)]
pub struct ResultCache {
    store: Option<Arc<dyn CacheStore>>,
    query_ttl: Duration,
    rerank_ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, query_ttl: Duration, rerank_ttl: Duration) -> Self {
        Self {
            store: Some(store),
            query_ttl,
            rerank_ttl,
        }
    }

    /// A cache that never hits and never stores
    pub fn disabled() -> Self {
        Self {
            store: None,
            query_ttl: Duration::ZERO,
            rerank_ttl: Duration::ZERO,
        }
    }

    /// Build the store selected in configuration
    pub fn from_config(config: &CacheConfig) -> crate::error::Result<Self> {
        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Disabled => return Ok(Self::disabled()),
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
            CacheBackend::Sqlite => Arc::new(SqliteCache::open(
                &expand_path(&config.path)?,
                config.compression_threshold,
            )?),
        };

        Ok(Self::new(
            store,
            Duration::from_secs(config.query_ttl_seconds),
            Duration::from_secs(config.rerank_ttl_seconds),
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Cached result list for `(query, top_k)`
    pub async fn get_query(&self, query: &str, top_k: usize) -> Option<Vec<Candidate>> {
        let store = self.store.as_ref()?;
        let key = log_key_error(query_key(query, top_k))?;

        match store.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(candidates) => Some(candidates),
                Err(e) => {
                    tracing::warn!("Ignoring undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Query cache read failed: {}", e);
                None
            }
        }
    }

    /// Store the result list for `(query, top_k)` with the query TTL
    pub async fn set_query(&self, query: &str, top_k: usize, candidates: &[Candidate]) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let Some(key) = log_key_error(query_key(query, top_k)) else {
            return;
        };

        let value = match serde_json::to_value(candidates) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Could not encode results for caching: {}", e);
                return;
            }
        };

        if let Err(e) = store.set(&key, value, self.query_ttl).await {
            tracing::warn!("Query cache write failed: {}", e);
        }
    }

    /// Cached rerank scores for each document id, in input order
    pub async fn get_rerank_scores(&self, query: &str, doc_ids: &[&str]) -> Vec<Option<f64>> {
        let misses = || vec![None; doc_ids.len()];
        let Some(store) = self.store.as_ref() else {
            return misses();
        };

        let keys: Option<Vec<String>> = doc_ids
            .iter()
            .map(|id| log_key_error(rerank_key(id, query)))
            .collect();
        let Some(keys) = keys else {
            return misses();
        };

        match store.get_many(&keys).await {
            Ok(values) if values.len() == keys.len() => values
                .into_iter()
                .map(|value| value.and_then(|v| v.as_f64()))
                .collect(),
            Ok(values) => {
                tracing::warn!(
                    "Cache returned {} values for {} keys; ignoring",
                    values.len(),
                    keys.len()
                );
                misses()
            }
            Err(e) => {
                tracing::warn!("Rerank cache read failed: {}", e);
                misses()
            }
        }
    }

    /// Store a rerank score with the rerank TTL
    pub async fn set_rerank_score(&self, query: &str, doc_id: &str, score: f64) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let Some(key) = log_key_error(rerank_key(doc_id, query)) else {
            return;
        };

        // JSON has no NaN/inf
        let Some(value) = serde_json::Number::from_f64(score).map(Value::Number) else {
            tracing::warn!("Not caching non-finite rerank score for {}", doc_id);
            return;
        };

        if let Err(e) = store.set(&key, value, self.rerank_ttl).await {
            tracing::warn!("Rerank cache write failed: {}", e);
        }
    }
}

fn log_key_error(key: Result<String, CacheError>) -> Option<String> {
    match key {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!("Could not derive cache key: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Document;

    /// Store that fails every call
    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    fn memory_cache() -> (Arc<MemoryCache>, ResultCache) {
        let store = Arc::new(MemoryCache::new());
        let cache = ResultCache::new(
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        (store, cache)
    }

    #[test]
    fn test_key_shape() {
        let key = query_key("what is rust", 24).unwrap();
        let (namespace, hash) = key.split_once(':').unwrap();
        assert_eq!(namespace, "query");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keys_are_deterministic_and_distinct() {
        assert_eq!(query_key("q", 10).unwrap(), query_key("q", 10).unwrap());
        assert_ne!(query_key("q", 10).unwrap(), query_key("q", 11).unwrap());
        assert_ne!(query_key("q", 10).unwrap(), query_key("Q", 10).unwrap());
        assert_ne!(rerank_key("d1", "q").unwrap(), rerank_key("d2", "q").unwrap());
    }

    #[test]
    fn test_key_ignores_field_order() {
        #[derive(Serialize)]
        struct Reordered<'a> {
            top_k: usize,
            query: &'a str,
        }

        assert_eq!(
            make_key(QUERY_NAMESPACE, &Reordered { top_k: 5, query: "q" }).unwrap(),
            query_key("q", 5).unwrap()
        );
    }

    #[tokio::test]
    async fn test_query_roundtrip() {
        let (_, cache) = memory_cache();
        let mut candidate = Candidate::new(Document::new("a", "alpha", "src"));
        candidate.final_score = Some(0.42);

        assert!(cache.get_query("q", 3).await.is_none());
        cache.set_query("q", 3, &[candidate.clone()]).await;

        assert_eq!(cache.get_query("q", 3).await, Some(vec![candidate]));
        assert!(cache.get_query("q", 4).await.is_none());
    }

    #[tokio::test]
    async fn test_rerank_scores_in_order() {
        let (_, cache) = memory_cache();
        cache.set_rerank_score("q", "b", 1.5).await;

        let scores = cache.get_rerank_scores("q", &["a", "b", "c"]).await;
        assert_eq!(scores, vec![None, Some(1.5), None]);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (store, cache) = memory_cache();
        let key = query_key("q", 3).unwrap();
        store
            .set(&key, serde_json::json!({"not": "a list"}), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get_query("q", 3).await.is_none());
    }

    #[tokio::test]
    async fn test_broken_store_degrades_to_misses() {
        let cache = ResultCache::new(
            Arc::new(BrokenStore),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        cache.set_rerank_score("q", "a", 1.0).await;
        cache.set_query("q", 1, &[]).await;
        assert_eq!(cache.get_rerank_scores("q", &["a"]).await, vec![None]);
        assert!(cache.get_query("q", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = ResultCache::disabled();
        cache.set_rerank_score("q", "a", 1.0).await;
        assert!(!cache.is_enabled());
        assert_eq!(cache.get_rerank_scores("q", &["a"]).await, vec![None]);
    }

    #[tokio::test]
    async fn test_non_finite_scores_are_not_cached() {
        let (_, cache) = memory_cache();
        cache.set_rerank_score("q", "a", f64::NAN).await;
        assert_eq!(cache.get_rerank_scores("q", &["a"]).await, vec![None]);
    }
}
