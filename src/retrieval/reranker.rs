//! Cross-encoder reranking with per-(document, query) score caching

use crate::cache::ResultCache;
use crate::retrieval::Candidate;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    ModelFailure(String),
}

/// A model scoring (query, document) pairs jointly
///
/// Implementations are synchronous and may be slow; callers run them on a
/// blocking thread. Scores are unbounded and only comparable within a model.
pub trait CrossEncoder: Send + Sync {
    /// One score per document, in input order
    fn predict(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError>;

    fn model_name(&self) -> &str;
}

/// FastEmbed-backed cross-encoder
pub struct FastEmbedCrossEncoder {
    model: TextRerank,
    model_name: String,
    batch_size: usize,
}

impl FastEmbedCrossEncoder {
    /// Load a reranker model, downloading it on first use
    ///
    /// # Arguments
    /// * `model_name` - Hugging Face name (e.g., "BAAI/bge-reranker-base")
    /// * `batch_size` - Pairs scored per inference batch
    pub fn new(model_name: &str, batch_size: usize) -> Result<Self, RerankError> {
        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options =
            RerankInitOptions::new(reranker_model(model_name)?).with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
            batch_size: batch_size.max(1),
        })
    }
}

fn reranker_model(name: &str) -> Result<RerankerModel, RerankError> {
    match name {
        "BAAI/bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "BAAI/bge-reranker-v2-m3" | "rozgo/bge-reranker-v2-m3" => {
            Ok(RerankerModel::BGERerankerV2M3)
        }
        "jinaai/jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        other => Err(RerankError::InitializationError(format!(
            "Unsupported reranker model: {}",
            other
        ))),
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn predict(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = documents.iter().map(|s| s.as_str()).collect();
        let results = self
            .model
            .rerank(query, texts, false, Some(self.batch_size))
            .map_err(|e| RerankError::ModelFailure(e.to_string()))?;

        // FastEmbed returns results sorted by score; restore input order
        let mut scores = vec![None; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = Some(result.score);
            }
        }

        scores
            .into_iter()
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| RerankError::ModelFailure("Model skipped some documents".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Reranking stage: cache lookup, one batched model call for the misses,
/// cache write-back, sort and truncate
#[derive(Clone)]
pub struct Reranker {
    model: Arc<dyn CrossEncoder>,
    cache: ResultCache,
}

impl Reranker {
    pub fn new(model: Arc<dyn CrossEncoder>, cache: ResultCache) -> Self {
        Self { model, cache }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Score candidates against `query` and keep the best `top_k`
    ///
    /// Cached scores are reused; only uncached candidates reach the model, in a
    /// single call. Output is sorted by rerank score descending (stable on ties)
    /// and holds `min(top_k, candidates.len())` entries.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Vec<Candidate>, RerankError> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let cached = {
            let ids: Vec<&str> = candidates.iter().map(|c| c.id()).collect();
            self.cache.get_rerank_scores(query, &ids).await
        };

        let mut misses = Vec::new();
        for (index, (candidate, score)) in candidates.iter_mut().zip(cached).enumerate() {
            match score {
                Some(score) => candidate.rerank_score = Some(score),
                None => misses.push(index),
            }
        }

        tracing::debug!(
            "Rerank cache: {} hits, {} misses",
            candidates.len() - misses.len(),
            misses.len()
        );

        if !misses.is_empty() {
            let texts: Vec<String> = misses
                .iter()
                .map(|&i| candidates[i].text().to_string())
                .collect();
            let scores = self.predict(query, texts).await?;

            if scores.len() != misses.len() {
                return Err(RerankError::ModelFailure(format!(
                    "Expected {} scores, got {}",
                    misses.len(),
                    scores.len()
                )));
            }

            for (&index, score) in misses.iter().zip(scores) {
                let score = f64::from(score);
                let candidate = &mut candidates[index];
                candidate.rerank_score = Some(score);
                self.cache
                    .set_rerank_score(query, candidate.id(), score)
                    .await;
            }
        }

        candidates.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_k);

        Ok(candidates)
    }

    async fn predict(&self, query: &str, texts: Vec<String>) -> Result<Vec<f32>, RerankError> {
        let model = Arc::clone(&self.model);
        let query = query.to_string();

        tokio::task::spawn_blocking(move || model.predict(&query, &texts))
            .await
            .map_err(|e| RerankError::ModelFailure(format!("Model task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::retrieval::Document;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scores a document by the number of query words it contains
    #[derive(Default)]
    struct WordOverlap {
        calls: Mutex<Vec<usize>>,
    }

    impl CrossEncoder for WordOverlap {
        fn predict(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
            self.calls.lock().unwrap().push(documents.len());
            Ok(documents
                .iter()
                .map(|d| query.split_whitespace().filter(|w| d.contains(w)).count() as f32)
                .collect())
        }

        fn model_name(&self) -> &str {
            "word-overlap"
        }
    }

    struct Failing;

    impl CrossEncoder for Failing {
        fn predict(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>, RerankError> {
            Err(RerankError::ModelFailure("out of memory".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn candidates(texts: &[(&str, &str)]) -> Vec<Candidate> {
        texts
            .iter()
            .map(|(id, text)| Candidate::new(Document::new(*id, *text, "test")))
            .collect()
    }

    fn cache() -> ResultCache {
        ResultCache::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_sorts_and_truncates() {
        let reranker = Reranker::new(Arc::new(WordOverlap::default()), cache());
        let input = candidates(&[
            ("a", "nothing relevant"),
            ("b", "rust async runtime"),
            ("c", "rust"),
        ]);

        let ranked = reranker.rerank("rust async", input, 2).await.unwrap();

        let ids: Vec<&str> = ranked.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(ranked[0].rerank_score, Some(2.0));
    }

    #[tokio::test]
    async fn test_top_k_larger_than_input() {
        let reranker = Reranker::new(Arc::new(WordOverlap::default()), cache());
        let ranked = reranker
            .rerank("q", candidates(&[("a", "q"), ("b", "r")]), 10)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_skips_model() {
        let model = Arc::new(WordOverlap::default());
        let reranker = Reranker::new(model.clone(), cache());

        assert!(reranker.rerank("q", Vec::new(), 5).await.unwrap().is_empty());
        assert!(model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_uncached_candidates_reach_model() {
        let model = Arc::new(WordOverlap::default());
        let reranker = Reranker::new(model.clone(), cache());

        reranker
            .rerank("rust", candidates(&[("a", "rust"), ("b", "go")]), 5)
            .await
            .unwrap();
        reranker
            .rerank(
                "rust",
                candidates(&[("a", "rust"), ("b", "go"), ("c", "rust rust")]),
                1,
            )
            .await
            .unwrap();

        // First call scores both, second only the new document
        assert_eq!(*model.calls.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_cached_scores_are_per_query() {
        let model = Arc::new(WordOverlap::default());
        let reranker = Reranker::new(model.clone(), cache());

        reranker
            .rerank("rust", candidates(&[("a", "rust")]), 5)
            .await
            .unwrap();
        reranker
            .rerank("go", candidates(&[("a", "rust")]), 5)
            .await
            .unwrap();

        assert_eq!(*model.calls.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let reranker = Reranker::new(Arc::new(Failing), cache());
        let result = reranker.rerank("q", candidates(&[("a", "text")]), 5).await;

        assert!(matches!(result, Err(RerankError::ModelFailure(_))));
    }

    #[test]
    fn test_unknown_model_name() {
        assert!(matches!(
            reranker_model("acme/unknown"),
            Err(RerankError::InitializationError(_))
        ));
        assert!(reranker_model("BAAI/bge-reranker-base").is_ok());
    }

    #[test]
    #[ignore] // Requires model download
    fn test_fastembed_scores_in_input_order() {
        let encoder = FastEmbedCrossEncoder::new("BAAI/bge-reranker-base", 8).unwrap();
        let documents = vec![
            "The weather is nice today.".to_string(),
            "Paris is the capital of France.".to_string(),
        ];

        let scores = encoder
            .predict("What is the capital of France?", &documents)
            .unwrap();

        assert_eq!(scores.len(), 2);
        assert!(scores[1] > scores[0]);
    }
}
