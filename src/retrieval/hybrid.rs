//! Retrieval orchestrator: fan out to both backends, fuse, rerank, score,
//! deduplicate, with a whole-query cache in front

use crate::backends::SearchClient;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::{RankmixError, Result};
use crate::retrieval::{
    deduplicate, reciprocal_rank_fusion, sort_by_final_score, Candidate, CrossEncoder,
    FastEmbedCrossEncoder, FusionConfig, Reranker, Scorer,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-call overrides for [`HybridRetriever::retrieve_with`]
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Result size; defaults to the reranker's configured `top_k`
    pub top_k: Option<usize>,

    /// Cancels in-flight backend and model calls when triggered
    pub cancel: Option<CancellationToken>,

    /// Deadline for the uncached pipeline; overrides `retrieval.timeout_ms`
    pub timeout: Option<Duration>,
}

impl RetrieveOptions {
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a result list was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStatus {
    /// Computed now from both backends
    Fresh,
    /// Served verbatim from the whole-query cache
    Cached,
    /// Computed now, but the named backends failed and were left out
    Degraded { unavailable: Vec<String> },
}

/// Ordered results plus how they were obtained
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    pub status: RetrievalStatus,
}

impl Retrieval {
    fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            status: RetrievalStatus::Fresh,
        }
    }
}

/// Hybrid retriever over a dense and a keyword backend
///
/// Stateless apart from the injected cache; one instance can serve any number
/// of concurrent queries.
pub struct HybridRetriever {
    dense: Arc<dyn SearchClient>,
    keyword: Arc<dyn SearchClient>,
    reranker: Reranker,
    scorer: Scorer,
    cache: ResultCache,
    fusion: FusionConfig,
    dense_top_k: usize,
    bm25_top_k: usize,
    default_top_k: usize,
    dedup_threshold: f64,
    timeout: Option<Duration>,
}

impl HybridRetriever {
    /// Create a retriever from explicit collaborators
    pub fn new(
        dense: Arc<dyn SearchClient>,
        keyword: Arc<dyn SearchClient>,
        model: Arc<dyn CrossEncoder>,
        cache: ResultCache,
        config: &Config,
    ) -> Result<Self> {
        let fusion = FusionConfig::new(config.retrieval.rrf_k, config.retrieval.final_top_k)
            .map_err(|e| RankmixError::Config(e.to_string()))?;

        tracing::info!(
            "Hybrid retriever ready (dense: {}, keyword: {}, reranker: {})",
            dense.name(),
            keyword.name(),
            model.model_name()
        );

        Ok(Self {
            dense,
            keyword,
            reranker: Reranker::new(model, cache.clone()),
            scorer: Scorer::from_config(&config.scoring),
            cache,
            fusion,
            dense_top_k: config.retrieval.dense_top_k,
            bm25_top_k: config.retrieval.bm25_top_k,
            default_top_k: config.reranker.top_k,
            dedup_threshold: config.scoring.dedup_threshold,
            timeout: config.retrieval.timeout_ms.map(Duration::from_millis),
        })
    }

    /// Create a retriever with the configured FastEmbed reranker and cache store
    ///
    /// Loads (and on first use downloads) the reranker model; call it from a
    /// blocking context.
    pub fn from_config(
        dense: Arc<dyn SearchClient>,
        keyword: Arc<dyn SearchClient>,
        config: &Config,
    ) -> Result<Self> {
        let model = FastEmbedCrossEncoder::new(&config.reranker.model, config.reranker.batch_size)?;
        let cache = ResultCache::from_config(&config.cache)?;
        Self::new(dense, keyword, Arc::new(model), cache, config)
    }

    /// Ordered results for `query`, best first
    ///
    /// An empty list means nothing relevant was found.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<Candidate>> {
        let options = RetrieveOptions {
            top_k,
            ..Default::default()
        };
        Ok(self.retrieve_with(query, options).await?.candidates)
    }

    /// Like [`retrieve`](Self::retrieve), with cancellation, a deadline and
    /// the result status
    pub async fn retrieve_with(&self, query: &str, options: RetrieveOptions) -> Result<Retrieval> {
        if query.trim().is_empty() {
            tracing::debug!("Blank query; nothing to retrieve");
            return Ok(Retrieval::empty());
        }

        let top_k = options.top_k.unwrap_or(self.default_top_k);
        if top_k == 0 {
            return Ok(Retrieval::empty());
        }

        // Empty lists are never written, so an empty hit is a stale or foreign entry
        if let Some(cached) = self.cache.get_query(query, top_k).await {
            if !cached.is_empty() {
                tracing::debug!("Query cache hit ({} results)", cached.len());
                return Ok(Retrieval {
                    candidates: cached,
                    status: RetrievalStatus::Cached,
                });
            }
        }

        let started = Instant::now();
        let cancel = options.cancel.unwrap_or_default();
        let timeout = options.timeout.or(self.timeout);

        let pipeline = self.run_pipeline(query, top_k);
        let bounded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, pipeline).await {
                    Ok(result) => result,
                    Err(_) => Err(RankmixError::DeadlineExceeded {
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }),
                },
                None => pipeline.await,
            }
        };

        let retrieval = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Retrieval cancelled after {:?}", started.elapsed());
                return Err(RankmixError::Cancelled);
            }
            result = bounded => result?,
        };

        // Degraded lists would pin a partial answer for the whole TTL
        if retrieval.status == RetrievalStatus::Fresh && !retrieval.candidates.is_empty() {
            self.cache
                .set_query(query, top_k, &retrieval.candidates)
                .await;
        }

        tracing::info!(
            "Retrieved {} results in {:?}",
            retrieval.candidates.len(),
            started.elapsed()
        );

        Ok(retrieval)
    }

    async fn run_pipeline(&self, query: &str, top_k: usize) -> Result<Retrieval> {
        // Step 1: Both backends concurrently
        let (dense_results, keyword_results) = tokio::join!(
            self.dense.search(query, self.dense_top_k),
            self.keyword.search(query, self.bm25_top_k)
        );

        let mut unavailable = Vec::new();
        let (dense_hits, keyword_hits) = match (dense_results, keyword_results) {
            (Ok(dense), Ok(keyword)) => (dense, keyword),
            (Ok(dense), Err(e)) => {
                tracing::warn!(
                    "{} search failed, continuing without it: {}",
                    self.keyword.name(),
                    e
                );
                unavailable.push(self.keyword.name().to_string());
                (dense, Vec::new())
            }
            (Err(e), Ok(keyword)) => {
                tracing::warn!(
                    "{} search failed, continuing without it: {}",
                    self.dense.name(),
                    e
                );
                unavailable.push(self.dense.name().to_string());
                (Vec::new(), keyword)
            }
            (Err(dense), Err(keyword)) => {
                return Err(RankmixError::BackendsUnavailable { dense, keyword });
            }
        };

        let status = if unavailable.is_empty() {
            RetrievalStatus::Fresh
        } else {
            RetrievalStatus::Degraded { unavailable }
        };

        tracing::debug!(
            "Backends returned {} dense and {} keyword hits",
            dense_hits.len(),
            keyword_hits.len()
        );

        // Step 2: Reciprocal Rank Fusion
        let fused = reciprocal_rank_fusion(dense_hits, keyword_hits, &self.fusion);
        if fused.is_empty() {
            return Ok(Retrieval {
                candidates: Vec::new(),
                status,
            });
        }

        // Step 3: Cross-encoder rerank
        let mut candidates = self.reranker.rerank(query, fused, top_k).await?;

        // Step 4: Blend scores, sort, drop near-duplicates
        let now = Utc::now();
        for candidate in candidates.iter_mut() {
            self.scorer.apply(candidate, now);
        }
        sort_by_final_score(&mut candidates);

        let mut candidates = deduplicate(candidates, self.dedup_threshold);
        candidates.truncate(top_k.min(self.fusion.final_top_k));

        if let Some(top) = candidates.first() {
            tracing::debug!("Top result {}: {}", top.id(), top.preview(80));
        }

        Ok(Retrieval { candidates, status })
    }
}
