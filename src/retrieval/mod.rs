//! Hybrid retrieval and ranking
//!
//! Dense and keyword results are merged with Reciprocal Rank Fusion, rescored
//! by a cross-encoder, blended with freshness and credibility priors, and
//! stripped of near-duplicates.

mod candidate;
mod deduplication;
mod fusion;
mod hybrid;
mod reranker;
mod scoring;

pub use candidate::{Candidate, Document, DocumentPayload, MalformedPayload, SearchHit};
pub use deduplication::{deduplicate, jaccard_similarity, DEFAULT_DEDUP_THRESHOLD};
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{HybridRetriever, Retrieval, RetrievalStatus, RetrieveOptions};
pub use reranker::{CrossEncoder, FastEmbedCrossEncoder, RerankError, Reranker};
pub use scoring::{
    sort_by_final_score, Scorer, ScoringWeights, NEUTRAL_CREDIBILITY, NEUTRAL_FRESHNESS,
};
