//! Reciprocal Rank Fusion for combining the dense and keyword result lists

use crate::retrieval::{Candidate, Document, SearchHit};
use ahash::{HashMap, HashMapExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid RRF k: {0} (must be a non-negative number)")]
    InvalidSmoothing(f64),

    #[error("Final top k must be greater than 0")]
    InvalidLimit,
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f64,

    /// Number of fused candidates kept
    pub final_top_k: usize,
}

impl FusionConfig {
    pub fn new(rrf_k: f64, final_top_k: usize) -> Result<Self, FusionError> {
        if !(rrf_k.is_finite() && rrf_k >= 0.0) {
            return Err(FusionError::InvalidSmoothing(rrf_k));
        }
        if final_top_k == 0 {
            return Err(FusionError::InvalidLimit);
        }

        Ok(Self { rrf_k, final_top_k })
    }

    /// Contribution of a single zero-based rank
    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.rrf_k + rank as f64 + 1.0)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            final_top_k: 50,
        }
    }
}

/// Everything fusion knows about one id, in first-seen order
#[derive(Default)]
struct Fused {
    document: Option<Document>,
    rrf_score: f64,
    dense_rank: Option<usize>,
    bm25_rank: Option<usize>,
}

/// Apply Reciprocal Rank Fusion to the dense and keyword lists
///
/// RRF formula: score(id) = sum over lists containing id of 1 / (k + rank + 1)
///
/// The payload of a candidate comes from the first well-formed hit for its id,
/// dense first. A hit without text contributes its rank but not its payload;
/// an id that never gets a well-formed payload is dropped with a warning.
/// Output is sorted by fused score descending, ties keeping first-seen order,
/// and truncated to `final_top_k`.
pub fn reciprocal_rank_fusion(
    dense_results: Vec<SearchHit>,
    bm25_results: Vec<SearchHit>,
    config: &FusionConfig,
) -> Vec<Candidate> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<Fused> = Vec::new();

    for (rank, hit) in dense_results.into_iter().enumerate() {
        let entry = accumulate(&mut positions, &mut fused, hit, rank, config, "dense");
        entry.dense_rank.get_or_insert(rank);
    }

    for (rank, hit) in bm25_results.into_iter().enumerate() {
        let entry = accumulate(&mut positions, &mut fused, hit, rank, config, "keyword");
        entry.bm25_rank.get_or_insert(rank);
    }

    let mut candidates: Vec<Candidate> = fused
        .into_iter()
        .filter_map(|entry| {
            let mut candidate = Candidate::new(entry.document?);
            candidate.rrf_score = entry.rrf_score;
            candidate.dense_rank = entry.dense_rank;
            candidate.bm25_rank = entry.bm25_rank;
            Some(candidate)
        })
        .collect();

    // Stable sort keeps first-seen order among equal scores
    candidates.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(config.final_top_k);

    tracing::debug!("Fused {} candidates", candidates.len());

    candidates
}

fn accumulate<'a>(
    positions: &mut HashMap<String, usize>,
    fused: &'a mut Vec<Fused>,
    hit: SearchHit,
    rank: usize,
    config: &FusionConfig,
    backend: &str,
) -> &'a mut Fused {
    let SearchHit { id, payload, .. } = hit;

    let index = match positions.get(&id) {
        Some(index) => *index,
        None => {
            fused.push(Fused::default());
            positions.insert(id.clone(), fused.len() - 1);
            fused.len() - 1
        }
    };

    let entry = &mut fused[index];
    if entry.document.is_none() {
        match payload.into_document(id) {
            Ok(document) => entry.document = Some(document),
            Err(e) => tracing::warn!("Skipping malformed {} hit: {}", backend, e),
        }
    }
    entry.rrf_score += config.contribution(rank);
    entry
}
