//! Blending of rerank, fusion, freshness and credibility signals

use crate::config::ScoringConfig;
use crate::retrieval::Candidate;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Freshness used when a document has no parseable `updated_at`
pub const NEUTRAL_FRESHNESS: f64 = 0.5;

/// Credibility used when a document carries no prior
pub const NEUTRAL_CREDIBILITY: f64 = 0.5;

/// Weights of the four score components
///
/// These are a coupled set. `rerank` multiplies an unbounded cross-encoder
/// output while `fusion` multiplies an RRF score bounded near [0, 0.03] for
/// `rrf_k = 60`; the defaults were tuned for that exact pairing. Changing the
/// reranker model, `rrf_k`, or any single weight requires re-tuning all four.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub rerank: f64,
    pub fusion: f64,
    pub freshness: f64,
    pub credibility: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rerank: 0.55,
            fusion: 0.25,
            freshness: 0.12,
            credibility: 0.08,
        }
    }
}

/// Computes final scores for reranked candidates
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoringWeights,
    freshness_tau_days: f64,
}

impl Scorer {
    pub fn new(weights: ScoringWeights, freshness_tau_days: f64) -> Self {
        Self {
            weights,
            freshness_tau_days,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            ScoringWeights {
                rerank: config.cross_encoder_weight,
                fusion: config.base_retrieval_weight,
                freshness: config.freshness_weight,
                credibility: config.credibility_weight,
            },
            config.freshness_tau_days,
        )
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// `exp(-days_since(updated_at) / tau)`, or 0.5 when the timestamp is
    /// missing or unparseable. Timestamps in the future count as zero days old.
    pub fn freshness(&self, updated_at: Option<&str>, now: DateTime<Utc>) -> f64 {
        let Some(updated) = updated_at.and_then(parse_timestamp) else {
            return NEUTRAL_FRESHNESS;
        };

        let days_old = (now - updated).num_days().max(0) as f64;
        (-days_old / self.freshness_tau_days).exp()
    }

    /// Final score of a candidate, evaluated at `now`
    pub fn score_at(&self, candidate: &Candidate, now: DateTime<Utc>) -> f64 {
        let freshness = self.freshness(candidate.document.updated_at.as_deref(), now);
        self.combine(candidate, freshness)
    }

    /// Final score of a candidate, evaluated against the current time
    pub fn score(&self, candidate: &Candidate) -> f64 {
        self.score_at(candidate, Utc::now())
    }

    /// Set `freshness_score` and `final_score` on a candidate
    pub fn apply(&self, candidate: &mut Candidate, now: DateTime<Utc>) {
        let freshness = self.freshness(candidate.document.updated_at.as_deref(), now);
        candidate.freshness_score = Some(freshness);
        candidate.final_score = Some(self.combine(candidate, freshness));
    }

    fn combine(&self, candidate: &Candidate, freshness: f64) -> f64 {
        let rerank = candidate.rerank_score.unwrap_or(0.0);
        let credibility = candidate
            .document
            .credibility_score
            .unwrap_or(NEUTRAL_CREDIBILITY);

        self.weights.rerank * rerank
            + self.weights.fusion * candidate.rrf_score
            + self.weights.freshness * freshness
            + self.weights.credibility * credibility
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), 30.0)
    }
}

/// Accepts RFC 3339, naive ISO 8601 date-times (taken as UTC) and bare dates
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Sort candidates by final score descending, keeping input order on ties
pub fn sort_by_final_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.final_score
            .unwrap_or(f64::NEG_INFINITY)
            .partial_cmp(&a.final_score.unwrap_or(f64::NEG_INFINITY))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
