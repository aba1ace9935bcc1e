//! Near-duplicate suppression by word-set Jaccard similarity

use crate::retrieval::Candidate;
use ahash::AHashSet;

/// Default similarity above which two results are near-duplicates
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.9;

/// Case-folded, whitespace-tokenized word set
fn word_set(text: &str) -> AHashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

fn jaccard(a: &AHashSet<String>, b: &AHashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;

    intersection as f64 / union as f64
}

/// Jaccard similarity of the word sets of two texts
///
/// No stemming or stopword removal; either text being empty yields 0.0.
pub fn jaccard_similarity(text1: &str, text2: &str) -> f64 {
    jaccard(&word_set(text1), &word_set(text2))
}

/// Drop candidates that are near-duplicates of a higher-ranked one
///
/// Input must already be sorted by `final_score` descending. Each candidate is
/// compared with every kept one and dropped when any similarity exceeds
/// `threshold`. The first candidate is always kept, so a non-empty input never
/// yields an empty output. Quadratic in the input size; only run it on the
/// fused candidate set.
///
/// # Arguments
/// * `candidates` - Scored candidates, best first
/// * `threshold` - Similarity cutoff (strictly greater means duplicate)
///
/// # Returns
/// Surviving candidates, maintaining score order
pub fn deduplicate(candidates: Vec<Candidate>, threshold: f64) -> Vec<Candidate> {
    if candidates.len() <= 1 {
        return candidates;
    }

    let before = candidates.len();
    let mut kept_words: Vec<AHashSet<String>> = Vec::with_capacity(before);
    let mut unique = Vec::with_capacity(before);

    for candidate in candidates {
        let words = word_set(candidate.text());
        let is_duplicate = kept_words
            .iter()
            .any(|kept| jaccard(&words, kept) > threshold);

        if is_duplicate {
            tracing::debug!("Dropping near-duplicate {}", candidate.id());
        } else {
            kept_words.push(words);
            unique.push(candidate);
        }
    }

    tracing::debug!("Deduplicated {} -> {} candidates", before, unique.len());

    unique
}
