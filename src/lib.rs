//! Rankmix - Hybrid Retrieval & Ranking Engine
//!
//! Merges dense and keyword search results with Reciprocal Rank Fusion,
//! reranks them with a cross-encoder, blends in freshness and credibility
//! priors, and suppresses near-duplicates. Whole-query results and
//! per-document rerank scores are cached with independent TTLs.

pub mod backends;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod retrieval;

pub use error::{RankmixError, Result};
pub use retrieval::{Candidate, Document, HybridRetriever, RetrieveOptions};
