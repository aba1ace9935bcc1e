//! Search backends queried by the retrieval orchestrator
//!
//! The orchestrator only sees [`SearchClient`]. Two in-process clients are
//! provided: a BM25 keyword index on tantivy and an approximate nearest
//! neighbour index on hnsw_rs fed by an injected [`EmbeddingProvider`].

mod dense;
mod keyword;

pub use dense::{DenseIndexClient, EmbeddingProvider, HnswParams};
pub use keyword::KeywordIndexClient;

use crate::retrieval::SearchHit;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    QueryFailed(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// A ranked search backend
///
/// Hits come back best first; their position in the list is the rank used by
/// fusion, the backend score is informational only.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError>;

    /// Short label for logs ("dense", "keyword", ...)
    fn name(&self) -> &str;
}
