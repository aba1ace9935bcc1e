/// HNSW vector index serving dense (semantic) search
use super::{SearchClient, SearchError};
use crate::retrieval::{Document, SearchHit};
use ahash::HashMap;
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::sync::{Arc, RwLock};

/// Turns text into fixed-size embedding vectors
///
/// Query and document embeddings must come from the same model.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    fn dimension(&self) -> usize;
}

/// HNSW graph parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Connections per node (M)
    pub max_connections: usize,
    /// Build-time candidate list size (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Query-time candidate list size
    pub ef_search: usize,
    /// Capacity hint for the graph
    pub max_elements: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 100_000,
        }
    }
}

const MAX_LAYERS: usize = 16;

#[derive(Default)]
struct Slots {
    /// Graph slot -> document as of that insert
    documents: Vec<Document>,
    /// Document id -> its current graph slot
    current: HashMap<String, usize>,
}

/// Approximate nearest neighbour search by cosine similarity
///
/// HNSW graphs cannot drop points, so re-inserting an id adds a new point and
/// the old one is skipped at query time. Searches run on the blocking pool
/// since both the embedder and the graph walk are CPU bound.
pub struct DenseIndexClient {
    inner: Arc<DenseIndex>,
}

struct DenseIndex {
    index: Hnsw<'static, f32, DistCosine>,
    slots: RwLock<Slots>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: HnswParams,
}

impl DenseIndexClient {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, params: HnswParams) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            params.max_connections,
            params.max_elements,
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        Self {
            inner: Arc::new(DenseIndex {
                index,
                slots: RwLock::new(Slots::default()),
                embedder,
                params,
            }),
        }
    }

    /// Embed and index a document, replacing any earlier version
    pub fn insert(&self, document: &Document) -> Result<(), SearchError> {
        self.inner.insert(document)
    }

    /// Number of distinct documents
    pub fn len(&self) -> usize {
        self.inner.slots.read().map(|s| s.current.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DenseIndex {
    fn insert(&self, document: &Document) -> Result<(), SearchError> {
        let vector = self.embed_checked(&document.text)?;

        let mut slots = self
            .slots
            .write()
            .map_err(|_| SearchError::Unavailable("Dense index lock poisoned".to_string()))?;

        let slot = slots.documents.len();
        self.index.insert((vector.as_slice(), slot));
        slots.documents.push(document.clone());
        slots.current.insert(document.id.clone(), slot);

        Ok(())
    }

    fn embed_checked(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let vector = self.embedder.embed(text)?;
        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(SearchError::InvalidDimension {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn search_blocking(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embed_checked(query)?;

        let slots = self
            .slots
            .read()
            .map_err(|_| SearchError::Unavailable("Dense index lock poisoned".to_string()))?;
        if slots.current.is_empty() {
            return Ok(Vec::new());
        }

        // Over-fetch to make up for superseded points
        let stale = slots.documents.len() - slots.current.len();
        let k = limit + stale;
        let neighbours = self
            .index
            .search(&vector, k, self.params.ef_search.max(k));

        let mut hits = Vec::with_capacity(limit);
        for neighbour in neighbours {
            let Some(document) = slots.documents.get(neighbour.d_id) else {
                continue;
            };
            if slots.current.get(&document.id) != Some(&neighbour.d_id) {
                continue;
            }

            hits.push(SearchHit::new(
                document.id.clone(),
                f64::from(1.0 - neighbour.distance),
                document.to_payload(),
            ));
            if hits.len() == limit {
                break;
            }
        }

        Ok(hits)
    }
}

#[async_trait]
impl SearchClient for DenseIndexClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let hits = tokio::task::spawn_blocking(move || inner.search_blocking(&query, limit))
            .await
            .map_err(|e| {
                SearchError::QueryFailed(format!("Dense search task failed: {}", e))
            })??;
        tracing::debug!("Dense search returned {} hits", hits.len());
        Ok(hits)
    }

    fn name(&self) -> &str {
        "dense"
    }
}
