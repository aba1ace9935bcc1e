/// Tantivy BM25 index serving keyword search
use super::{SearchClient, SearchError};
use crate::retrieval::{Document, DocumentPayload, SearchHit};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Keyword search over document text and section titles
///
/// The full document payload is stored alongside the indexed fields so hits
/// carry everything scoring needs. Writes are buffered until [`commit`].
/// Searches run on the blocking pool.
///
/// [`commit`]: KeywordIndexClient::commit
pub struct KeywordIndexClient {
    inner: Arc<KeywordIndex>,
}

struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    text_field: Field,
    section_field: Field,
    payload_field: Field,
}

impl KeywordIndexClient {
    /// Open the index in `index_path`, creating it when missing
    pub fn open_or_create(index_path: &Path) -> Result<Self, SearchError> {
        if index_path.join("meta.json").exists() {
            let index = Index::open_in_dir(index_path)
                .map_err(|e| SearchError::InitializationError(e.to_string()))?;
            Self::from_index(index)
        } else {
            std::fs::create_dir_all(index_path).map_err(|e| {
                SearchError::InitializationError(format!(
                    "Failed to create index directory {}: {}",
                    index_path.display(),
                    e
                ))
            })?;
            let index = Index::create_in_dir(index_path, schema())
                .map_err(|e| SearchError::InitializationError(e.to_string()))?;
            Self::from_index(index)
        }
    }

    /// A RAM-only index, mostly for tests
    pub fn in_memory() -> Result<Self, SearchError> {
        Self::from_index(Index::create_in_ram(schema()))
    }

    fn from_index(index: Index) -> Result<Self, SearchError> {
        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                SearchError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };

        let id_field = field("id")?;
        let text_field = field("text")?;
        let section_field = field("section")?;
        let payload_field = field("payload")?;

        let writer = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| SearchError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| SearchError::InitializationError(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(KeywordIndex {
                index,
                reader,
                writer: Mutex::new(writer),
                id_field,
                text_field,
                section_field,
                payload_field,
            }),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>, SearchError> {
        self.inner
            .writer
            .lock()
            .map_err(|_| SearchError::Unavailable("Index writer lock poisoned".to_string()))
    }

    /// Add or replace a document
    pub fn insert(&self, document: &Document) -> Result<(), SearchError> {
        let payload = serde_json::to_string(&document.to_payload())
            .map_err(|e| SearchError::InsertError(e.to_string()))?;

        let inner = &self.inner;
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(inner.id_field, &document.id));
        writer
            .add_document(doc!(
                inner.id_field => document.id.as_str(),
                inner.text_field => document.text.as_str(),
                inner.section_field => document.section.as_deref().unwrap_or(""),
                inner.payload_field => payload,
            ))
            .map_err(|e| SearchError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Remove a document by id
    pub fn delete(&self, id: &str) -> Result<(), SearchError> {
        self.writer()?
            .delete_term(Term::from_field_text(self.inner.id_field, id));
        Ok(())
    }

    /// Make pending writes visible to searches
    pub fn commit(&self) -> Result<(), SearchError> {
        self.writer()?
            .commit()
            .map_err(|e| SearchError::InsertError(e.to_string()))?;

        self.inner
            .reader
            .reload()
            .map_err(|e| SearchError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.inner.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeywordIndex {
    fn search_blocking(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let mut query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.section_field]);
        query_parser.set_field_boost(self.text_field, 2.0);

        // Free-text queries often contain syntax characters; keep what parses
        let (parsed, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} query syntax errors in {:?}", errors.len(), query);
        }

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| SearchError::QueryFailed(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| SearchError::QueryFailed(e.to_string()))?;

            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| SearchError::QueryFailed("Missing or invalid ID field".to_string()))?
                .to_string();

            // A payload that does not decode is passed on empty and rejected by fusion
            let payload = retrieved
                .get_first(self.payload_field)
                .and_then(|v| v.as_str())
                .and_then(|raw| serde_json::from_str::<DocumentPayload>(raw).ok())
                .unwrap_or_default();

            hits.push(SearchHit::new(id, f64::from(score), payload));
        }

        Ok(hits)
    }
}

fn schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("text", TEXT);
    schema_builder.add_text_field("section", TEXT);
    schema_builder.add_text_field("payload", STORED);
    schema_builder.build()
}

#[async_trait]
impl SearchClient for KeywordIndexClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let hits = tokio::task::spawn_blocking(move || inner.search_blocking(&query, limit))
            .await
            .map_err(|e| {
                SearchError::QueryFailed(format!("Keyword search task failed: {}", e))
            })??;
        tracing::debug!("Keyword search returned {} hits", hits.len());
        Ok(hits)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
