//! Retrieval over the bundled tantivy and HNSW backends

use rankmix::backends::{
    DenseIndexClient, EmbeddingProvider, HnswParams, KeywordIndexClient, SearchClient, SearchError,
};
use rankmix::cache::{ResultCache, SqliteCache};
use rankmix::config::Config;
use rankmix::retrieval::{CrossEncoder, Document, HybridRetriever, RerankError, RetrievalStatus};
use rankmix::{RankmixError, RetrieveOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Hashed bag-of-words embedding
struct HashedWords;

const DIM: usize = 64;

impl EmbeddingProvider for HashedWords {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vector = vec![0.0f32; DIM];
        for word in text.split_whitespace() {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            vector[hash.as_bytes()[0] as usize % DIM] += 1.0;
        }
        // Keep the vector non-zero for cosine distance
        vector[DIM - 1] += 0.01;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// `HashedWords` behind a thread-blocking delay, armed once the corpus is indexed
struct SlowWords {
    delay: Duration,
    armed: AtomicBool,
}

impl SlowWords {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: AtomicBool::new(false),
        }
    }
}

impl EmbeddingProvider for SlowWords {
    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        if self.armed.load(Ordering::SeqCst) {
            std::thread::sleep(self.delay);
        }
        HashedWords.embed(text)
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

fn slow_dense(corpus: &[Document], delay: Duration) -> Arc<DenseIndexClient> {
    let embedder = Arc::new(SlowWords::new(delay));
    let dense = DenseIndexClient::new(embedder.clone(), HnswParams::default());
    for document in corpus {
        dense.insert(document).unwrap();
    }
    embedder.armed.store(true, Ordering::SeqCst);
    Arc::new(dense)
}

/// Scores documents by how many query words they contain
struct Overlap;

impl CrossEncoder for Overlap {
    fn predict(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        Ok(documents
            .iter()
            .map(|doc| {
                let doc = doc.to_lowercase();
                words.iter().filter(|w| doc.contains(w.as_str())).count() as f32
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "overlap"
    }
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "tokio",
            "Tokio is an asynchronous runtime for the Rust programming language",
            "https://tokio.rs",
        )
        .with_updated_at("2024-06-01T00:00:00Z")
        .with_credibility(0.9),
        Document::new(
            "serde",
            "Serde is a framework for serializing and deserializing Rust data structures",
            "https://serde.rs",
        )
        .with_credibility(0.9),
        Document::new(
            "python",
            "Python asyncio provides an event loop for asynchronous programs",
            "https://docs.python.org",
        ),
        Document::new(
            "tokio-mirror",
            "tokio is an ASYNCHRONOUS runtime for the rust programming language",
            "https://mirror.example.com",
        )
        .with_credibility(0.2),
    ]
}

fn build_backends(corpus: &[Document]) -> (Arc<DenseIndexClient>, Arc<KeywordIndexClient>) {
    let dense = DenseIndexClient::new(Arc::new(HashedWords), HnswParams::default());
    let keyword = KeywordIndexClient::in_memory().unwrap();

    for document in corpus {
        dense.insert(document).unwrap();
        keyword.insert(document).unwrap();
    }
    keyword.commit().unwrap();

    (Arc::new(dense), Arc::new(keyword))
}

#[tokio::test]
async fn test_backends_return_full_payloads() {
    let (dense, keyword) = build_backends(&corpus());

    let hits = keyword.search("serializing", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "serde");
    assert_eq!(hits[0].payload.credibility_score, Some(0.9));

    let hits = dense.search("asynchronous runtime rust", 10).await.unwrap();
    assert_eq!(hits.len(), 4);
    assert!(hits.iter().all(|h| h.payload.text.is_some()));
}

#[tokio::test]
async fn test_end_to_end_with_sqlite_cache() {
    let temp = TempDir::new().unwrap();
    let (dense, keyword) = build_backends(&corpus());
    let store = Arc::new(SqliteCache::open(&temp.path().join("cache.sqlite"), 1024).unwrap());
    let cache = ResultCache::new(
        store.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    );

    let retriever =
        HybridRetriever::new(dense, keyword, Arc::new(Overlap), cache, &Config::default())
            .unwrap();

    let first = retriever
        .retrieve_with("asynchronous rust runtime", RetrieveOptions::default().top_k(3))
        .await
        .unwrap();

    assert_eq!(first.status, RetrievalStatus::Fresh);
    assert!(!first.candidates.is_empty());
    assert!(first.candidates.len() <= 3);

    // The mirror is a case-folded copy of the tokio page
    let ids: Vec<&str> = first.candidates.iter().map(|c| c.id()).collect();
    assert!(ids.contains(&"tokio") ^ ids.contains(&"tokio-mirror"));
    assert!(first
        .candidates
        .windows(2)
        .all(|pair| pair[0].final_score >= pair[1].final_score));

    let second = retriever
        .retrieve_with("asynchronous rust runtime", RetrieveOptions::default().top_k(3))
        .await
        .unwrap();
    assert_eq!(second.status, RetrievalStatus::Cached);
    assert_eq!(
        serde_json::to_vec(&first.candidates).unwrap(),
        serde_json::to_vec(&second.candidates).unwrap()
    );

    // One query entry plus one rerank entry per fused candidate
    assert!(store.stats().unwrap().entries >= 2);
}

#[tokio::test]
async fn test_deadline_honoured_with_blocking_embedder() {
    let (_, keyword) = build_backends(&corpus());
    let dense = slow_dense(&corpus(), Duration::from_millis(300));
    let retriever = HybridRetriever::new(
        dense,
        keyword,
        Arc::new(Overlap),
        ResultCache::disabled(),
        &Config::default(),
    )
    .unwrap();

    let started = Instant::now();
    let result = retriever
        .retrieve_with(
            "asynchronous rust runtime",
            RetrieveOptions::default().timeout(Duration::from_millis(20)),
        )
        .await;

    assert!(matches!(
        result,
        Err(RankmixError::DeadlineExceeded { timeout_ms: 20 })
    ));
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn test_backend_searches_overlap() {
    let delay = Duration::from_millis(200);
    let retriever = HybridRetriever::new(
        slow_dense(&corpus(), delay),
        slow_dense(&corpus(), delay),
        Arc::new(Overlap),
        ResultCache::disabled(),
        &Config::default(),
    )
    .unwrap();

    let started = Instant::now();
    let results = retriever
        .retrieve("asynchronous rust runtime", Some(3))
        .await
        .unwrap();

    assert!(!results.is_empty());
    // Sequential searches would take at least twice the delay
    assert!(started.elapsed() < delay * 2);
}
