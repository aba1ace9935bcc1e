//! Documents, backend hits and per-query candidates

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a backend payload cannot become a [`Document`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedPayload {
    #[error("Document {0} has no text")]
    MissingText(String),
}

/// An indexed document, read-only to the retrieval engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque unique identifier
    pub id: String,

    /// Content body
    pub text: String,

    /// Origin identifier (file path or URL)
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Raw timestamps as stored by the index; parsed lazily by scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    /// Source trust prior in [0, 1], assigned at ingestion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credibility_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            url: None,
            created_at: None,
            updated_at: None,
            credibility_score: None,
            page: None,
            section: None,
        }
    }

    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    pub fn with_credibility(mut self, credibility: f64) -> Self {
        self.credibility_score = Some(credibility);
        self
    }

    /// Payload form of this document, as a backend would return it
    pub fn to_payload(&self) -> DocumentPayload {
        DocumentPayload {
            text: Some(self.text.clone()),
            source: Some(self.source.clone()),
            url: self.url.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            credibility_score: self.credibility_score,
            page: self.page,
            section: self.section.clone(),
        }
    }
}

/// Document fields exactly as a search backend returned them
///
/// Every field is optional here; [`DocumentPayload::into_document`] decides
/// whether the payload is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentPayload {
    pub text: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub credibility_score: Option<f64>,
    pub page: Option<u32>,
    pub section: Option<String>,
}

impl DocumentPayload {
    /// Build a document, rejecting payloads without usable text
    pub fn into_document(self, id: String) -> Result<Document, MalformedPayload> {
        let text = match self.text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(MalformedPayload::MissingText(id)),
        };

        Ok(Document {
            id,
            text,
            source: self.source.unwrap_or_default(),
            url: self.url.filter(|u| !u.is_empty()),
            created_at: self.created_at.filter(|t| !t.is_empty()),
            updated_at: self.updated_at.filter(|t| !t.is_empty()),
            credibility_score: self.credibility_score,
            page: self.page,
            section: self.section.filter(|s| !s.is_empty()),
        })
    }
}

/// One ranked result from a search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Backend-native score (cosine similarity or BM25)
    pub score: f64,
    pub payload: DocumentPayload,
}

impl SearchHit {
    pub fn new(id: impl Into<String>, score: f64, payload: DocumentPayload) -> Self {
        Self {
            id: id.into(),
            score,
            payload,
        }
    }
}

/// A document plus the transient scores of a single retrieval call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub document: Document,

    /// Zero-based position in the dense result list
    pub dense_rank: Option<usize>,

    /// Zero-based position in the keyword result list
    pub bm25_rank: Option<usize>,

    pub rrf_score: f64,

    /// Cross-encoder output, unbounded
    pub rerank_score: Option<f64>,

    /// In (0, 1]
    pub freshness_score: Option<f64>,

    pub final_score: Option<f64>,
}

impl Candidate {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            dense_rank: None,
            bm25_rank: None,
            rrf_score: 0.0,
            rerank_score: None,
            freshness_score: None,
            final_score: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn text(&self) -> &str {
        &self.document.text
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.document.text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &self.document.text[..idx]),
            None => self.document.text.clone(),
        }
    }
}
