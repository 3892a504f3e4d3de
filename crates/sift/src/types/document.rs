//! Document types produced and consumed by the pipeline stages
//!
//! `RawDocument`, `CleanedDocument`, `Chunk`, and `Embedding` are transient:
//! they live only inside one orchestrator execution. Only job counters and
//! the records handed to the vector store survive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The five supported ingestion sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    FileUpload,
    SecEdgar,
    UrlScrape,
    ApiFetch,
    DatabaseQuery,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileUpload => "file_upload",
            Self::SecEdgar => "sec_edgar",
            Self::UrlScrape => "url_scrape",
            Self::ApiFetch => "api_fetch",
            Self::DatabaseQuery => "database_query",
        }
    }
}

impl std::str::FromStr for DocumentSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file_upload" => Ok(Self::FileUpload),
            "sec_edgar" => Ok(Self::SecEdgar),
            "url_scrape" => Ok(Self::UrlScrape),
            "api_fetch" => Ok(Self::ApiFetch),
            "database_query" => Ok(Self::DatabaseQuery),
            other => Err(Error::validation(format!("unknown source: {other}"))),
        }
    }
}

impl std::fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched payload, as returned by a source adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    /// Adapter-assigned id, unique within one fetch
    pub id: String,
    pub source: DocumentSource,
    pub content: String,
    pub content_bytes_len: usize,
    /// Always carries `source` and `fetched_at`, plus adapter-specific keys
    pub metadata: Map<String, Value>,
    pub tenant_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RawDocument {
    /// Build a document with the metadata keys every adapter must stamp.
    pub fn new(
        id: impl Into<String>,
        source: DocumentSource,
        content: String,
        mut metadata: Map<String, Value>,
        tenant_id: Option<String>,
    ) -> Self {
        let fetched_at = Utc::now();
        metadata.insert("source".into(), Value::String(source.as_str().to_string()));
        metadata.insert(
            "fetched_at".into(),
            Value::String(fetched_at.to_rfc3339()),
        );
        Self {
            content_bytes_len: content.len(),
            id: id.into(),
            source,
            content,
            metadata,
            tenant_id,
            fetched_at,
        }
    }
}

/// A raw document after text normalization; identity and metadata survive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedDocument {
    pub id: String,
    pub source: DocumentSource,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub tenant_id: Option<String>,
    pub word_count: usize,
    pub char_count: usize,
}

/// A bounded-token segment of one cleaned document, the unit of embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic: `<document_id>-<position>`
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub token_count: usize,
    /// Zero-based ordinal within the parent document
    pub position: usize,
    /// Inherits the parent document's metadata
    pub metadata: Map<String, Value>,
    pub tenant_id: Option<String>,
}

impl Chunk {
    pub fn new(
        document_id: &str,
        content: String,
        token_count: usize,
        position: usize,
        metadata: Map<String, Value>,
        tenant_id: Option<String>,
    ) -> Self {
        Self {
            chunk_id: format!("{document_id}-{position}"),
            document_id: document_id.to_string(),
            content,
            token_count,
            position,
            metadata,
            tenant_id,
        }
    }
}

/// A vector bound to a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
    pub estimated_cost: f64,
}

/// One record handed to the downstream vector store
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// Deterministic fallback id for payloads that carry no natural identity.
pub fn content_hash_id(prefix: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(24);
    for byte in digest.iter().take(12) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{prefix}-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_document_stamps_source_and_fetched_at() {
        let doc = RawDocument::new(
            "doc-1",
            DocumentSource::FileUpload,
            "hello".to_string(),
            Map::new(),
            Some("tenant-a".into()),
        );
        assert_eq!(doc.metadata["source"], "file_upload");
        assert!(doc.metadata.contains_key("fetched_at"));
        assert_eq!(doc.content_bytes_len, 5);
    }

    #[test]
    fn chunk_id_is_document_id_plus_position() {
        let chunk = Chunk::new("doc-9", "text".into(), 1, 3, Map::new(), None);
        assert_eq!(chunk.chunk_id, "doc-9-3");
    }

    #[test]
    fn content_hash_id_is_deterministic() {
        let a = content_hash_id("db", "row data");
        let b = content_hash_id("db", "row data");
        let c = content_hash_id("db", "other row");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("db-"));
    }

    #[test]
    fn source_round_trips_through_strings() {
        for src in [
            DocumentSource::FileUpload,
            DocumentSource::SecEdgar,
            DocumentSource::UrlScrape,
            DocumentSource::ApiFetch,
            DocumentSource::DatabaseQuery,
        ] {
            assert_eq!(src.as_str().parse::<DocumentSource>().unwrap(), src);
        }
        assert!("carrier_pigeon".parse::<DocumentSource>().is_err());
    }
}
