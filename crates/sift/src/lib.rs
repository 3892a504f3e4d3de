//! sift: multi-tenant document ingestion pipeline
//!
//! Turns heterogeneous source content (uploaded files, SEC filings, scraped
//! pages, HTTP APIs, SQL query results) into chunked, embedded,
//! tenant-partitioned records in an external vector store. Jobs traverse
//! five ordered stages (fetch, clean, chunk, embed, store) with durable
//! status tracking and per-stage telemetry.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod sources;
pub mod storage;
pub mod telemetry;
pub mod tokenizer;
pub mod types;

pub use config::SiftConfig;
pub use error::{Error, Result};
pub use types::{
    Chunk, CleanedDocument, DocumentSource, Embedding, JobRecord, JobStatus, RawDocument,
    SourceParams,
};
