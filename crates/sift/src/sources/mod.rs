//! Source adapters
//!
//! Each adapter implements the same capability set; the orchestrator selects
//! one by the job's source tag. Adapters hold their expensive resources
//! (HTTP clients, engine caches) and are reused across jobs.

pub mod api_fetch;
pub mod database_query;
pub mod file_upload;
pub mod html;
pub mod robots;
pub mod sec_edgar;
pub mod sitemap;
pub mod url_scrape;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::{DocumentSource, RawDocument, SourceParams};

pub use api_fetch::ApiFetchAdapter;
pub use database_query::DatabaseQueryAdapter;
pub use file_upload::FileUploadAdapter;
pub use sec_edgar::SecEdgarAdapter;
pub use url_scrape::UrlScrapeAdapter;

/// The capability set every source adapter provides
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source tag this adapter serves.
    fn source(&self) -> DocumentSource;

    /// Reject bad parameters before any I/O.
    fn validate(&self, params: &SourceParams) -> Result<()>;

    /// Fetch documents. Returns a complete list or an error, never a partial
    /// commit.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        params: &SourceParams,
        tenant_id: Option<&str>,
    ) -> Result<Vec<RawDocument>>;

    /// Whether the adapter's upstream is reachable.
    async fn health_check(&self) -> bool;

    /// Informational list of formats the adapter understands.
    fn supported_formats(&self) -> &[&str];
}

/// Owns the five adapters and dispatches by source tag.
pub struct AdapterRegistry {
    adapters: HashMap<DocumentSource, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.source(), a)).collect(),
        }
    }

    pub fn get(&self, source: DocumentSource) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&source)
            .cloned()
            .ok_or_else(|| Error::validation(format!("no adapter registered for '{source}'")))
    }
}

/// Enforce document-id uniqueness within one fetch.
///
/// Adapters assign stable ids; if two collide, later ones get a
/// deterministic content-hash suffix so downstream chunk ids stay unique.
pub fn dedupe_document_ids(documents: &mut [RawDocument]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for doc in documents.iter_mut() {
        let count = seen.entry(doc.id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            let suffix = crate::types::document::content_hash_id("dup", &doc.content);
            doc.id = format!("{}-{}", doc.id, &suffix[4..12]);
        }
    }
}
