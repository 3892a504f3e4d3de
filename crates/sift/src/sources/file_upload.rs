//! File-upload source adapter
//!
//! Reads a file already present on local disk (placed there by the upload
//! façade), runs it through the text-extractor port, and emits a single
//! document.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::FileUploadConfig;
use crate::error::{Error, Result};
use crate::providers::TextExtractor;
use crate::types::document::content_hash_id;
use crate::types::{DocumentSource, RawDocument, SourceParams};

use super::SourceAdapter;

pub struct FileUploadAdapter {
    extractor: Arc<dyn TextExtractor>,
    cfg: FileUploadConfig,
}

impl FileUploadAdapter {
    pub fn new(extractor: Arc<dyn TextExtractor>, cfg: FileUploadConfig) -> Self {
        Self { extractor, cfg }
    }

    fn extension(path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    fn params<'a>(&self, params: &'a SourceParams) -> Result<&'a str> {
        match params {
            SourceParams::FileUpload(p) => Ok(&p.file_path),
            _ => Err(Error::validation("expected file_upload parameters")),
        }
    }
}

#[async_trait]
impl SourceAdapter for FileUploadAdapter {
    fn source(&self) -> DocumentSource {
        DocumentSource::FileUpload
    }

    fn validate(&self, params: &SourceParams) -> Result<()> {
        let file_path = self.params(params)?;
        let path = Path::new(file_path);

        let meta = std::fs::metadata(path)
            .map_err(|_| Error::not_found(format!("file does not exist: {file_path}")))?;
        if !meta.is_file() {
            return Err(Error::validation(format!("not a regular file: {file_path}")));
        }
        if meta.len() as usize > self.cfg.max_file_size {
            return Err(Error::SizeExceeded(format!(
                "file is {} bytes (max: {})",
                meta.len(),
                self.cfg.max_file_size
            )));
        }

        let ext = Self::extension(path);
        if !self.extractor.supported_extensions().contains(&ext.as_str()) {
            return Err(Error::validation(format!(
                "unsupported file extension: '{ext}'"
            )));
        }

        Ok(())
    }

    async fn fetch(
        &self,
        _cancel: &CancellationToken,
        params: &SourceParams,
        tenant_id: Option<&str>,
    ) -> Result<Vec<RawDocument>> {
        self.validate(params)?;
        let file_path = self.params(params)?.to_string();
        let path = Path::new(&file_path);

        let bytes = tokio::fs::read(path).await?;
        let ext = Self::extension(path);
        let extracted = self.extractor.extract(&bytes, &ext)?;

        tracing::info!(
            file_path = %file_path,
            bytes = bytes.len(),
            chars = extracted.text.len(),
            "extracted text from uploaded file"
        );

        let mut metadata = extracted.metadata;
        metadata.insert("source_path".into(), Value::String(file_path.clone()));
        metadata.insert(
            "file_name".into(),
            Value::String(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("")
                    .to_string(),
            ),
        );
        metadata.insert("file_size".into(), Value::Number(bytes.len().into()));
        metadata.insert("file_extension".into(), Value::String(ext));

        let doc = RawDocument::new(
            content_hash_id("file", &file_path),
            DocumentSource::FileUpload,
            extracted.text,
            metadata,
            tenant_id.map(str::to_string),
        );

        Ok(vec![doc])
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn supported_formats(&self) -> &[&str] {
        self.extractor.supported_extensions()
    }
}
