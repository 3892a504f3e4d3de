//! Text extraction port for uploaded files
//!
//! Format-specific parsers (PDF, DOCX) are external collaborators; the
//! pipeline consumes them through this trait. The bundled implementation
//! handles text-like formats only.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Extraction result: plain text plus whatever metadata the parser produced
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Trait for turning file bytes into text
pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes` of the given MIME type or extension hint.
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<ExtractedText>;

    /// Extensions this extractor can handle.
    fn supported_extensions(&self) -> &[&str];
}

/// Extractor for formats that are already text.
pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "html", "htm", "xml"];

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<ExtractedText> {
        let hint = mime.rsplit('/').next().unwrap_or(mime).to_lowercase();
        if !TEXT_EXTENSIONS.contains(&hint.as_str()) && !hint.starts_with("plain") {
            return Err(Error::validation(format!(
                "unsupported file format: {mime}"
            )));
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        let mut metadata = Map::new();
        metadata.insert("extractor".into(), Value::String("plain_text".into()));
        metadata.insert(
            "extracted_chars".into(),
            Value::Number(text.chars().count().into()),
        );

        Ok(ExtractedText { text, metadata })
    }

    fn supported_extensions(&self) -> &[&str] {
        TEXT_EXTENSIONS
    }
}
