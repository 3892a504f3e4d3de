//! Clean stage: text normalization
//!
//! Per-document and lossless with respect to identity: ids and metadata pass
//! through untouched. Documents that clean down to almost nothing are
//! dropped, not failed.

use unicode_normalization::UnicodeNormalization;

use crate::sources::html;
use crate::types::{CleanedDocument, RawDocument};

pub struct CleanStage {
    min_content_length: usize,
}

impl CleanStage {
    pub fn new(min_content_length: usize) -> Self {
        Self { min_content_length }
    }

    fn is_html(doc: &RawDocument) -> bool {
        doc.metadata
            .get("content_type")
            .and_then(|v| v.as_str())
            .map(|ct| ct.contains("html"))
            .unwrap_or(false)
    }

    fn clean_text(&self, text: &str) -> String {
        let normalized: String = text.nfc().collect();
        normalized.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Clean every document, dropping the ones that end up too short.
    pub fn execute(&self, documents: Vec<RawDocument>) -> Vec<CleanedDocument> {
        let input_count = documents.len();
        let mut cleaned = Vec::with_capacity(input_count);

        for doc in documents {
            let text = if Self::is_html(&doc) {
                html::html_to_text(&doc.content)
            } else {
                doc.content.clone()
            };
            let content = self.clean_text(&text);

            if content.chars().count() < self.min_content_length {
                tracing::info!(
                    document_id = %doc.id,
                    chars = content.chars().count(),
                    min = self.min_content_length,
                    "dropping document below minimum content length"
                );
                continue;
            }

            cleaned.push(CleanedDocument {
                word_count: content.split_whitespace().count(),
                char_count: content.chars().count(),
                id: doc.id,
                source: doc.source,
                content,
                metadata: doc.metadata,
                tenant_id: doc.tenant_id,
            });
        }

        tracing::info!(
            input = input_count,
            output = cleaned.len(),
            "clean stage complete"
        );
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentSource;
    use serde_json::{Map, Value};

    fn raw(content: &str) -> RawDocument {
        RawDocument::new(
            "doc-1",
            DocumentSource::FileUpload,
            content.to_string(),
            Map::new(),
            Some("tenant-a".into()),
        )
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        let stage = CleanStage::new(10);
        let docs = stage.execute(vec![raw("  Hello   world\n\nthis\tis   spaced  out text  ")]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "Hello world this is spaced out text");
        assert_eq!(docs[0].word_count, 7);
    }

    #[test]
    fn normalizes_unicode_to_nfc() {
        let stage = CleanStage::new(1);
        // "e" + combining acute accent composes to a single scalar.
        let docs = stage.execute(vec![raw("cafe\u{0301} et the\u{0301}")]);
        assert!(docs[0].content.contains('\u{00e9}'));
    }

    #[test]
    fn strips_html_when_content_type_says_so() {
        let mut doc = raw("<html><body><p>Real text here, long enough to keep.</p></body></html>");
        doc.metadata.insert(
            "content_type".into(),
            Value::String("text/html; charset=utf-8".into()),
        );
        let stage = CleanStage::new(10);
        let docs = stage.execute(vec![doc]);
        assert_eq!(docs[0].content, "Real text here, long enough to keep.");
    }

    #[test]
    fn short_documents_are_dropped_not_failed() {
        let stage = CleanStage::new(50);
        let docs = stage.execute(vec![
            raw("Hello world. This is a very short document."),
            raw("This one, in contrast, is comfortably longer than fifty characters overall."),
        ]);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.starts_with("This one"));
    }

    #[test]
    fn metadata_and_identity_pass_through() {
        let mut doc = raw("A document with enough text to survive the cleaning stage easily.");
        doc.metadata
            .insert("custom_key".into(), Value::String("custom_value".into()));
        let stage = CleanStage::new(10);
        let docs = stage.execute(vec![doc]);
        assert_eq!(docs[0].id, "doc-1");
        assert_eq!(docs[0].metadata["custom_key"], "custom_value");
        assert_eq!(docs[0].tenant_id.as_deref(), Some("tenant-a"));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let stage = CleanStage::new(50);
        assert!(stage.execute(vec![raw("")]).is_empty());
    }
}
