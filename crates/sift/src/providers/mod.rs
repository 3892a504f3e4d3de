//! External collaborators consumed through narrow trait surfaces

pub mod embedding;
pub mod extractor;
pub mod vector_store;

pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use extractor::{ExtractedText, PlainTextExtractor, TextExtractor};
pub use vector_store::{HttpVectorStore, VectorStore};
