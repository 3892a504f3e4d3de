//! Core data types flowing through the pipeline

pub mod document;
pub mod job;
pub mod params;

pub use document::{
    Chunk, CleanedDocument, DocumentSource, Embedding, RawDocument, VectorRecord,
};
pub use job::{JobFilter, JobPage, JobPatch, JobRecord, JobStatus};
pub use params::{
    ApiFetchParams, ApiPagination, AuthSpec, DatabaseQueryParams, FileUploadParams,
    SecEdgarParams, SourceParams, UrlScrapeParams,
};
