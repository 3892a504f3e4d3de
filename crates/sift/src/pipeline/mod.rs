//! The five-stage ingestion pipeline

pub mod chunk;
pub mod clean;
pub mod embed;
pub mod orchestrator;
pub mod store;

pub use chunk::{ChunkStage, ChunkStrategy};
pub use clean::CleanStage;
pub use embed::EmbedStage;
pub use orchestrator::Orchestrator;
pub use store::StoreStage;
