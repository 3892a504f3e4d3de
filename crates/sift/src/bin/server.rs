//! Ingestion server binary
//!
//! Run with: cargo run -p sift --bin sift-server

use sift::{config::SiftConfig, server::Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sift=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SiftConfig::from_env()?;
    tracing::info!("configuration loaded");
    tracing::info!("  - job store: {}", config.storage.database_url);
    tracing::info!(
        "  - chunking: {} (size {}, overlap {})",
        config.chunking.strategy.as_str(),
        config.chunking.chunk_size,
        config.chunking.overlap
    );
    tracing::info!("  - embedding model: {}", config.embedding.model);
    tracing::info!("  - vector store: {}", config.vector_store.base_url);
    tracing::info!(
        "  - workers: {} jobs, {} embed batches per job",
        config.processing.max_workers,
        config.processing.max_workers_embed
    );

    let server = Server::new(config).await?;
    server.start().await?;

    Ok(())
}
