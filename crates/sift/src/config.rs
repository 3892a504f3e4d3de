//! Configuration for the ingestion pipeline
//!
//! Nested sections with defaults; `SiftConfig::from_env()` overlays the
//! recognized environment variables on top of those defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::chunk::ChunkStrategy;

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiftConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Job store configuration
    pub storage: StorageConfig,
    /// Pipeline orchestration configuration
    pub processing: ProcessingConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,
    /// Downstream vector store configuration
    pub vector_store: VectorStoreConfig,
    /// Telemetry collector configuration
    pub telemetry: TelemetryConfig,
    /// Outbound rate limits, seconds between requests per key
    pub rate_limits: RateLimitConfig,
    /// Retry policy for outbound operations
    pub retry: RetryConfig,
    /// SEC EDGAR adapter knobs
    pub sec_edgar: SecEdgarConfig,
    /// URL scrape adapter knobs
    pub url_scrape: UrlScrapeConfig,
    /// API fetch adapter knobs
    pub api_fetch: ApiFetchConfig,
    /// Database query adapter knobs
    pub db_query: DbQueryConfig,
    /// File upload adapter knobs
    pub file_upload: FileUploadConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// CORS allowed origins (empty = allow any)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
            allowed_origins: Vec::new(),
        }
    }
}

/// Job store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database URL for the job store (e.g. `sqlite://sift-jobs.db`)
    pub database_url: String,
    /// Connection pool size
    pub pool_size: u32,
    /// Extra connections allowed beyond the pool size
    pub max_overflow: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://sift-jobs.db".to_string(),
            pool_size: 10,
            max_overflow: 20,
        }
    }
}

/// Pipeline orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum concurrent jobs across the process
    pub max_workers: usize,
    /// Maximum concurrent embedding batches within one job
    pub max_workers_embed: usize,
    /// Per-stage timeout in seconds
    pub stage_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_workers_embed: 4,
            stage_timeout_secs: 600,
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk
    pub chunk_size: usize,
    /// Token overlap between adjacent chunks (must be < chunk_size)
    pub overlap: usize,
    /// Strategy: token, semantic, or hybrid
    pub strategy: ChunkStrategy,
    /// Cosine similarity below which a semantic boundary is placed
    pub similarity_threshold: f32,
    /// Tokenizer encoding or model name (e.g. `cl100k_base`)
    pub tokenizer_model: String,
    /// Minimum cleaned-content length in characters; shorter documents drop
    pub min_content_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
            strategy: ChunkStrategy::Hybrid,
            similarity_threshold: 0.5,
            tokenizer_model: "cl100k_base".to_string(),
            min_content_length: 50,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider base URL (OpenAI-compatible `/embeddings` endpoint)
    pub base_url: String,
    /// API key
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Chunks per provider call
    pub batch_size: usize,
    /// Price per 1000 tokens, used for cost accounting
    pub unit_cost_per_1k_tokens: f64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            batch_size: 100,
            unit_cost_per_1k_tokens: 0.00002,
            timeout_secs: 60,
        }
    }
}

/// Downstream vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Base URL of the vector store service
    pub base_url: String,
    /// Bearer credential, if the store requires one
    pub api_key: String,
    /// Records per upsert call
    pub batch_size: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            api_key: String::new(),
            batch_size: 200,
            timeout_secs: 30,
        }
    }
}

/// Telemetry collector configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    /// Collector endpoint; empty disables emission
    pub endpoint: String,
    /// Post timeout in seconds
    pub timeout_secs: u64,
}

/// Seconds between successive outbound requests, per limiter key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// SEC EDGAR spacing (0.1 = 10 requests/second, the SEC fair-access cap)
    pub sec_edgar: f64,
    /// Per-host spacing for scraped pages
    pub url_scrape: f64,
    /// Per-host spacing for API fetches
    pub api_fetch: f64,
    /// Spacing for embedding provider calls
    pub embedding: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sec_edgar: 0.1,
            url_scrape: 1.0,
            api_fetch: 0.5,
            embedding: 0.05,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per operation
    pub max_attempts: u32,
    /// Initial delay in seconds
    pub initial_delay_secs: f64,
    /// Exponential multiplier
    pub multiplier: f64,
    /// Delay ceiling in seconds
    pub max_delay_secs: f64,
    /// Random fraction added to each delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1.0,
            multiplier: 2.0,
            max_delay_secs: 60.0,
            jitter: 0.1,
        }
    }
}

/// SEC EDGAR adapter knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecEdgarConfig {
    /// User-Agent; the SEC requires contact information in it
    pub user_agent: String,
    /// Maximum filing size in bytes
    pub max_filing_size: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SecEdgarConfig {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            max_filing_size: 50 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

/// URL scrape adapter knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlScrapeConfig {
    /// User-Agent for page fetches and robots.txt matching
    pub user_agent: String,
    /// Honor robots.txt
    pub respect_robots: bool,
    /// Maximum page size in bytes
    pub max_content_size: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for UrlScrapeConfig {
    fn default() -> Self {
        Self {
            user_agent: "sift/0.3 (ingestion bot)".to_string(),
            respect_robots: true,
            max_content_size: 10 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

/// API fetch adapter knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFetchConfig {
    /// User-Agent for API requests
    pub user_agent: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Verify upstream TLS certificates
    pub verify_ssl: bool,
    /// Maximum items across all pages of one fetch
    pub max_items: usize,
}

impl Default for ApiFetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "sift/0.3 (api integration)".to_string(),
            timeout_secs: 30,
            verify_ssl: true,
            max_items: 1000,
        }
    }
}

/// Database query adapter knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbQueryConfig {
    /// Reject anything that is not a plain SELECT/WITH query
    pub read_only: bool,
    /// Per-query timeout in seconds
    pub timeout_secs: u64,
    /// Row cap per query; hard-limited to 10_000
    pub max_rows: usize,
    /// Pool size per distinct connection string
    pub pool_size: u32,
}

impl Default for DbQueryConfig {
    fn default() -> Self {
        Self {
            read_only: true,
            timeout_secs: 30,
            max_rows: 1000,
            pool_size: 5,
        }
    }
}

/// File upload adapter knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadConfig {
    /// Maximum file size in bytes
    pub max_file_size: usize,
}

impl Default for FileUploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw}"))),
    }
}

impl SiftConfig {
    /// Load configuration from the environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = env_var("SIFT_HOST") {
            cfg.server.host = v;
        }
        if let Some(v) = env_parse("SIFT_PORT")? {
            cfg.server.port = v;
        }
        if let Some(v) = env_var("ALLOWED_ORIGINS") {
            cfg.server.allowed_origins =
                v.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Some(v) = env_var("DATABASE_URL") {
            cfg.storage.database_url = v;
        }
        if let Some(v) = env_parse("DATABASE_POOL_SIZE")? {
            cfg.storage.pool_size = v;
        }
        if let Some(v) = env_parse("DATABASE_MAX_OVERFLOW")? {
            cfg.storage.max_overflow = v;
        }

        if let Some(v) = env_parse("MAX_WORKERS")? {
            cfg.processing.max_workers = v;
        }
        if let Some(v) = env_parse("MAX_WORKERS_EMBED")? {
            cfg.processing.max_workers_embed = v;
        }
        if let Some(v) = env_parse("STAGE_TIMEOUT_SECS")? {
            cfg.processing.stage_timeout_secs = v;
        }

        if let Some(v) = env_parse("CHUNK_SIZE")? {
            cfg.chunking.chunk_size = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP")? {
            cfg.chunking.overlap = v;
        }
        if let Some(v) = env_var("CHUNK_STRATEGY") {
            cfg.chunking.strategy = v.parse()?;
        }
        if let Some(v) = env_parse("SIMILARITY_THRESHOLD")? {
            cfg.chunking.similarity_threshold = v;
        }
        if let Some(v) = env_var("TOKENIZER_MODEL") {
            cfg.chunking.tokenizer_model = v;
        }
        if let Some(v) = env_parse("MIN_CONTENT_LENGTH")? {
            cfg.chunking.min_content_length = v;
        }

        if let Some(v) = env_var("EMBEDDING_BASE_URL") {
            cfg.embedding.base_url = v;
        }
        if let Some(v) = env_var("EMBEDDING_PROVIDER_API_KEY") {
            cfg.embedding.api_key = v;
        }
        if let Some(v) = env_var("EMBEDDING_MODEL") {
            cfg.embedding.model = v;
        }
        if let Some(v) = env_parse("EMBEDDING_BATCH_SIZE")? {
            cfg.embedding.batch_size = v;
        }
        if let Some(v) = env_parse("EMBEDDING_UNIT_COST_PER_1K")? {
            cfg.embedding.unit_cost_per_1k_tokens = v;
        }

        if let Some(v) = env_var("VECTOR_STORE_BASE_URL") {
            cfg.vector_store.base_url = v;
        }
        if let Some(v) = env_var("VECTOR_STORE_API_KEY") {
            cfg.vector_store.api_key = v;
        }
        if let Some(v) = env_parse("VECTOR_STORE_BATCH_SIZE")? {
            cfg.vector_store.batch_size = v;
        }

        if let Some(v) = env_var("TELEMETRY_ENDPOINT") {
            cfg.telemetry.endpoint = v;
        }

        if let Some(v) = env_parse("SEC_EDGAR_RATE_LIMIT")? {
            cfg.rate_limits.sec_edgar = v;
        }
        if let Some(v) = env_parse("URL_SCRAPE_RATE_LIMIT")? {
            cfg.rate_limits.url_scrape = v;
        }
        if let Some(v) = env_parse("API_FETCH_RATE_LIMIT")? {
            cfg.rate_limits.api_fetch = v;
        }
        if let Some(v) = env_parse("EMBEDDING_RATE_LIMIT")? {
            cfg.rate_limits.embedding = v;
        }

        if let Some(v) = env_parse("RETRY_ATTEMPTS")? {
            cfg.retry.max_attempts = v;
        }
        if let Some(v) = env_parse("RETRY_DELAY")? {
            cfg.retry.initial_delay_secs = v;
        }
        if let Some(v) = env_parse("RETRY_BACKOFF")? {
            cfg.retry.multiplier = v;
        }

        if let Some(v) = env_var("SEC_EDGAR_USER_AGENT") {
            cfg.sec_edgar.user_agent = v;
        }
        if let Some(v) = env_parse("SEC_EDGAR_MAX_FILING_SIZE")? {
            cfg.sec_edgar.max_filing_size = v;
        }

        if let Some(v) = env_var("URL_SCRAPE_USER_AGENT") {
            cfg.url_scrape.user_agent = v;
        }
        if let Some(v) = env_parse("URL_SCRAPE_RESPECT_ROBOTS")? {
            cfg.url_scrape.respect_robots = v;
        }
        if let Some(v) = env_parse("URL_SCRAPE_MAX_SIZE")? {
            cfg.url_scrape.max_content_size = v;
        }
        if let Some(v) = env_parse("URL_SCRAPE_TIMEOUT")? {
            cfg.url_scrape.timeout_secs = v;
        }

        if let Some(v) = env_parse("API_FETCH_TIMEOUT")? {
            cfg.api_fetch.timeout_secs = v;
        }
        if let Some(v) = env_parse("API_FETCH_VERIFY_SSL")? {
            cfg.api_fetch.verify_ssl = v;
        }

        if let Some(v) = env_parse("DB_QUERY_READ_ONLY")? {
            cfg.db_query.read_only = v;
        }
        if let Some(v) = env_parse("DB_QUERY_TIMEOUT")? {
            cfg.db_query.timeout_secs = v;
        }
        if let Some(v) = env_parse("DB_QUERY_MAX_ROWS")? {
            cfg.db_query.max_rows = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.db_query.max_rows > 10_000 {
            return Err(Error::Config(format!(
                "db_query.max_rows ({}) exceeds the hard limit of 10000",
                self.db_query.max_rows
            )));
        }
        Ok(())
    }
}
