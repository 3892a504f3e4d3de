//! Chunk stage: token-accurate segmentation
//!
//! Three strategies over cleaned text. TOKEN packs sentences into a sliding
//! window, snapping the window edge to a sentence end when one falls in the
//! last 20%. SEMANTIC places boundaries where adjacent-sentence similarity
//! drops below the threshold. HYBRID uses semantic boundaries and token
//! post-splitting inside oversized runs.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::tokenizer::Tokenizer;
use crate::types::{Chunk, CleanedDocument};

/// Sentences per provider call when detecting semantic boundaries
const SENTENCE_EMBED_BATCH: usize = 32;

/// Chunking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Token,
    Semantic,
    #[default]
    Hybrid,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for ChunkStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "token" => Ok(Self::Token),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::Config(format!(
                "unknown chunk strategy '{other}' (expected token, semantic, hybrid)"
            ))),
        }
    }
}

pub struct ChunkStage {
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cfg: ChunkingConfig,
}

impl ChunkStage {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        cfg: ChunkingConfig,
    ) -> Self {
        Self {
            tokenizer,
            embedder,
            cfg,
        }
    }

    /// Chunk every document; positions are dense and zero-based per parent.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        documents: &[CleanedDocument],
    ) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();

        for doc in documents {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let pieces = match self.cfg.strategy {
                ChunkStrategy::Token => self.token_pack(&doc.content)?,
                ChunkStrategy::Semantic | ChunkStrategy::Hybrid => {
                    self.semantic_pack(cancel, &doc.content).await?
                }
            };

            let mut position = 0usize;
            for piece in pieces {
                if piece.is_empty() {
                    continue;
                }
                let token_count = self.tokenizer.count_tokens(&piece);
                if token_count == 0 {
                    continue;
                }

                let mut metadata = doc.metadata.clone();
                metadata.insert(
                    "chunk_strategy".into(),
                    Value::String(self.cfg.strategy.as_str().into()),
                );
                metadata.insert(
                    "chunk_size_tokens".into(),
                    Value::Number(self.cfg.chunk_size.into()),
                );
                metadata.insert(
                    "overlap_tokens".into(),
                    Value::Number(self.cfg.overlap.into()),
                );

                chunks.push(Chunk::new(
                    &doc.id,
                    piece,
                    token_count,
                    position,
                    metadata,
                    doc.tenant_id.clone(),
                ));
                position += 1;
            }

            tracing::debug!(
                document_id = %doc.id,
                chunk_count = position,
                strategy = self.cfg.strategy.as_str(),
                "chunked document"
            );
        }

        tracing::info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "chunk stage complete"
        );
        Ok(chunks)
    }

    fn sentences(text: &str) -> Vec<String> {
        text.split_sentence_bounds()
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Last `overlap` tokens of a chunk, carried verbatim into the next one.
    fn overlap_tail(&self, text: &str) -> Result<String> {
        if self.cfg.overlap == 0 {
            return Ok(String::new());
        }
        let tokens = self.tokenizer.encode(text);
        if tokens.is_empty() {
            return Ok(String::new());
        }
        let take = self.cfg.overlap.min(tokens.len());
        self.tokenizer.decode(&tokens[tokens.len() - take..])
    }

    /// Split a single over-long sentence into token slices of at most
    /// `width` tokens. Decoding per-slice is lossless, so the concatenation
    /// of the slices reproduces the sentence exactly.
    fn slice_sentence(&self, sentence: &str, width: usize) -> Result<Vec<String>> {
        let tokens = self.tokenizer.encode(sentence);
        if tokens.len() <= width {
            return Ok(vec![sentence.to_string()]);
        }
        let mut slices = Vec::new();
        let mut start = 0usize;
        while start < tokens.len() {
            let end = (start + width).min(tokens.len());
            slices.push(self.tokenizer.decode(&tokens[start..end])?);
            start = end;
        }
        Ok(slices)
    }

    /// TOKEN strategy: sentence-aware sliding window.
    fn token_pack(&self, text: &str) -> Result<Vec<String>> {
        let chunk_size = self.cfg.chunk_size;
        // Pieces must fit next to a full overlap carry.
        let max_piece = chunk_size.saturating_sub(self.cfg.overlap).max(1);

        let mut queue: VecDeque<String> = VecDeque::new();
        for sentence in Self::sentences(text) {
            for slice in self.slice_sentence(&sentence, max_piece)? {
                queue.push_back(slice);
            }
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut has_fresh_content = false;

        while let Some(piece) = queue.pop_front() {
            if current.is_empty() {
                current = piece;
                has_fresh_content = true;
                continue;
            }

            let mut candidate = current.clone();
            candidate.push_str(&piece);
            if self.tokenizer.count_tokens(&candidate) <= chunk_size {
                current = candidate;
                has_fresh_content = true;
                continue;
            }

            // The window is full. Snap to the sentence end if it falls in the
            // last 20% of the window; otherwise hard-fill from the next piece.
            let current_tokens = self.tokenizer.count_tokens(&current);
            let snap = has_fresh_content && current_tokens * 5 >= chunk_size * 4;

            if snap {
                queue.push_front(piece);
            } else {
                let piece_tokens = self.tokenizer.encode(&piece);
                let budget = chunk_size.saturating_sub(current_tokens);
                let mut take = budget.min(piece_tokens.len());
                let mut head = self.tokenizer.decode(&piece_tokens[..take])?;
                while take > 0 {
                    let mut filled = current.clone();
                    filled.push_str(&head);
                    if self.tokenizer.count_tokens(&filled) <= chunk_size {
                        break;
                    }
                    take -= 1;
                    head = self.tokenizer.decode(&piece_tokens[..take])?;
                }

                if take == 0 {
                    if has_fresh_content {
                        queue.push_front(piece);
                    } else {
                        // A stale carry alone fills the window; drop it so
                        // the loop keeps making progress.
                        current = piece;
                        has_fresh_content = true;
                        continue;
                    }
                } else {
                    current.push_str(&head);
                    has_fresh_content = true;
                    let tail = self.tokenizer.decode(&piece_tokens[take..])?;
                    if !tail.is_empty() {
                        queue.push_front(tail);
                    }
                }
            }

            let carry = self.overlap_tail(&current)?;
            chunks.push(std::mem::take(&mut current));
            current = carry;
            has_fresh_content = false;
        }

        // Emit the final window unless it is nothing but carried overlap.
        if !current.is_empty() && has_fresh_content {
            chunks.push(current);
        }

        Ok(chunks)
    }

    /// SEMANTIC / HYBRID: boundary detection, then per-run token splitting.
    async fn semantic_pack(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<String>> {
        let sentences = Self::sentences(text);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let Some(embedder) = &self.embedder else {
            tracing::warn!(
                "no embedding provider available for semantic chunking, using token strategy"
            );
            return self.token_pack(text);
        };

        if sentences.len() < 2 {
            return self.token_pack(text);
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(sentences.len());
        for batch in sentences.chunks(SENTENCE_EMBED_BATCH) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let trimmed: Vec<String> = batch.iter().map(|s| s.trim().to_string()).collect();
            vectors.extend(embedder.embed_batch(&trimmed).await?);
        }
        if vectors.len() != sentences.len() {
            return Err(Error::internal(format!(
                "expected {} sentence embeddings, got {}",
                sentences.len(),
                vectors.len()
            )));
        }

        // A boundary sits after sentence i when similarity(i, i+1) drops
        // below the threshold.
        let mut runs: Vec<String> = Vec::new();
        let mut run = String::new();
        for (i, sentence) in sentences.iter().enumerate() {
            run.push_str(sentence);
            let boundary = i + 1 < sentences.len()
                && cosine_similarity(&vectors[i], &vectors[i + 1]) < self.cfg.similarity_threshold;
            if boundary {
                runs.push(std::mem::take(&mut run));
            }
        }
        if !run.is_empty() {
            runs.push(run);
        }

        let mut pieces = Vec::new();
        for run in runs {
            if self.tokenizer.count_tokens(&run) <= self.cfg.chunk_size {
                pieces.push(run);
            } else {
                pieces.extend(self.token_pack(&run)?);
            }
        }
        Ok(pieces)
    }
}

/// Cosine similarity between two vectors; zero-magnitude vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TiktokenTokenizer;
    use crate::types::DocumentSource;
    use async_trait::async_trait;
    use serde_json::Map;

    fn tokenizer() -> Arc<dyn Tokenizer> {
        Arc::new(TiktokenTokenizer::new("cl100k_base").unwrap())
    }

    fn cleaned(content: &str) -> CleanedDocument {
        let mut metadata = Map::new();
        metadata.insert("origin".into(), Value::String("unit-test".into()));
        CleanedDocument {
            id: "doc-1".into(),
            source: DocumentSource::FileUpload,
            content: content.to_string(),
            metadata,
            tenant_id: Some("tenant-a".into()),
            word_count: content.split_whitespace().count(),
            char_count: content.chars().count(),
        }
    }

    fn stage(cfg: ChunkingConfig) -> ChunkStage {
        ChunkStage::new(tokenizer(), None, cfg)
    }

    fn token_cfg(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
            strategy: ChunkStrategy::Token,
            ..ChunkingConfig::default()
        }
    }

    fn long_text() -> String {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "Sentence number {i} talks about the ingestion pipeline and its stages. "
            ));
        }
        text.trim_end().to_string()
    }

    /// Strip the overlap between consecutive chunks and reassemble.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            if out.is_empty() {
                out.push_str(&chunk.content);
                continue;
            }
            let max = chunk.content.len().min(out.len());
            let mut skip = 0;
            for k in (1..=max).rev() {
                if out.ends_with(&chunk.content[..k]) {
                    skip = k;
                    break;
                }
            }
            out.push_str(&chunk.content[skip..]);
        }
        out
    }

    #[tokio::test]
    async fn short_document_is_one_chunk() {
        let s = stage(token_cfg(500, 50));
        let doc = cleaned("A short document that fits in one chunk.");
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].chunk_id, "doc-1-0");
        assert!(chunks[0].token_count > 0);
    }

    #[tokio::test]
    async fn token_chunks_respect_the_size_bound() {
        let s = stage(token_cfg(60, 10));
        let doc = cleaned(&long_text());
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();

        assert!(chunks.len() > 3);
        for chunk in &chunks {
            assert!(chunk.token_count > 0);
            assert!(
                chunk.token_count <= 60,
                "chunk {} has {} tokens",
                chunk.position,
                chunk.token_count
            );
        }
    }

    #[tokio::test]
    async fn positions_are_dense_and_zero_based() {
        let s = stage(token_cfg(60, 10));
        let doc = cleaned(&long_text());
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
            assert_eq!(chunk.document_id, "doc-1");
        }
    }

    #[tokio::test]
    async fn overlap_dedup_reconstructs_the_document() {
        let text = long_text();
        let s = stage(token_cfg(60, 10));
        let doc = cleaned(&text);
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        assert_eq!(reconstruct(&chunks), text);
    }

    #[tokio::test]
    async fn zero_overlap_concatenates_exactly() {
        let text = long_text();
        let s = stage(token_cfg(60, 0));
        let doc = cleaned(&text);
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn adjacent_chunks_share_the_overlap_window() {
        let s = stage(token_cfg(60, 10));
        let doc = cleaned(&long_text());
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            // The next chunk starts with text the previous chunk ends with.
            let next_prefix: String = pair[1].content.chars().take(8).collect();
            assert!(
                pair[0].content.contains(next_prefix.trim_start()),
                "no shared overlap between positions {} and {}",
                pair[0].position,
                pair[1].position
            );
        }
    }

    #[tokio::test]
    async fn single_giant_sentence_is_hard_split() {
        // No sentence boundaries at all: one long run of distinct words.
        let text = (0..400)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let s = stage(token_cfg(50, 5));
        let doc = cleaned(&text);
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 50);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[tokio::test]
    async fn metadata_is_inherited_and_annotated() {
        let s = stage(token_cfg(60, 10));
        let doc = cleaned(&long_text());
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        for chunk in &chunks {
            assert_eq!(chunk.metadata["origin"], "unit-test");
            assert_eq!(chunk.metadata["chunk_strategy"], "token");
            assert_eq!(chunk.metadata["chunk_size_tokens"], 60);
            assert_eq!(chunk.metadata["overlap_tokens"], 10);
            assert_eq!(chunk.tenant_id.as_deref(), Some("tenant-a"));
        }
    }

    #[tokio::test]
    async fn empty_document_produces_no_chunks() {
        let s = stage(token_cfg(60, 10));
        let doc = cleaned("");
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        assert!(chunks.is_empty());
    }

    /// Embedder that maps each sentence to a topic axis, so similarity is
    /// 1.0 within a topic and 0.0 across topics.
    struct TopicEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TopicEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("quantum") {
                        vec![0.0, 1.0]
                    } else {
                        vec![1.0, 0.0]
                    }
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_id(&self) -> &str {
            "topic-test"
        }

        fn estimate_cost(&self, _total_tokens: usize) -> f64 {
            0.0
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "topic-test"
        }
    }

    #[tokio::test]
    async fn semantic_boundaries_split_topics() {
        let cfg = ChunkingConfig {
            chunk_size: 500,
            overlap: 0,
            strategy: ChunkStrategy::Semantic,
            similarity_threshold: 0.5,
            ..ChunkingConfig::default()
        };
        let s = ChunkStage::new(tokenizer(), Some(Arc::new(TopicEmbedder)), cfg);

        let text = "Cats sleep most of the day. Cats enjoy warm places. \
                    quantum computers use qubits. quantum effects enable superposition.";
        let doc = cleaned(text);
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("Cats"));
        assert!(!chunks[0].content.contains("quantum"));
        assert!(chunks[1].content.contains("quantum"));
    }

    #[tokio::test]
    async fn oversized_semantic_runs_are_post_split() {
        let cfg = ChunkingConfig {
            chunk_size: 40,
            overlap: 5,
            strategy: ChunkStrategy::Hybrid,
            similarity_threshold: 0.5,
            ..ChunkingConfig::default()
        };
        let s = ChunkStage::new(tokenizer(), Some(Arc::new(TopicEmbedder)), cfg);

        // One topic, far more than 40 tokens.
        let text = "Cats chase the laser dot around the living room floor every single evening. "
            .repeat(10)
            .trim_end()
            .to_string();
        let doc = cleaned(&text);
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 40);
            assert_eq!(chunk.metadata["chunk_strategy"], "hybrid");
        }
    }

    #[tokio::test]
    async fn semantic_without_embedder_falls_back_to_token() {
        let cfg = ChunkingConfig {
            chunk_size: 60,
            overlap: 10,
            strategy: ChunkStrategy::Semantic,
            ..ChunkingConfig::default()
        };
        let s = ChunkStage::new(tokenizer(), None, cfg);
        let doc = cleaned(&long_text());
        let chunks = s.execute(&CancellationToken::new(), &[doc]).await.unwrap();
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.token_count <= 60);
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn strategy_parses_from_strings() {
        assert_eq!("token".parse::<ChunkStrategy>().unwrap(), ChunkStrategy::Token);
        assert_eq!(
            "hybrid".parse::<ChunkStrategy>().unwrap(),
            ChunkStrategy::Hybrid
        );
        assert!("recursive".parse::<ChunkStrategy>().is_err());
    }
}
