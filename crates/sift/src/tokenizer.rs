//! Token counting for chunk sizing
//!
//! Wraps tiktoken so chunk budgets line up with what the embedding provider
//! actually bills for.

use crate::error::{Error, Result};

/// Trait for tokenization operations used by the chunking stage.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Encode text into token IDs.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token IDs back into text.
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Name of the encoding or model backing this tokenizer.
    fn name(&self) -> &str;
}

/// Tiktoken-backed tokenizer.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Create a tokenizer for a named encoding or model.
    ///
    /// Accepts the encoding names (`cl100k_base`, `o200k_base`, `p50k_base`,
    /// `r50k_base`) directly; anything else is resolved as a model name.
    pub fn new(name: &str) -> Result<Self> {
        let bpe = match name {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            model => tiktoken_rs::get_bpe_from_model(model),
        }
        .map_err(|e| Error::Config(format!("failed to initialize tokenizer '{name}': {e}")))?;

        Ok(Self {
            bpe,
            name: name.to_string(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as u32)
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe
            .decode(tokens.iter().map(|&t| t as usize).collect())
            .map_err(|e| Error::Internal(format!("token decode failed: {e}")))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
