use anyhow::Result;

use crate::chunk::Chunk;
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 100,
        }
    }
}

/// Splits a document into fixed-size token windows that overlap by
/// `overlap` tokens.
pub struct TokenTextSplitter {
    config: ChunkerConfig,
}

impl TokenTextSplitter {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            anyhow::bail!("chunk_size must be positive");
        }
        if config.overlap >= config.chunk_size {
            anyhow::bail!(
                "overlap ({}) must be smaller than chunk_size ({})",
                config.overlap,
                config.chunk_size
            );
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn split_text(&self, doc_id: &str, text: &str, tokenizer: &dyn Tokenizer) -> Vec<Chunk> {
        let spans = tokenizer.token_spans(text);
        let step = self.config.chunk_size - self.config.overlap;
        let mut chunks = Vec::new();

        let mut start = 0;
        while start < spans.len() {
            let end = (start + self.config.chunk_size).min(spans.len());
            let byte_start = spans[start].start;
            let byte_end = spans[end - 1].end;

            chunks.push(Chunk::new(
                doc_id.to_string(),
                text[byte_start..byte_end].to_string(),
                (byte_start, byte_end),
                end - start,
            ));

            // The last window already reaches the end of the text
            if end == spans.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
