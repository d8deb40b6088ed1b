//! Tokenizer and sentence splitter capability.
//!
//! The pipeline only needs three things from a tokenizer: sentence
//! boundaries for the connector, token counts for span packing, and token
//! byte ranges for window chunking. [`UnicodeTokenizer`] provides all three
//! from Unicode segmentation rules; heavier model-backed tokenizers can be
//! registered under their own name in a [`crate::ModelRegistry`].

use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

pub trait Tokenizer: Send + Sync {
    /// Split text into sentences, in order. Whitespace-only pieces are dropped.
    fn split_sentences(&self, text: &str) -> Vec<String>;

    /// Byte ranges of every token in `text`.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count_tokens(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }
}

/// Unicode (UAX #29) sentence and word boundaries.
///
/// Every non-whitespace word-boundary segment is one token, so punctuation
/// counts as its own token the way BPE tokenizers usually split it.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeTokenizer;

impl UnicodeTokenizer {
    pub const NAME: &'static str = "unicode";
}

impl Tokenizer for UnicodeTokenizer {
    fn split_sentences(&self, text: &str) -> Vec<String> {
        text.split_sentence_bounds()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        text.split_word_bound_indices()
            .filter(|(_, segment)| !segment.trim().is_empty())
            .map(|(start, segment)| start..start + segment.len())
            .collect()
    }
}
