//! Sliding-window text chunking.
//!
//! Documents are split into overlapping segments before embedding so that
//! context survives across chunk boundaries. Splitting operates on
//! grapheme clusters, never byte or scalar offsets, so a boundary cannot
//! land inside a multibyte character.

use unicode_segmentation::UnicodeSegmentation as _;

use crate::config::ChunkingConfig;
use crate::error::ConfigurationError;

/// Splits `text` into segments of at most `max_len` grapheme clusters,
/// with `overlap` clusters shared between consecutive segments.
///
/// Deterministic: the same input always yields the same segmentation.
/// Empty input yields an empty vector. Fails with [`ConfigurationError`]
/// unless `overlap < max_len` and `max_len > 0`.
pub fn chunk(text: &str, max_len: usize, overlap: usize) -> Result<Vec<String>, ConfigurationError> {
    let config = ChunkingConfig { max_len, overlap };
    Chunker::new(&config).map(|chunker| chunker.split(text))
}

/// A chunker with validated parameters.
#[derive(Clone, Debug)]
pub struct Chunker {
    max_len: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            max_len: config.max_len,
            overlap: config.overlap,
        })
    }

    /// Splits `text` into overlapping windows.
    ///
    /// Every chunk except possibly the last has exactly `max_len`
    /// clusters; consecutive chunks share exactly `overlap` clusters
    /// (except possibly the last, which may be shorter).
    pub fn split(&self, text: &str) -> Vec<String> {
        let graphemes: Vec<&str> = text.graphemes(true).collect();
        if graphemes.is_empty() {
            return Vec::new();
        }

        let step = self.max_len - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.max_len).min(graphemes.len());
            chunks.push(graphemes[start..end].concat());
            if end == graphemes.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}
