//! Sliding-window chunking: fixed character windows with fixed overlap.

use async_trait::async_trait;
use serde_json::json;

use super::{assert_dense_ordinals, char_windows, create_chunk, Chunker};
use crate::error::Result;
use crate::model::{Chunk, Document};

/// Sliding-window chunking strategy.
#[derive(Debug)]
pub struct SlidingWindowChunker {
    window_chars: usize,
    overlap_chars: usize,
}

impl SlidingWindowChunker {
    /// Create a new sliding-window chunker.
    #[must_use]
    pub fn new(window_chars: usize, overlap_chars: usize) -> Self {
        Self {
            window_chars,
            overlap_chars,
        }
    }
}

#[async_trait]
impl Chunker for SlidingWindowChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let chunks: Vec<Chunk> = char_windows(text, self.window_chars, self.overlap_chars)
            .into_iter()
            .enumerate()
            .map(|(ordinal, window)| {
                create_chunk(
                    document,
                    window,
                    ordinal,
                    json!({"strategy": "sliding_window"}),
                )
            })
            .collect();

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            num_chunks = chunks.len(),
            "sliding-window chunking complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::test_support::test_document;

    #[tokio::test]
    async fn test_windows_overlap() -> Result<()> {
        let chunker = SlidingWindowChunker::new(10, 4);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker.chunk(&test_document("d1"), text).await?;

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(4).collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(pair[1].text.starts_with(&tail));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_short_text_single_window() -> Result<()> {
        let chunker = SlidingWindowChunker::new(100, 10);
        let chunks = chunker.chunk(&test_document("d1"), "short").await?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short");
        Ok(())
    }
}
