//! Paragraph chunking: split on a separator, recombine under a size cap.

use async_trait::async_trait;
use serde_json::json;

use super::{assert_dense_ordinals, create_chunk, pack_pieces, Chunker};
use crate::error::Result;
use crate::model::{Chunk, Document};

/// Paragraph chunking strategy.
#[derive(Debug)]
pub struct ParagraphChunker {
    separator: String,
    max_chars: usize,
}

impl ParagraphChunker {
    /// Create a new paragraph chunker.
    #[must_use]
    pub fn new(separator: String, max_chars: usize) -> Self {
        Self {
            separator,
            max_chars,
        }
    }
}

#[async_trait]
impl Chunker for ParagraphChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let pieces: Vec<&str> = text
            .split(self.separator.as_str())
            .filter(|p| !p.trim().is_empty())
            .collect();

        let chunks: Vec<Chunk> = pack_pieces(&pieces, &self.separator, self.max_chars)
            .into_iter()
            .enumerate()
            .map(|(ordinal, piece)| {
                create_chunk(document, piece, ordinal, json!({"strategy": "paragraph"}))
            })
            .collect();

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            num_chunks = chunks.len(),
            "paragraph chunking complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::test_support::test_document;

    #[tokio::test]
    async fn test_recombines_under_cap() -> Result<()> {
        let chunker = ParagraphChunker::new("\n\n".to_string(), 60);
        let document = test_document("d1");
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nA third one that is quite a bit longer than the others.";

        let chunks = chunker.chunk(&document, text).await?;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("First paragraph"));
        assert!(chunks[0].text.contains("Second paragraph"));
        assert_eq!(chunks[0].metadata["chunk_index"], 0);
        assert_eq!(chunks[1].metadata["chunk_index"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_text() -> Result<()> {
        let chunker = ParagraphChunker::new("\n\n".to_string(), 100);
        let chunks = chunker.chunk(&test_document("d1"), "").await?;
        assert!(chunks.is_empty());
        Ok(())
    }
}
