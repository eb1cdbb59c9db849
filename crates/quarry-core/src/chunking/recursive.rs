//! Recursive chunking: split by an ordered separator list, falling back to
//! finer separators until pieces fit the size cap.

use async_trait::async_trait;
use serde_json::json;

use super::{assert_dense_ordinals, create_chunk, Chunker};
use crate::error::Result;
use crate::model::{Chunk, Document};

/// Recursive chunking strategy. The default.
#[derive(Debug)]
pub struct RecursiveChunker {
    separators: Vec<String>,
    chunk_size: usize,
}

impl RecursiveChunker {
    /// Create a new recursive chunker.
    #[must_use]
    pub fn new(separators: Vec<String>, chunk_size: usize) -> Self {
        Self {
            separators,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Split `text` into pieces no longer than `chunk_size` characters,
    /// trying separators in order. The chosen separator is preserved when
    /// pieces are merged back together.
    fn split(&self, text: &str, separator_idx: usize) -> Vec<String> {
        if text.chars().count() <= self.chunk_size {
            return vec![text.to_string()];
        }
        let Some(separator) = self.separators.get(separator_idx) else {
            // Separators exhausted; hard-split on char boundaries.
            return super::char_windows(text, self.chunk_size, 0);
        };

        let raw_pieces: Vec<&str> = if separator.is_empty() {
            return super::char_windows(text, self.chunk_size, 0);
        } else {
            text.split(separator.as_str()).collect()
        };

        // Recurse into oversized pieces, then merge adjacent small pieces
        // back up to the cap, keeping the separator between them.
        let mut fitted = Vec::new();
        for piece in raw_pieces {
            if piece.trim().is_empty() {
                continue;
            }
            if piece.chars().count() > self.chunk_size {
                fitted.extend(self.split(piece, separator_idx + 1));
            } else {
                fitted.push(piece.to_string());
            }
        }

        let mut merged: Vec<String> = Vec::new();
        for piece in fitted {
            match merged.last_mut() {
                Some(last)
                    if last.chars().count() + separator.chars().count() + piece.chars().count()
                        <= self.chunk_size =>
                {
                    last.push_str(separator);
                    last.push_str(&piece);
                }
                _ => merged.push(piece),
            }
        }
        merged
    }
}

#[async_trait]
impl Chunker for RecursiveChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let chunks: Vec<Chunk> = self
            .split(text, 0)
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .enumerate()
            .map(|(ordinal, piece)| {
                create_chunk(document, piece, ordinal, json!({"strategy": "recursive"}))
            })
            .collect();

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            num_chunks = chunks.len(),
            "recursive chunking complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::test_support::test_document;

    fn default_separators() -> Vec<String> {
        vec![
            "\n\n".to_string(),
            "\n".to_string(),
            ". ".to_string(),
            " ".to_string(),
            String::new(),
        ]
    }

    #[tokio::test]
    async fn test_fits_in_one_chunk() -> Result<()> {
        let chunker = RecursiveChunker::new(default_separators(), 200);
        let chunks = chunker
            .chunk(&test_document("d1"), "A short piece of text.")
            .await?;
        assert_eq!(chunks.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_splits_at_sentence_level() -> Result<()> {
        let chunker = RecursiveChunker::new(default_separators(), 40);
        let text = "Aspirin is used to relieve pain. Pregnant women should not take it.";
        let chunks = chunker.chunk(&test_document("d1"), text).await?;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("relieve pain"));
        assert!(chunks[1].text.contains("Pregnant women should not take it"));
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 40);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_separator_preserved_in_merge() -> Result<()> {
        let chunker = RecursiveChunker::new(default_separators(), 60);
        let text = "One line.\nAnother line.\nThird line.";
        let chunks = chunker.chunk(&test_document("d1"), text).await?;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains('\n'));
        Ok(())
    }

    #[tokio::test]
    async fn test_hard_split_without_separators() -> Result<()> {
        let chunker = RecursiveChunker::new(vec![], 10);
        let chunks = chunker
            .chunk(&test_document("d1"), &"x".repeat(35))
            .await?;
        assert_eq!(chunks.len(), 4);
        Ok(())
    }
}
