//! Sentence chunking: pack sentences toward a token target with token
//! overlap between consecutive chunks.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{assert_dense_ordinals, create_chunk, Chunker, Tokenizer};
use crate::error::{CoreError, Result};
use crate::model::{Chunk, Document};

/// Sentence/token chunking strategy.
pub struct SentenceChunker {
    tokenizer: Arc<dyn Tokenizer>,
    target_tokens: usize,
    overlap_tokens: usize,
    sentence_regex: Regex,
}

impl std::fmt::Debug for SentenceChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceChunker")
            .field("target_tokens", &self.target_tokens)
            .field("overlap_tokens", &self.overlap_tokens)
            .finish_non_exhaustive()
    }
}

impl SentenceChunker {
    /// Create a new sentence chunker.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        target_tokens: usize,
        overlap_tokens: usize,
    ) -> Result<Self> {
        let sentence_regex = Regex::new(r"[^.!?]*[.!?]+\s*|[^.!?]+$")
            .map_err(|e| CoreError::Internal(anyhow::Error::new(e).context("sentence regex")))?;
        Ok(Self {
            tokenizer,
            target_tokens: target_tokens.max(1),
            overlap_tokens,
            sentence_regex,
        })
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        self.sentence_regex
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[async_trait]
impl Chunker for SentenceChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let sentences = self.split_sentences(text);
        let counts: Vec<usize> = sentences
            .iter()
            .map(|s| self.tokenizer.count(s))
            .collect::<Result<_>>()?;

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut window: Vec<usize> = Vec::new();
        let mut window_tokens = 0usize;

        let flush =
            |window: &[usize], chunks: &mut Vec<Chunk>, sentences: &[String], document: &Document| {
                if window.is_empty() {
                    return;
                }
                let text = window
                    .iter()
                    .map(|&i| sentences[i].as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let ordinal = chunks.len();
                chunks.push(create_chunk(
                    document,
                    text,
                    ordinal,
                    json!({"strategy": "sentence"}),
                ));
            };

        for (i, &count) in counts.iter().enumerate() {
            if window_tokens + count > self.target_tokens && !window.is_empty() {
                flush(&window, &mut chunks, &sentences, document);

                // Carry trailing sentences up to the overlap budget.
                let mut carried: Vec<usize> = Vec::new();
                let mut carried_tokens = 0usize;
                for &j in window.iter().rev() {
                    if carried_tokens + counts[j] > self.overlap_tokens {
                        break;
                    }
                    carried_tokens += counts[j];
                    carried.push(j);
                }
                carried.reverse();
                window = carried;
                window_tokens = carried_tokens;
            }
            window.push(i);
            window_tokens += count;
        }
        flush(&window, &mut chunks, &sentences, document);

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            num_chunks = chunks.len(),
            "sentence chunking complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TiktokenTokenizer;
    use crate::chunking::test_support::test_document;

    fn chunker(target: usize, overlap: usize) -> SentenceChunker {
        let tokenizer = Arc::new(TiktokenTokenizer::new().unwrap());
        SentenceChunker::new(tokenizer, target, overlap).unwrap()
    }

    #[test]
    fn test_sentence_split() {
        let c = chunker(100, 0);
        let sentences = c.split_sentences("First sentence. Second sentence! Third sentence?");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "First sentence.");
    }

    #[test]
    fn test_trailing_fragment_kept() {
        let c = chunker(100, 0);
        let sentences = c.split_sentences("Complete sentence. trailing fragment without period");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1], "trailing fragment without period");
    }

    #[tokio::test]
    async fn test_packs_to_target() -> Result<()> {
        let c = chunker(20, 0);
        let text = "One short sentence here. Another short sentence here. \
                    A third short sentence here. A fourth short sentence here.";
        let chunks = c.chunk(&test_document("d1"), text).await?;

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(c.tokenizer.count(&chunk.text)? <= 30);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_overlap_repeats_sentences() -> Result<()> {
        let c = chunker(20, 10);
        let text = "Alpha sentence one. Beta sentence two. Gamma sentence three. \
                    Delta sentence four. Epsilon sentence five.";
        let chunks = c.chunk(&test_document("d1"), text).await?;
        assert!(chunks.len() > 1);

        // Consecutive chunks share at least one sentence.
        let shares_overlap = chunks.windows(2).all(|pair| {
            pair[0]
                .text
                .split(". ")
                .any(|s| !s.is_empty() && pair[1].text.contains(s.trim_end_matches('.')))
        });
        assert!(shares_overlap);
        Ok(())
    }
}
