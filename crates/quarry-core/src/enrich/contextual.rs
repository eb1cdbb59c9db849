//! Chunk contextualizer: ask an LLM to restate each chunk with its
//! surrounding context, storing the result in `enriched_text`.

use std::sync::Arc;

use crate::config::ChunkContextSettings;
use crate::model::{Chunk, Document};
use crate::providers::LlmClient;

const NEIGHBOR_CHARS: usize = 600;
const ENRICHED_MAX_TOKENS: usize = 400;

/// LLM-backed chunk enricher.
pub struct ChunkEnricher {
    llm: Arc<dyn LlmClient>,
    settings: ChunkContextSettings,
}

impl std::fmt::Debug for ChunkEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkEnricher")
            .field("model", &self.llm.model())
            .field("window", &self.settings.window)
            .finish()
    }
}

impl ChunkEnricher {
    /// Create a new chunk enricher.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, settings: ChunkContextSettings) -> Self {
        Self { llm, settings }
    }

    fn neighbor_excerpt(chunks: &[Chunk], range: std::ops::Range<usize>) -> String {
        chunks[range]
            .iter()
            .map(|c| {
                let mut text: String = c.text.chars().take(NEIGHBOR_CHARS).collect();
                if text.len() < c.text.len() {
                    text.push('…');
                }
                text
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_prompt(&self, document: &Document, chunks: &[Chunk], index: usize) -> String {
        let window = self.settings.window;
        let before_start = index.saturating_sub(window);
        let after_end = (index + 1 + window).min(chunks.len());
        let before = Self::neighbor_excerpt(chunks, before_start..index);
        let after = Self::neighbor_excerpt(chunks, index + 1..after_end);
        let summary = document
            .summary
            .as_deref()
            .map(|s| format!("Document summary: {s}\n"))
            .unwrap_or_default();

        format!(
            "Rewrite the passage below so it stands alone, keeping all facts \
             and adding the minimum context needed to understand it.\n\n\
             Document title: {title}\n{summary}\
             Text before the passage:\n{before}\n\n\
             Passage:\n{chunk}\n\n\
             Text after the passage:\n{after}\n\n\
             Standalone passage:",
            title = document.title,
            chunk = chunks[index].text,
        )
    }

    /// Contextualize every chunk in place. Chunks that already carry
    /// `enriched_text` are skipped, which makes re-runs idempotent; provider
    /// errors skip the chunk rather than aborting ingestion.
    ///
    /// Returns the number of chunks enriched.
    pub async fn enrich_chunks(&self, document: &Document, chunks: &mut [Chunk]) -> usize {
        let mut enriched = 0usize;
        for index in 0..chunks.len() {
            if chunks[index].enriched_text.is_some() {
                continue;
            }
            let prompt = self.build_prompt(document, chunks, index);
            match self.llm.complete(&prompt, ENRICHED_MAX_TOKENS).await {
                Ok(text) if !text.trim().is_empty() => {
                    chunks[index].enriched_text = Some(text.trim().to_string());
                    enriched += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        document_id = %document.id,
                        chunk_id = %chunks[index].id,
                        error = %err,
                        "chunk enrichment failed, keeping original text"
                    );
                }
            }
        }
        tracing::debug!(
            document_id = %document.id,
            enriched,
            total = chunks.len(),
            "chunk enrichment complete"
        );
        enriched
    }
}
