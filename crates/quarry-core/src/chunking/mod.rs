//! Text chunking.
//!
//! A chunker turns a document's text into an ordered, finite sequence of
//! chunk records with structural metadata. Ordinals are 0-based and dense;
//! under parent-child chunking each parent precedes its children.
//!
//! Variants:
//! - **paragraph**: separator split with recombination under a size cap
//! - **sliding_window**: fixed character windows with overlap
//! - **recursive**: ordered separator fallback (default)
//! - **markdown**: heading-boundary split with heading paths
//! - **code**: top-level declaration boundaries
//! - **parent_child**: coarse parents for context, fine children for
//!   matching
//! - **sentence**: sentence packing toward a token target

mod code;
mod markdown;
mod paragraph;
mod parent_child;
mod recursive;
mod sentence;
mod sliding_window;

pub use code::CodeChunker;
pub use markdown::MarkdownChunker;
pub use paragraph::ParagraphChunker;
pub use parent_child::ParentChildChunker;
pub use recursive::RecursiveChunker;
pub use sentence::SentenceChunker;
pub use sliding_window::SlidingWindowChunker;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tiktoken_rs::CoreBPE;
use uuid::Uuid;

use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::model::{Chunk, Document, IndexingStatus};

/// Trait for chunking strategies.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Chunk a document's text into ordered chunk records.
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>>;
}

/// Tokenizer for counting tokens and encoding/decoding.
pub trait Tokenizer: Send + Sync {
    /// Count tokens in text.
    fn count(&self, text: &str) -> Result<usize>;

    /// Encode text to token IDs.
    fn encode(&self, text: &str) -> Result<Vec<usize>>;

    /// Decode token IDs to text.
    fn decode(&self, tokens: &[usize]) -> Result<String>;
}

/// cl100k tokenizer backed by tiktoken.
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer").finish_non_exhaustive()
    }
}

impl TiktokenTokenizer {
    /// Create a new tokenizer.
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(crate::error::CoreError::Internal)?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }

    fn encode(&self, text: &str) -> Result<Vec<usize>> {
        Ok(self
            .bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|t| t as usize)
            .collect())
    }

    fn decode(&self, tokens: &[usize]) -> Result<String> {
        let u32_tokens: Vec<u32> = tokens.iter().map(|&t| t as u32).collect();
        self.bpe
            .decode(u32_tokens)
            .map_err(crate::error::CoreError::Internal)
    }
}

/// Build the chunker for a KB's chunker configuration.
pub fn build_chunker(config: &ChunkerConfig) -> Result<Box<dyn Chunker>> {
    match config {
        ChunkerConfig::Paragraph {
            separator,
            max_chars,
        } => Ok(Box::new(ParagraphChunker::new(separator.clone(), *max_chars))),
        ChunkerConfig::SlidingWindow {
            window_chars,
            overlap_chars,
        } => Ok(Box::new(SlidingWindowChunker::new(
            *window_chars,
            *overlap_chars,
        ))),
        ChunkerConfig::Recursive {
            separators,
            chunk_size,
        } => Ok(Box::new(RecursiveChunker::new(
            separators.clone(),
            *chunk_size,
        ))),
        ChunkerConfig::Markdown {
            max_heading_level,
            max_chars,
        } => Ok(Box::new(MarkdownChunker::new(*max_heading_level, *max_chars)?)),
        ChunkerConfig::Code {
            language,
            max_chars,
        } => Ok(Box::new(CodeChunker::new(language.clone(), *max_chars)?)),
        ChunkerConfig::ParentChild {
            parent_chars,
            child_chars,
        } => Ok(Box::new(ParentChildChunker::new(*parent_chars, *child_chars))),
        ChunkerConfig::Sentence {
            target_tokens,
            overlap_tokens,
        } => {
            let tokenizer = Arc::new(TiktokenTokenizer::new()?);
            Ok(Box::new(SentenceChunker::new(
                tokenizer,
                *target_tokens,
                *overlap_tokens,
            )?))
        }
    }
}

/// Helper to create a chunk record. `chunk_index` is always mirrored into
/// the metadata map.
pub(crate) fn create_chunk(
    document: &Document,
    text: String,
    ordinal: usize,
    metadata: serde_json::Value,
) -> Chunk {
    let mut metadata = metadata;
    if let Some(map) = metadata.as_object_mut() {
        map.insert("chunk_index".to_string(), json!(ordinal));
    }
    Chunk {
        id: Uuid::new_v4().to_string(),
        tenant_id: document.tenant_id.clone(),
        kb_id: document.kb_id.clone(),
        document_id: document.id.clone(),
        ordinal,
        text,
        enriched_text: None,
        metadata,
        indexing_status: IndexingStatus::Pending,
        indexing_error: None,
        retry_count: 0,
        created_at: Utc::now(),
    }
}

/// Greedily pack pieces into chunks of at most `max_chars`, joined with
/// `joiner`. Pieces longer than the cap become their own chunk.
pub(crate) fn pack_pieces(pieces: &[&str], joiner: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut packed = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let piece = piece.trim_end();
        if piece.is_empty() {
            continue;
        }
        if current.is_empty() {
            current = piece.to_string();
        } else if current.chars().count() + joiner.chars().count() + piece.chars().count()
            <= max_chars
        {
            current.push_str(joiner);
            current.push_str(piece);
        } else {
            packed.push(current);
            current = piece.to_string();
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}

/// Fixed-size character windows with overlap, split on char boundaries.
pub(crate) fn char_windows(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let window = window.max(1);
    let overlap = overlap.min(window.saturating_sub(1));
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let step = window - overlap;
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        windows.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

/// Debug-time check of the ordering invariant: ordinals 0-based and dense.
#[cfg(debug_assertions)]
pub(crate) fn assert_dense_ordinals(chunks: &[Chunk]) {
    for (i, chunk) in chunks.iter().enumerate() {
        debug_assert_eq!(chunk.ordinal, i, "chunk ordinals must be dense");
    }
}

#[cfg(not(debug_assertions))]
pub(crate) fn assert_dense_ordinals(_chunks: &[Chunk]) {}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn test_document(id: &str) -> Document {
        Document {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            title: "Test Document".to_string(),
            source_metadata: serde_json::json!({}),
            summary: None,
            summary_status: crate::model::SummaryStatus::Skipped,
            sensitivity: crate::model::SensitivityLevel::Public,
            acl: crate::model::AclRules::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_round_trip() -> Result<()> {
        let tokenizer = TiktokenTokenizer::new()?;
        let text = "Hello, world!";
        let count = tokenizer.count(text)?;
        assert!(count > 0);

        let tokens = tokenizer.encode(text)?;
        assert_eq!(tokens.len(), count);

        let decoded = tokenizer.decode(&tokens)?;
        assert_eq!(decoded, text);
        Ok(())
    }

    #[test]
    fn test_build_chunker_all_variants() -> Result<()> {
        let configs = [
            serde_json::json!({"name": "paragraph"}),
            serde_json::json!({"name": "sliding_window"}),
            serde_json::json!({"name": "recursive"}),
            serde_json::json!({"name": "markdown"}),
            serde_json::json!({"name": "code"}),
            serde_json::json!({"name": "parent_child"}),
            serde_json::json!({"name": "sentence"}),
        ];
        for raw in configs {
            let config: ChunkerConfig = serde_json::from_value(raw)?;
            let _chunker = build_chunker(&config)?;
        }
        Ok(())
    }

    #[test]
    fn test_pack_pieces_respects_cap() {
        let pieces = ["aaaa", "bbbb", "cccc", "dddd"];
        let packed = pack_pieces(&pieces, " ", 9);
        assert_eq!(packed, vec!["aaaa bbbb", "cccc dddd"]);
    }

    #[test]
    fn test_pack_oversized_piece_kept_whole() {
        let pieces = ["tiny", "this one is far beyond the cap"];
        let packed = pack_pieces(&pieces, " ", 10);
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[1], "this one is far beyond the cap");
    }

    #[test]
    fn test_char_windows_overlap() {
        let windows = char_windows("abcdefghij", 4, 2);
        assert_eq!(windows, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn test_char_windows_unicode_safe() {
        let windows = char_windows("héllo wörld", 5, 1);
        assert!(!windows.is_empty());
        for window in &windows {
            assert!(window.chars().count() <= 5);
        }
        assert!(windows[0].starts_with("héllo"));
    }
}
