//! Code-aware chunking: split at top-level declaration boundaries.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{assert_dense_ordinals, char_windows, create_chunk, Chunker};
use crate::error::{CoreError, Result};
use crate::model::{Chunk, Document};

/// Code-aware chunking strategy.
#[derive(Debug)]
pub struct CodeChunker {
    language: Option<String>,
    max_chars: usize,
    boundaries: Vec<(String, Regex)>,
}

/// Declaration patterns per language: (block kind, line-anchored regex).
fn boundary_patterns(language: &str) -> Vec<(&'static str, &'static str)> {
    match language {
        "rust" => vec![
            ("function", r"^(pub(\([^)]*\))?\s+)?(async\s+)?fn\s+\w+"),
            ("struct", r"^(pub(\([^)]*\))?\s+)?struct\s+\w+"),
            ("enum", r"^(pub(\([^)]*\))?\s+)?enum\s+\w+"),
            ("trait", r"^(pub(\([^)]*\))?\s+)?trait\s+\w+"),
            ("impl", r"^impl(\s|<)"),
            ("module", r"^(pub(\([^)]*\))?\s+)?mod\s+\w+"),
        ],
        "python" => vec![
            ("function", r"^(async\s+)?def\s+\w+"),
            ("class", r"^class\s+\w+"),
            ("decorator", r"^@\w+"),
        ],
        "javascript" | "typescript" => vec![
            ("function", r"^(export\s+)?(async\s+)?function\s+\w+"),
            ("class", r"^(export\s+)?class\s+\w+"),
            ("binding", r"^(export\s+)?(const|let|var)\s+\w+"),
            ("interface", r"^(export\s+)?interface\s+\w+"),
            ("type", r"^(export\s+)?type\s+\w+"),
        ],
        "go" => vec![
            ("function", r"^func\s+"),
            ("type", r"^type\s+\w+"),
            ("binding", r"^(var|const)\s+"),
        ],
        _ => Vec::new(),
    }
}

/// Guess the language from a file path in the document's source metadata.
fn detect_language(document: &Document) -> Option<String> {
    let path = document
        .source_metadata
        .get("path")
        .and_then(|v| v.as_str())?;
    let extension = path.rsplit('.').next()?;
    let language = match extension {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        _ => return None,
    };
    Some(language.to_string())
}

impl CodeChunker {
    /// Create a new code chunker. The language may be declared up front or
    /// auto-detected per document.
    pub fn new(language: Option<String>, max_chars: usize) -> Result<Self> {
        let boundaries = match &language {
            Some(lang) => Self::compile(lang)?,
            None => Vec::new(),
        };
        Ok(Self {
            language,
            max_chars,
            boundaries,
        })
    }

    fn compile(language: &str) -> Result<Vec<(String, Regex)>> {
        boundary_patterns(language)
            .into_iter()
            .map(|(kind, pattern)| {
                Regex::new(pattern)
                    .map(|regex| (kind.to_string(), regex))
                    .map_err(|e| {
                        CoreError::Internal(anyhow::Error::new(e).context("code boundary regex"))
                    })
            })
            .collect()
    }

    fn kind_of(boundaries: &[(String, Regex)], line: &str) -> Option<String> {
        boundaries
            .iter()
            .find(|(_, regex)| regex.is_match(line))
            .map(|(kind, _)| kind.clone())
    }
}

#[async_trait]
impl Chunker for CodeChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let language = self
            .language
            .clone()
            .or_else(|| detect_language(document))
            .unwrap_or_else(|| "unknown".to_string());
        let compiled;
        let boundaries = if self.boundaries.is_empty() && language != "unknown" {
            compiled = Self::compile(&language)?;
            &compiled
        } else {
            &self.boundaries
        };

        // Accumulate lines into blocks; a new top-level declaration starts a
        // new block.
        let mut blocks: Vec<(String, String)> = Vec::new();
        let mut current = String::new();
        let mut current_kind = "preamble".to_string();
        for line in text.lines() {
            if let Some(kind) = Self::kind_of(boundaries, line) {
                if !current.trim().is_empty() {
                    blocks.push((current_kind, std::mem::take(&mut current)));
                }
                current_kind = kind;
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            blocks.push((current_kind, current));
        }

        let mut chunks = Vec::new();
        for (kind, block) in blocks {
            // Oversized blocks fall back to hard windows, keeping the kind.
            let pieces = if block.chars().count() > self.max_chars {
                char_windows(&block, self.max_chars, 0)
            } else {
                vec![block]
            };
            for piece in pieces {
                let ordinal = chunks.len();
                chunks.push(create_chunk(
                    document,
                    piece.trim_end().to_string(),
                    ordinal,
                    json!({
                        "strategy": "code",
                        "language": language.clone(),
                        "block_kind": kind.clone(),
                    }),
                ));
            }
        }

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            language = %language,
            num_chunks = chunks.len(),
            "code chunking complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::test_support::test_document;

    const RUST_SOURCE: &str = "\
use std::fmt;

pub struct Point {
    x: f32,
    y: f32,
}

impl Point {
    fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

pub fn origin() -> Point {
    Point { x: 0.0, y: 0.0 }
}
";

    #[tokio::test]
    async fn test_rust_declaration_boundaries() -> Result<()> {
        let chunker = CodeChunker::new(Some("rust".to_string()), 2000)?;
        let chunks = chunker.chunk(&test_document("d1"), RUST_SOURCE).await?;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].metadata["block_kind"], "preamble");
        assert_eq!(chunks[1].metadata["block_kind"], "struct");
        assert_eq!(chunks[2].metadata["block_kind"], "impl");
        assert_eq!(chunks[3].metadata["block_kind"], "function");
        for chunk in &chunks {
            assert_eq!(chunk.metadata["language"], "rust");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_language_from_metadata() -> Result<()> {
        let chunker = CodeChunker::new(None, 2000)?;
        let mut document = test_document("d1");
        document.source_metadata = serde_json::json!({"path": "src/app.py"});

        let chunks = chunker
            .chunk(&document, "def handler(event):\n    return event\n")
            .await?;
        assert_eq!(chunks[0].metadata["language"], "python");
        assert_eq!(chunks[0].metadata["block_kind"], "function");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_language_single_block() -> Result<()> {
        let chunker = CodeChunker::new(None, 2000)?;
        let chunks = chunker
            .chunk(&test_document("d1"), "some opaque content\nmore content\n")
            .await?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata["language"], "unknown");
        Ok(())
    }
}
