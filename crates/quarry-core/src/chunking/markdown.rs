//! Markdown-aware chunking: split at heading boundaries, attach heading
//! paths.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{assert_dense_ordinals, create_chunk, pack_pieces, Chunker};
use crate::error::{CoreError, Result};
use crate::model::{Chunk, Document};

/// Markdown-aware chunking strategy.
#[derive(Debug)]
pub struct MarkdownChunker {
    max_heading_level: u8,
    max_chars: usize,
    heading_regex: Regex,
}

struct Section {
    /// Heading path from h1 down to this section's own heading.
    path: Vec<(u8, String)>,
    body: String,
}

impl MarkdownChunker {
    /// Create a new markdown chunker.
    pub fn new(max_heading_level: u8, max_chars: usize) -> Result<Self> {
        let heading_regex = Regex::new(r"(?m)^(#{1,6})\s+(.+)$")
            .map_err(|e| CoreError::Internal(anyhow::Error::new(e).context("heading regex")))?;
        Ok(Self {
            max_heading_level: max_heading_level.clamp(1, 6),
            max_chars,
            heading_regex,
        })
    }

    /// Split text into sections at headings of level <= `max_heading_level`.
    /// Deeper headings stay inside their section's body.
    fn sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut path: Vec<(u8, String)> = Vec::new();
        let mut pending_start = 0usize;

        for caps in self.heading_regex.captures_iter(text) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let level = caps.get(1).map_or(1, |m| m.as_str().len()) as u8;
            if level > self.max_heading_level {
                continue;
            }
            let title = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();

            let body = text[pending_start..whole.0].trim();
            if !body.is_empty() || !path.is_empty() {
                sections.push(Section {
                    path: path.clone(),
                    body: body.to_string(),
                });
            }

            // Pop deeper or equal headings, then push the new one.
            path.retain(|(l, _)| *l < level);
            path.push((level, title));
            pending_start = whole.1;
        }

        let tail = text[pending_start..].trim();
        sections.push(Section {
            path,
            body: tail.to_string(),
        });
        sections.retain(|s| !s.body.is_empty() || !s.path.is_empty());
        sections
    }

    fn heading_map(path: &[(u8, String)]) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (level, title) in path {
            map.insert(format!("h{level}"), json!(title));
        }
        serde_json::Value::Object(map)
    }
}

#[async_trait]
impl Chunker for MarkdownChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for section in self.sections(text) {
            let headings = Self::heading_map(&section.path);
            let body = if section.body.is_empty() {
                // Heading with no body still yields a chunk so the heading
                // itself is retrievable.
                section
                    .path
                    .last()
                    .map(|(_, title)| title.clone())
                    .unwrap_or_default()
            } else {
                section.body.clone()
            };

            let paragraphs: Vec<&str> = body.split("\n\n").collect();
            for piece in pack_pieces(&paragraphs, "\n\n", self.max_chars) {
                let ordinal = chunks.len();
                chunks.push(create_chunk(
                    document,
                    piece,
                    ordinal,
                    json!({"strategy": "markdown", "headings": headings.clone()}),
                ));
            }
        }

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            num_chunks = chunks.len(),
            "markdown chunking complete"
        );
        Ok(chunks)
    }
}
