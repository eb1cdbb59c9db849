//! Parent-child chunking: coarse parents carry context, fine children are
//! what dense matching runs against.
//!
//! Each parent precedes its children in ordinal order. Every parent gets at
//! least one child, so child-scoped retrieval can always reach the parent.

use async_trait::async_trait;
use serde_json::json;

use super::{assert_dense_ordinals, char_windows, create_chunk, pack_pieces, Chunker};
use crate::error::Result;
use crate::model::{Chunk, Document};

/// Parent-child chunking strategy.
#[derive(Debug)]
pub struct ParentChildChunker {
    parent_chars: usize,
    child_chars: usize,
}

impl ParentChildChunker {
    /// Create a new parent-child chunker.
    #[must_use]
    pub fn new(parent_chars: usize, child_chars: usize) -> Self {
        Self {
            parent_chars,
            child_chars,
        }
    }
}

#[async_trait]
impl Chunker for ParentChildChunker {
    async fn chunk(&self, document: &Document, text: &str) -> Result<Vec<Chunk>> {
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .collect();
        let parent_texts = pack_pieces(&paragraphs, "\n\n", self.parent_chars);

        let mut chunks: Vec<Chunk> = Vec::new();
        for parent_text in parent_texts {
            let child_texts = char_windows(&parent_text, self.child_chars, 0);

            let parent = create_chunk(
                document,
                parent_text,
                chunks.len(),
                json!({"strategy": "parent_child", "child": false}),
            );
            let parent_id = parent.id.clone();
            // Parents carry their own stable id in metadata so child rows
            // and vector payloads can reference it symmetrically.
            let mut parent = parent;
            if let Some(map) = parent.metadata.as_object_mut() {
                map.insert("chunk_id".to_string(), json!(parent_id.clone()));
            }
            chunks.push(parent);

            for child_text in child_texts {
                chunks.push(create_chunk(
                    document,
                    child_text,
                    chunks.len(),
                    json!({
                        "strategy": "parent_child",
                        "child": true,
                        "parent_id": parent_id.clone(),
                    }),
                ));
            }
        }

        assert_dense_ordinals(&chunks);
        tracing::debug!(
            document_id = %document.id,
            num_parents = chunks.iter().filter(|c| !c.is_child()).count(),
            total_chunks = chunks.len(),
            "parent-child chunking complete"
        );
        Ok(chunks)
    }
}
