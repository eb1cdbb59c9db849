//! Context-window expansion.
//!
//! Each surviving hit gets its neighboring chunks (by ordinal, same
//! document only) attached as `context_before` / `context_after` /
//! `context_text`. A total character cap trims the expansion from the far
//! ends; the hit chunk itself is never trimmed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ContextWindowSettings;
use crate::error::Result;
use crate::model::{Chunk, ContextWindow, RetrievedHit};
use crate::storage::RelationalStore;

const NEIGHBOR_JOINER: &str = "\n";

/// Attach context windows in place.
pub async fn expand(
    relational: &Arc<dyn RelationalStore>,
    hits: &mut [RetrievedHit],
    settings: &ContextWindowSettings,
) -> Result<()> {
    // One chunk listing per distinct document.
    let mut by_document: HashMap<String, Vec<Chunk>> = HashMap::new();
    for hit in hits.iter() {
        if hit.document_id.is_empty() || by_document.contains_key(&hit.document_id) {
            continue;
        }
        let chunks = relational.list_chunks_for_document(&hit.document_id).await?;
        by_document.insert(hit.document_id.clone(), chunks);
    }

    for hit in hits.iter_mut() {
        let Some(chunks) = by_document.get(&hit.document_id) else {
            continue;
        };
        let Some(position) = chunks.iter().position(|c| c.id == hit.chunk_id) else {
            continue;
        };

        let start = position.saturating_sub(settings.before);
        let end = (position + 1 + settings.after).min(chunks.len());

        let before: Vec<&str> = chunks[start..position].iter().map(|c| c.text.as_str()).collect();
        let after: Vec<&str> = chunks[position + 1..end]
            .iter()
            .map(|c| c.text.as_str())
            .collect();

        let (before_text, after_text) =
            fit_to_cap(&before, &after, hit.text.chars().count(), settings.max_chars);

        let mut context_text = String::new();
        if !before_text.is_empty() {
            context_text.push_str(&before_text);
            context_text.push_str(NEIGHBOR_JOINER);
        }
        context_text.push_str(&hit.text);
        if !after_text.is_empty() {
            context_text.push_str(NEIGHBOR_JOINER);
            context_text.push_str(&after_text);
        }

        hit.context = Some(ContextWindow {
            context_text,
            context_before: before_text,
            context_after: after_text,
        });
    }
    Ok(())
}

/// Trim the expansion so `before + hit + after` stays within the cap. The
/// nearest neighbors survive longest: `before` loses characters from its
/// front, `after` from its back.
fn fit_to_cap(
    before: &[&str],
    after: &[&str],
    hit_chars: usize,
    max_chars: usize,
) -> (String, String) {
    let before_text = before.join(NEIGHBOR_JOINER);
    let after_text = after.join(NEIGHBOR_JOINER);

    let budget = max_chars.saturating_sub(hit_chars);
    let before_len = before_text.chars().count();
    let after_len = after_text.chars().count();
    if before_len + after_len <= budget {
        return (before_text, after_text);
    }

    // Split the remaining budget evenly, letting one side reuse what the
    // other does not need.
    let half = budget / 2;
    let before_keep = if after_len < half {
        budget - after_len
    } else {
        half.min(before_len)
    };
    let after_keep = budget - before_keep.min(budget);

    let trimmed_before: String = before_text
        .chars()
        .skip(before_len.saturating_sub(before_keep))
        .collect();
    let trimmed_after: String = after_text.chars().take(after_keep.min(after_len)).collect();
    (trimmed_before, trimmed_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexingStatus;
    use crate::storage::MemoryRelational;
    use chrono::Utc;

    fn chunk(id: &str, ordinal: usize, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            ordinal,
            text: text.to_string(),
            enriched_text: None,
            metadata: serde_json::json!({"chunk_index": ordinal}),
            indexing_status: IndexingStatus::Indexed,
            indexing_error: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    fn hit_for(chunk: &Chunk) -> RetrievedHit {
        RetrievedHit {
            chunk_id: chunk.id.clone(),
            kb_id: chunk.kb_id.clone(),
            document_id: chunk.document_id.clone(),
            text: chunk.text.clone(),
            score: 0.9,
            ordinal: chunk.ordinal,
            metadata: chunk.metadata.clone(),
            source_tag: "dense".to_string(),
            level: None,
            parent_not_found: false,
            diagnostics: Default::default(),
            context: None,
        }
    }

    async fn store_with_chunks(chunks: &[Chunk]) -> Arc<dyn RelationalStore> {
        let store = MemoryRelational::new();
        store.create_chunks(chunks).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_neighbors_attached_in_order() {
        let chunks = vec![
            chunk("c0", 0, "zero"),
            chunk("c1", 1, "one"),
            chunk("c2", 2, "two"),
        ];
        let store = store_with_chunks(&chunks).await;
        let mut hits = vec![hit_for(&chunks[1])];

        let settings = ContextWindowSettings {
            before: 1,
            after: 1,
            max_chars: 1000,
        };
        expand(&store, &mut hits, &settings).await.unwrap();

        let context = hits[0].context.as_ref().unwrap();
        assert_eq!(context.context_before, "zero");
        assert_eq!(context.context_after, "two");
        assert_eq!(context.context_text, "zero\none\ntwo");
    }

    #[tokio::test]
    async fn test_document_boundary_respected() {
        let chunks = vec![chunk("c0", 0, "only chunk")];
        let store = store_with_chunks(&chunks).await;
        let mut hits = vec![hit_for(&chunks[0])];

        let settings = ContextWindowSettings {
            before: 2,
            after: 2,
            max_chars: 1000,
        };
        expand(&store, &mut hits, &settings).await.unwrap();

        let context = hits[0].context.as_ref().unwrap();
        assert!(context.context_before.is_empty());
        assert!(context.context_after.is_empty());
        assert_eq!(context.context_text, "only chunk");
    }

    #[tokio::test]
    async fn test_cap_trims_expansion_not_hit() {
        let chunks = vec![
            chunk("c0", 0, &"b".repeat(100)),
            chunk("c1", 1, "hit text"),
            chunk("c2", 2, &"a".repeat(100)),
        ];
        let store = store_with_chunks(&chunks).await;
        let mut hits = vec![hit_for(&chunks[1])];

        let settings = ContextWindowSettings {
            before: 1,
            after: 1,
            max_chars: 48,
        };
        expand(&store, &mut hits, &settings).await.unwrap();

        let context = hits[0].context.as_ref().unwrap();
        assert!(context.context_text.contains("hit text"));
        assert!(context.context_text.chars().count() <= 48 + 2 * NEIGHBOR_JOINER.len());
        assert!(context.context_before.chars().count() < 100);
        assert!(context.context_after.chars().count() < 100);
    }
}
