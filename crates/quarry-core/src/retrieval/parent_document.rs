//! Parent-document retrieval: match on child chunks, return their parents.

use std::collections::HashMap;

use serde_json::json;

use super::{RetrievalEnv, RetrievalQuery};
use crate::config::{ParentReturnMode, RetrieverConfig};
use crate::error::Result;
use crate::model::{Chunk, RetrievedHit};

pub(crate) const SOURCE_TAG: &str = "parent_document";

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    base: &RetrieverConfig,
    return_mode: ParentReturnMode,
) -> Result<Vec<RetrievedHit>> {
    // The base retriever only sees child chunks; parents exist for context.
    let child_query = query.with_metadata("child", json!(true));
    let child_hits = super::run(base, env, &child_query).await?;

    let parent_ids: Vec<String> = child_hits
        .iter()
        .filter_map(|h| h.metadata.get("parent_id").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect();
    let parents: HashMap<String, Chunk> = env
        .relational
        .get_chunks_by_ids(&parent_ids)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    // Several children of the same parent may match; the parent keeps the
    // best child's score and, when requested, every matched child text.
    let mut by_parent: HashMap<String, RetrievedHit> = HashMap::new();
    let mut ordered: Vec<String> = Vec::new();

    for child in child_hits {
        let parent = child
            .metadata
            .get("parent_id")
            .and_then(|v| v.as_str())
            .and_then(|id| parents.get(id));

        let Some(parent) = parent else {
            tracing::warn!(
                chunk_id = %child.chunk_id,
                "parent chunk missing, falling back to child"
            );
            let mut fallback = child;
            fallback.parent_not_found = true;
            fallback.source_tag = SOURCE_TAG.to_string();
            if !by_parent.contains_key(&fallback.chunk_id) {
                ordered.push(fallback.chunk_id.clone());
                by_parent.insert(fallback.chunk_id.clone(), fallback);
            }
            continue;
        };

        match by_parent.get_mut(&parent.id) {
            Some(existing) => {
                existing.score = existing.score.max(child.score);
                if return_mode == ParentReturnMode::ParentWithChildren {
                    push_matched_child(existing, &child.text);
                }
                existing.diagnostics.absorb(child.diagnostics);
            }
            None => {
                let mut metadata = parent.metadata.clone();
                if let Some(map) = metadata.as_object_mut() {
                    // The hit keeps the matched child's parent linkage
                    // visible to callers.
                    map.insert("parent_id".to_string(), json!(parent.id.clone()));
                }
                let mut hit = RetrievedHit {
                    chunk_id: parent.id.clone(),
                    kb_id: parent.kb_id.clone(),
                    document_id: parent.document_id.clone(),
                    text: parent.text.clone(),
                    score: child.score,
                    ordinal: parent.ordinal,
                    metadata,
                    source_tag: SOURCE_TAG.to_string(),
                    level: None,
                    parent_not_found: false,
                    diagnostics: child.diagnostics,
                    context: None,
                };
                if return_mode == ParentReturnMode::ParentWithChildren {
                    push_matched_child(&mut hit, &child.text);
                }
                ordered.push(parent.id.clone());
                by_parent.insert(parent.id.clone(), hit);
            }
        }
    }

    let mut hits: Vec<RetrievedHit> = ordered
        .into_iter()
        .filter_map(|id| by_parent.remove(&id))
        .collect();
    super::sort_hits(&mut hits);
    hits.truncate(query.top_k);
    Ok(hits)
}

fn push_matched_child(hit: &mut RetrievedHit, child_text: &str) {
    if let Some(map) = hit.metadata.as_object_mut() {
        let matched = map
            .entry("matched_children".to_string())
            .or_insert_with(|| json!([]));
        if let Some(list) = matched.as_array_mut() {
            list.push(json!(child_text));
        }
    }
}
