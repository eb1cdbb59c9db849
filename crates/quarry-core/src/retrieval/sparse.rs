//! Sparse (BM25) retrieval.
//!
//! Raw BM25 scores are unbounded; they are normalized here, before any
//! hybrid or fusion consumer sees them, so downstream merging always works
//! on [0, 1].

use super::{RetrievalEnv, RetrievalQuery};
use crate::config::SparseNormalization;
use crate::error::Result;
use crate::model::RetrievedHit;
use crate::storage::bm25::tokenize_terms;
use crate::storage::{SearchFilter, SparseHit};

pub(crate) const SOURCE_TAG: &str = "sparse";

/// Normalize raw BM25 scores into [0, 1].
pub(crate) fn normalize_scores(hits: &[SparseHit], method: SparseNormalization) -> Vec<f32> {
    match method {
        SparseNormalization::Sigmoid { threshold } => hits
            .iter()
            .map(|h| 1.0 / (1.0 + (-(h.raw_score - threshold)).exp()))
            .collect(),
        SparseNormalization::MinMax => {
            let min = hits.iter().map(|h| h.raw_score).fold(f32::INFINITY, f32::min);
            let max = hits
                .iter()
                .map(|h| h.raw_score)
                .fold(f32::NEG_INFINITY, f32::max);
            if hits.is_empty() {
                return Vec::new();
            }
            if (max - min).abs() < f32::EPSILON {
                // Degenerate batch: every score identical.
                return vec![1.0; hits.len()];
            }
            hits.iter()
                .map(|h| (h.raw_score - min) / (max - min))
                .collect()
        }
    }
}

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    normalization: SparseNormalization,
) -> Result<Vec<RetrievedHit>> {
    let Some(sparse) = &env.sparse else {
        tracing::warn!("sparse retrieval requested without a sparse store, returning empty");
        return Ok(Vec::new());
    };

    let terms = tokenize_terms(&query.text);
    let mut filter = SearchFilter::for_kbs(&query.tenant_id, &query.kb_ids);
    filter.metadata_eq.extend(query.metadata_eq.clone());

    let raw_hits = sparse.search(&terms, &filter, query.top_k).await?;
    let scores = normalize_scores(&raw_hits, normalization);

    let ids: Vec<String> = raw_hits.iter().map(|h| h.chunk_id.clone()).collect();
    let chunks = env.relational.get_chunks_by_ids(&ids).await?;
    let by_id: std::collections::HashMap<&str, &crate::model::Chunk> =
        chunks.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut hits = Vec::with_capacity(raw_hits.len());
    for (raw, score) in raw_hits.iter().zip(scores) {
        let Some(chunk) = by_id.get(raw.chunk_id.as_str()) else {
            continue;
        };
        hits.push(RetrievedHit {
            chunk_id: chunk.id.clone(),
            kb_id: chunk.kb_id.clone(),
            document_id: chunk.document_id.clone(),
            text: chunk.text.clone(),
            score,
            ordinal: chunk.ordinal,
            metadata: chunk.metadata.clone(),
            source_tag: SOURCE_TAG.to_string(),
            level: None,
            parent_not_found: false,
            diagnostics: Default::default(),
            context: None,
        });
    }

    tracing::debug!(candidates = hits.len(), "sparse retrieval complete");
    Ok(hits)
}
