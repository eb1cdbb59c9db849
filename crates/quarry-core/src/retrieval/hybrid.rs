//! Hybrid retrieval: dense and sparse in parallel, merged by weighted sum
//! over normalized scores.

use std::collections::BTreeMap;

use super::{dense, sparse, RetrievalEnv, RetrievalQuery};
use crate::config::SparseNormalization;
use crate::error::Result;
use crate::model::RetrievedHit;

pub(crate) const SOURCE_TAG: &str = "hybrid";

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    dense_weight: f32,
    sparse_weight: f32,
    normalization: SparseNormalization,
) -> Result<Vec<RetrievedHit>> {
    let (dense_hits, sparse_hits) = tokio::join!(
        dense::retrieve(env, query),
        sparse::retrieve(env, query, normalization),
    );
    let dense_hits = dense_hits?;
    let sparse_hits = sparse_hits?;

    // Renormalize weights over the legs that actually returned something,
    // so a dry sparse store does not halve every dense score.
    let mut active_weight = 0.0f32;
    if !dense_hits.is_empty() {
        active_weight += dense_weight;
    }
    if !sparse_hits.is_empty() {
        active_weight += sparse_weight;
    }
    if active_weight <= 0.0 {
        return Ok(Vec::new());
    }

    let mut merged: BTreeMap<String, RetrievedHit> = BTreeMap::new();
    for (hits, weight) in [(dense_hits, dense_weight), (sparse_hits, sparse_weight)] {
        let weight = weight / active_weight;
        for hit in hits {
            let weighted = hit.score * weight;
            match merged.get_mut(&hit.chunk_id) {
                Some(existing) => existing.score += weighted,
                None => {
                    let mut hit = hit;
                    hit.score = weighted;
                    hit.source_tag = SOURCE_TAG.to_string();
                    merged.insert(hit.chunk_id.clone(), hit);
                }
            }
        }
    }

    Ok(merged.into_values().collect())
}
