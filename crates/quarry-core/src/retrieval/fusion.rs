//! Fusion: run several base retrievers and merge their rankings.

use std::collections::BTreeMap;

use serde_json::json;

use super::{run_legs_parallel, RetrievalEnv, RetrievalQuery};
use crate::config::{MergePolicy, RetrieverConfig};
use crate::error::Result;
use crate::model::RetrievedHit;

pub(crate) const SOURCE_TAG: &str = "fusion";

/// Reciprocal-rank fusion: `score = Σ weight / (k + rank)`, rank 1-based.
///
/// Legs that returned nothing simply contribute no terms. The best-ranked
/// occurrence of a chunk supplies the hit record; diagnostics from merged
/// duplicates are absorbed so nothing attached by an inner strategy is lost.
pub(crate) fn rrf_merge(
    lists: Vec<Vec<RetrievedHit>>,
    weights: Option<&[f32]>,
    k: f32,
) -> Vec<RetrievedHit> {
    let mut merged: BTreeMap<String, RetrievedHit> = BTreeMap::new();
    for (leg, hits) in lists.into_iter().enumerate() {
        let weight = weights.and_then(|w| w.get(leg)).copied().unwrap_or(1.0);
        for (rank, hit) in hits.into_iter().enumerate() {
            let contribution = weight / (k + (rank + 1) as f32);
            match merged.get_mut(&hit.chunk_id) {
                Some(existing) => {
                    existing.score += contribution;
                    existing.diagnostics.absorb(hit.diagnostics);
                }
                None => {
                    let mut hit = hit;
                    hit.score = contribution;
                    merged.insert(hit.chunk_id.clone(), hit);
                }
            }
        }
    }
    merged.into_values().collect()
}

/// Weighted-sum merge over normalized scores. Weights are renormalized over
/// the legs that returned results.
pub(crate) fn weighted_sum_merge(
    lists: Vec<Vec<RetrievedHit>>,
    weights: &[f32],
) -> Vec<RetrievedHit> {
    let active_weight: f32 = lists
        .iter()
        .zip(weights)
        .filter(|(hits, _)| !hits.is_empty())
        .map(|(_, w)| *w)
        .sum();
    if active_weight <= 0.0 {
        return Vec::new();
    }

    let mut merged: BTreeMap<String, RetrievedHit> = BTreeMap::new();
    for (hits, weight) in lists.into_iter().zip(weights) {
        let weight = weight / active_weight;
        for hit in hits {
            let weighted = hit.score * weight;
            match merged.get_mut(&hit.chunk_id) {
                Some(existing) => {
                    existing.score += weighted;
                    existing.diagnostics.absorb(hit.diagnostics);
                }
                None => {
                    let mut hit = hit;
                    hit.score = weighted;
                    merged.insert(hit.chunk_id.clone(), hit);
                }
            }
        }
    }
    merged.into_values().collect()
}

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    legs: &[RetrieverConfig],
    merge: MergePolicy,
) -> Result<Vec<RetrievedHit>> {
    if legs.is_empty() {
        return Err(crate::error::CoreError::kb_config(
            "fusion retriever declared without base retrievers",
        ));
    }

    let lists = run_legs_parallel(env, query, legs).await?;
    let leg_counts: Vec<usize> = lists.iter().map(Vec::len).collect();

    let mut merged = match merge {
        MergePolicy::Rrf { k } => rrf_merge(lists, None, k),
        MergePolicy::WeightedSum => {
            let uniform = vec![1.0; leg_counts.len()];
            weighted_sum_merge(lists, &uniform)
        }
    };

    super::sort_hits(&mut merged);
    if let Some(first) = merged.first_mut() {
        first.diagnostics.retrieval_details = Some(json!({
            "strategy": SOURCE_TAG,
            "legs": legs.iter().map(|l| l.name()).collect::<Vec<_>>(),
            "leg_result_counts": leg_counts,
        }));
    }
    for hit in &mut merged {
        hit.source_tag = SOURCE_TAG.to_string();
    }
    Ok(merged)
}
