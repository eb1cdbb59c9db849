//! Ensemble: an arbitrary weighted list of retrievers, merged by RRF or
//! weighted sum.

use serde_json::json;

use super::fusion::{rrf_merge, weighted_sum_merge};
use super::{run_legs_parallel, RetrievalEnv, RetrievalQuery};
use crate::config::{EnsembleLeg, MergePolicy};
use crate::error::{CoreError, Result};
use crate::model::RetrievedHit;

pub(crate) const SOURCE_TAG: &str = "ensemble";

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    legs: &[EnsembleLeg],
    merge: MergePolicy,
) -> Result<Vec<RetrievedHit>> {
    if legs.is_empty() {
        return Err(CoreError::kb_config(
            "ensemble retriever declared without legs",
        ));
    }

    let configs: Vec<_> = legs.iter().map(|l| l.retriever.clone()).collect();
    let weights: Vec<f32> = legs.iter().map(|l| l.weight).collect();
    let lists = run_legs_parallel(env, query, &configs).await?;
    let leg_counts: Vec<usize> = lists.iter().map(Vec::len).collect();

    let mut merged = match merge {
        MergePolicy::Rrf { k } => rrf_merge(lists, Some(&weights), k),
        MergePolicy::WeightedSum => weighted_sum_merge(lists, &weights),
    };
    super::sort_hits(&mut merged);

    for hit in &mut merged {
        hit.source_tag = SOURCE_TAG.to_string();
    }
    if let Some(first) = merged.first_mut() {
        first.diagnostics.retrieval_details = Some(json!({
            "strategy": SOURCE_TAG,
            "legs": configs.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "weights": weights,
            "leg_result_counts": leg_counts,
        }));
    }
    Ok(merged)
}
