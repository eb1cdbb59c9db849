//! Multi-query: retrieve with LLM-generated paraphrases of the query.

use serde_json::json;

use super::{fusion::rrf_merge, hyde::generate_variants, run_queries_parallel};
use super::{RetrievalEnv, RetrievalQuery};
use crate::config::RetrieverConfig;
use crate::error::Result;
use crate::model::RetrievedHit;

pub(crate) const SOURCE_TAG: &str = "multi_query";
const RRF_K: f32 = 60.0;

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    base: &RetrieverConfig,
    num_queries: usize,
) -> Result<Vec<RetrievedHit>> {
    let prompt = format!(
        "Rephrase the following search query {num_queries} different ways, \
         one per line, preserving its meaning:\n\n{}\n",
        query.text
    );
    let generated = generate_variants(env, prompt, num_queries).await?;

    // The original query always participates alongside its paraphrases.
    let mut variants: Vec<RetrievalQuery> = vec![query.clone()];
    variants.extend(generated.iter().map(|q| query.with_text(q)));

    let lists = run_queries_parallel(env, base, &variants).await?;
    let breakdown: Vec<serde_json::Value> = variants
        .iter()
        .zip(&lists)
        .map(|(variant, hits)| {
            json!({
                "query": variant.text.clone(),
                "results": hits.len(),
            })
        })
        .collect();

    let mut merged = rrf_merge(lists, None, RRF_K);
    super::sort_hits(&mut merged);

    for hit in &mut merged {
        hit.source_tag = SOURCE_TAG.to_string();
    }
    if let Some(first) = merged.first_mut() {
        first.diagnostics.generated_queries = Some(generated);
        first.diagnostics.retrieval_details = Some(json!({
            "strategy": SOURCE_TAG,
            "per_query": breakdown,
        }));
    }
    Ok(merged)
}
