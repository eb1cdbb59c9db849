//! HyDE: retrieve with LLM-generated hypothetical answers.
//!
//! Dense matching works better when the query looks like an answer. The LLM
//! writes `num_queries` hypothetical passages answering the query; the base
//! retriever runs on each (plus optionally the original query) and the
//! rankings merge by RRF. The generated passages are attached to the first
//! hit as `hyde_queries`.

use super::{fusion::rrf_merge, run_queries_parallel, RetrievalEnv, RetrievalQuery};
use crate::config::RetrieverConfig;
use crate::error::Result;
use crate::model::RetrievedHit;

pub(crate) const SOURCE_TAG: &str = "hyde";
const GENERATION_MAX_TOKENS: usize = 512;
const RRF_K: f32 = 60.0;

/// Strip list markers the model may prefix lines with.
pub(crate) fn strip_list_marker(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')', '-', '*'])
        .trim()
}

pub(crate) async fn generate_variants(
    env: &RetrievalEnv,
    prompt: String,
    num_queries: usize,
) -> Result<Vec<String>> {
    let llm = env.providers.require_llm()?;
    let response = llm.complete(&prompt, GENERATION_MAX_TOKENS).await?;
    Ok(response
        .lines()
        .map(strip_list_marker)
        .filter(|l| !l.is_empty())
        .take(num_queries)
        .map(str::to_string)
        .collect())
}

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    base: &RetrieverConfig,
    num_queries: usize,
    include_original: bool,
) -> Result<Vec<RetrievedHit>> {
    let prompt = format!(
        "Write {num_queries} short hypothetical passages, one per line, each \
         phrased as if it were documentation that directly answers this \
         question:\n\n{}\n",
        query.text
    );
    let hyde_queries = generate_variants(env, prompt, num_queries).await?;

    if hyde_queries.is_empty() {
        tracing::warn!("HyDE generated no variants, falling back to the original query");
        return super::run(base, env, query).await;
    }

    let mut variants: Vec<RetrievalQuery> =
        hyde_queries.iter().map(|q| query.with_text(q)).collect();
    if include_original {
        variants.push(query.clone());
    }

    let lists = run_queries_parallel(env, base, &variants).await?;
    let mut merged = rrf_merge(lists, None, RRF_K);
    super::sort_hits(&mut merged);

    for hit in &mut merged {
        hit.source_tag = SOURCE_TAG.to_string();
    }
    if let Some(first) = merged.first_mut() {
        first.diagnostics.hyde_queries = Some(hyde_queries);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("1. Answer text"), "Answer text");
        assert_eq!(strip_list_marker("2) Another"), "Another");
        assert_eq!(strip_list_marker("- Bullet"), "Bullet");
        assert_eq!(strip_list_marker("Plain"), "Plain");
    }
}
