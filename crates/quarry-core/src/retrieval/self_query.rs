//! Self-query: ask the LLM to split the query into a semantic part and a
//! structural-metadata filter, then run the base retriever with both.

use std::collections::BTreeMap;

use super::{RetrievalEnv, RetrievalQuery};
use crate::config::RetrieverConfig;
use crate::error::Result;
use crate::model::RetrievedHit;

pub(crate) const SOURCE_TAG: &str = "self_query";
const DECOMPOSE_MAX_TOKENS: usize = 256;

/// Model output: `{"semantic_query": "...", "filters": {"key": value}}`.
#[derive(Debug, serde::Deserialize)]
struct Decomposition {
    semantic_query: String,
    #[serde(default)]
    filters: serde_json::Map<String, serde_json::Value>,
}

/// Parse the decomposition, tolerating code fences around the JSON.
fn parse_decomposition(raw: &str) -> Option<Decomposition> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(trimmed).ok()
}

/// Only scalar filter values are usable as exact-match constraints.
fn scalar_filters(
    filters: serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, serde_json::Value> {
    filters
        .into_iter()
        .filter(|(_, v)| v.is_string() || v.is_number() || v.is_boolean())
        .collect()
}

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    base: &RetrieverConfig,
) -> Result<Vec<RetrievedHit>> {
    let llm = env.providers.require_llm()?;
    let prompt = format!(
        "Split this search query into a semantic search string and an exact \
         metadata filter. Reply with JSON only: \
         {{\"semantic_query\": \"...\", \"filters\": {{}}}}. Filter keys refer \
         to structural chunk metadata such as language, headings, or \
         block_kind.\n\nQuery: {}",
        query.text
    );

    let (semantic_query, filters) = match llm.complete(&prompt, DECOMPOSE_MAX_TOKENS).await {
        Ok(raw) => match parse_decomposition(&raw) {
            Some(d) if !d.semantic_query.trim().is_empty() => {
                (d.semantic_query, scalar_filters(d.filters))
            }
            _ => {
                tracing::warn!("self-query decomposition unparsable, using the raw query");
                (query.text.clone(), BTreeMap::new())
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "self-query decomposition failed, using the raw query");
            (query.text.clone(), BTreeMap::new())
        }
    };

    let mut scoped = query.with_text(&semantic_query);
    scoped.metadata_eq.extend(filters.clone());

    let mut hits = super::run(base, env, &scoped).await?;
    for hit in &mut hits {
        hit.source_tag = SOURCE_TAG.to_string();
    }
    if let Some(first) = hits.first_mut() {
        first.diagnostics.semantic_query = Some(semantic_query);
        first.diagnostics.parsed_filters =
            Some(serde_json::Value::Object(filters.into_iter().collect()));
    }
    Ok(hits)
}
