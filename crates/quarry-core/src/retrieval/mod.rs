//! Retrieval strategies.
//!
//! A retrieval strategy is a shallow tree ([`crate::config::RetrieverConfig`]):
//! leaves are the primitive dense/sparse/hybrid retrievers, internal nodes
//! (fusion, HyDE, multi-query, self-query, parent-document, ensemble) carry
//! a merge policy. [`run`] interprets the tree against a
//! [`RetrievalEnv`]. Composite legs run in parallel; a leg that exceeds its
//! deadline contributes an empty list, and a composite only fails when
//! every leg failed.

pub(crate) mod dense;
pub(crate) mod ensemble;
pub(crate) mod fusion;
pub(crate) mod hybrid;
pub(crate) mod hyde;
pub(crate) mod multi_query;
pub(crate) mod parent_document;
pub(crate) mod self_query;
pub(crate) mod sparse;
pub(crate) mod tree;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::config::{ResolvedConfig, RetrieverConfig};
use crate::error::{CoreError, Result};
use crate::model::RetrievedHit;
use crate::providers::ProviderSet;
use crate::storage::{DenseStore, RelationalStore, ScoredPoint, SparseStore};

/// Everything a retrieval strategy needs to run.
pub struct RetrievalEnv {
    /// Relational driver, for chunk/document resolution.
    pub relational: Arc<dyn RelationalStore>,
    /// Dense driver.
    pub dense: Arc<dyn DenseStore>,
    /// Sparse driver, when the KB has sparse records.
    pub sparse: Option<Arc<dyn SparseStore>>,
    /// Model providers.
    pub providers: ProviderSet,
    /// Dense collection the tenant's points live in.
    pub collection: String,
    /// Resolved per-request configuration.
    pub config: ResolvedConfig,
}

impl std::fmt::Debug for RetrievalEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEnv")
            .field("collection", &self.collection)
            .field("retriever", &self.config.retriever.name())
            .finish()
    }
}

/// One retrieval query, scoped to a tenant and a KB set.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    /// Query text.
    pub text: String,
    /// Caller's tenant.
    pub tenant_id: String,
    /// Knowledge bases to search.
    pub kb_ids: Vec<String>,
    /// Results wanted.
    pub top_k: usize,
    /// Extra structural-metadata constraints (child scoping, self-query
    /// filters).
    pub metadata_eq: BTreeMap<String, serde_json::Value>,
}

impl RetrievalQuery {
    /// Copy of this query with different text.
    #[must_use]
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }

    /// Copy of this query with an extra metadata constraint.
    #[must_use]
    pub fn with_metadata(&self, key: &str, value: serde_json::Value) -> Self {
        let mut query = self.clone();
        query.metadata_eq.insert(key.to_string(), value);
        query
    }
}

/// Run a retrieval strategy tree.
///
/// Returned hits are sorted by score with deterministic tie-breaks and
/// truncated to the query's `top_k`.
pub fn run<'a>(
    config: &'a RetrieverConfig,
    env: &'a RetrievalEnv,
    query: &'a RetrievalQuery,
) -> BoxFuture<'a, Result<Vec<RetrievedHit>>> {
    async move {
        let mut hits = match config {
            RetrieverConfig::Dense => dense::retrieve(env, query).await?,
            RetrieverConfig::Sparse { normalization } => {
                sparse::retrieve(env, query, *normalization).await?
            }
            RetrieverConfig::Hybrid {
                dense_weight,
                sparse_weight,
                normalization,
            } => hybrid::retrieve(env, query, *dense_weight, *sparse_weight, *normalization).await?,
            RetrieverConfig::Fusion { legs, merge } => {
                fusion::retrieve(env, query, legs, *merge).await?
            }
            RetrieverConfig::Hyde {
                base,
                num_queries,
                include_original,
            } => hyde::retrieve(env, query, base, *num_queries, *include_original).await?,
            RetrieverConfig::MultiQuery { base, num_queries } => {
                multi_query::retrieve(env, query, base, *num_queries).await?
            }
            RetrieverConfig::SelfQuery { base } => self_query::retrieve(env, query, base).await?,
            RetrieverConfig::ParentDocument { base, return_mode } => {
                parent_document::retrieve(env, query, base, *return_mode).await?
            }
            RetrieverConfig::Ensemble { legs, merge } => {
                ensemble::retrieve(env, query, legs, *merge).await?
            }
            RetrieverConfig::HierarchicalTree { mode, branch } => {
                tree::retrieve(env, query, *mode, *branch).await?
            }
        };
        sort_hits(&mut hits);
        hits.truncate(query.top_k);
        Ok(hits)
    }
    .boxed()
}

/// Sort by score descending; ties break on ordinal ascending, then chunk id
/// ascending.
pub(crate) fn sort_hits(hits: &mut [RetrievedHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Resolve scored points into hits through the relational store.
///
/// The chunk's stored `text` is always what goes into the hit, regardless of
/// what text was embedded. Points whose chunk row has vanished are dropped.
pub(crate) async fn hits_from_points(
    env: &RetrievalEnv,
    points: Vec<ScoredPoint>,
    source_tag: &str,
) -> Result<Vec<RetrievedHit>> {
    let ids: Vec<String> = points.iter().map(|p| p.payload.chunk_id.clone()).collect();
    let chunks = env.relational.get_chunks_by_ids(&ids).await?;
    let by_id: std::collections::HashMap<&str, &crate::model::Chunk> =
        chunks.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut hits = Vec::with_capacity(points.len());
    for point in points {
        let Some(chunk) = by_id.get(point.payload.chunk_id.as_str()) else {
            tracing::debug!(chunk_id = %point.payload.chunk_id, "point without chunk row, dropping");
            continue;
        };
        hits.push(RetrievedHit {
            chunk_id: chunk.id.clone(),
            kb_id: chunk.kb_id.clone(),
            document_id: chunk.document_id.clone(),
            text: chunk.text.clone(),
            score: point.score,
            ordinal: chunk.ordinal,
            metadata: chunk.metadata.clone(),
            source_tag: source_tag.to_string(),
            level: None,
            parent_not_found: false,
            diagnostics: Default::default(),
            context: None,
        });
    }
    Ok(hits)
}

/// Run one strategy as a composite leg: deadline overruns and failures both
/// degrade to an empty list, with the failure preserved for the caller to
/// inspect.
async fn run_leg(
    config: &RetrieverConfig,
    env: &RetrievalEnv,
    query: &RetrievalQuery,
) -> (Vec<RetrievedHit>, Option<CoreError>) {
    match tokio::time::timeout(env.config.leg_timeout, run(config, env, query)).await {
        Ok(Ok(hits)) => (hits, None),
        Ok(Err(err)) => {
            tracing::warn!(leg = config.name(), error = %err, "retriever leg failed");
            (Vec::new(), Some(err))
        }
        Err(_) => {
            tracing::warn!(leg = config.name(), "retriever leg deadline exceeded");
            (Vec::new(), None)
        }
    }
}

/// Run several legs in parallel. Fails only when every leg failed; timeouts
/// count as empty results, not failures.
pub(crate) async fn run_legs_parallel(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    legs: &[RetrieverConfig],
) -> Result<Vec<Vec<RetrievedHit>>> {
    let results = join_all(legs.iter().map(|leg| run_leg(leg, env, query))).await;
    collect_leg_results(results)
}

/// Run the same base strategy over several query variants in parallel.
pub(crate) async fn run_queries_parallel(
    env: &RetrievalEnv,
    base: &RetrieverConfig,
    queries: &[RetrievalQuery],
) -> Result<Vec<Vec<RetrievedHit>>> {
    let results = join_all(queries.iter().map(|q| run_leg(base, env, q))).await;
    collect_leg_results(results)
}

fn collect_leg_results(
    results: Vec<(Vec<RetrievedHit>, Option<CoreError>)>,
) -> Result<Vec<Vec<RetrievedHit>>> {
    let total = results.len();
    let mut lists = Vec::with_capacity(total);
    let mut first_error = None;
    let mut failures = 0usize;
    for (hits, error) in results {
        if let Some(err) = error {
            failures += 1;
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
        lists.push(hits);
    }
    if total > 0 && failures == total {
        if let Some(err) = first_error {
            return Err(err);
        }
    }
    Ok(lists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, score: f32, ordinal: usize) -> RetrievedHit {
        RetrievedHit {
            chunk_id: chunk_id.to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            text: String::new(),
            score,
            ordinal,
            metadata: serde_json::json!({}),
            source_tag: "test".to_string(),
            level: None,
            parent_not_found: false,
            diagnostics: Default::default(),
            context: None,
        }
    }

    #[test]
    fn test_tie_breaks_deterministic() {
        let mut hits = vec![
            hit("z", 0.5, 2),
            hit("b", 0.5, 1),
            hit("a", 0.5, 1),
            hit("top", 0.9, 7),
        ];
        sort_hits(&mut hits);
        let order: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["top", "a", "b", "z"]);
    }

    #[test]
    fn test_collect_legs_tolerates_partial_failure() {
        let results = vec![
            (vec![hit("a", 0.5, 0)], None),
            (Vec::new(), Some(CoreError::provider_transient("down"))),
        ];
        let lists = collect_leg_results(results).unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].len(), 1);
        assert!(lists[1].is_empty());
    }

    #[test]
    fn test_collect_legs_surfaces_total_failure() {
        let results = vec![
            (Vec::new(), Some(CoreError::provider_transient("down"))),
            (Vec::new(), Some(CoreError::provider_transient("also down"))),
        ];
        assert!(collect_leg_results(results).is_err());
    }
}
