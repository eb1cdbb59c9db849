//! Dense retrieval: embed the query, k-NN in the dense store.

use super::{hits_from_points, RetrievalEnv, RetrievalQuery};
use crate::error::Result;
use crate::model::RetrievedHit;
use crate::storage::SearchFilter;

pub(crate) const SOURCE_TAG: &str = "dense";

fn filter_for(query: &RetrievalQuery) -> SearchFilter {
    let mut filter = SearchFilter::for_kbs(&query.tenant_id, &query.kb_ids);
    filter.metadata_eq.extend(query.metadata_eq.clone());
    filter
}

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
) -> Result<Vec<RetrievedHit>> {
    let embedded = env
        .providers
        .embedding
        .embed(std::slice::from_ref(&query.text))
        .await?;
    let Some(query_vector) = embedded.into_iter().next() else {
        return Ok(Vec::new());
    };

    let points = env
        .dense
        .search(&env.collection, &query_vector, query.top_k, &filter_for(query))
        .await?;

    tracing::debug!(
        candidates = points.len(),
        top_k = query.top_k,
        "dense retrieval complete"
    );
    hits_from_points(env, points, SOURCE_TAG).await
}
