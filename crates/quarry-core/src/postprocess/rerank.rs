//! Rerank post-processing.
//!
//! The top-N hit texts go to the rerank model; their scores are replaced and
//! the segment re-sorted. Visualization fields attached to the pre-rerank
//! top hit (HyDE queries, paraphrases, parsed filters, merge details) are
//! migrated to the post-rerank top hit so clients always find them on the
//! first result.

use std::sync::Arc;

use crate::error::Result;
use crate::model::RetrievedHit;
use crate::providers::RerankClient;

pub async fn rerank(
    client: &Arc<dyn RerankClient>,
    query: &str,
    mut hits: Vec<RetrievedHit>,
    top_n: usize,
) -> Result<Vec<RetrievedHit>> {
    if hits.len() < 2 {
        return Ok(hits);
    }

    let carried = std::mem::take(&mut hits[0].diagnostics);

    let n = top_n.min(hits.len());
    let candidates: Vec<String> = hits[..n].iter().map(|h| h.text.clone()).collect();
    let scores = client.rerank(query, &candidates).await?;

    let mut head: Vec<RetrievedHit> = hits.drain(..n).collect();
    for (hit, score) in head.iter_mut().zip(scores) {
        hit.score = score;
    }
    crate::retrieval::sort_hits(&mut head);

    let mut reranked = head;
    reranked.extend(hits);
    if let Some(first) = reranked.first_mut() {
        first.diagnostics.absorb(carried);
    }

    tracing::debug!(
        model = client.model(),
        reranked = n,
        "rerank complete"
    );
    Ok(reranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HitDiagnostics;
    use async_trait::async_trait;

    struct ReverseReranker;

    #[async_trait]
    impl RerankClient for ReverseReranker {
        async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
            // Score candidates in reverse input order.
            Ok((0..candidates.len()).map(|i| i as f32).collect())
        }

        fn model(&self) -> &str {
            "reverse"
        }
    }

    fn hit(chunk_id: &str, score: f32) -> RetrievedHit {
        RetrievedHit {
            chunk_id: chunk_id.to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            text: format!("text {chunk_id}"),
            score,
            ordinal: 0,
            metadata: serde_json::json!({}),
            source_tag: "dense".to_string(),
            level: None,
            parent_not_found: false,
            diagnostics: HitDiagnostics::default(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_diagnostics_migrate_to_new_top_hit() {
        let client: Arc<dyn RerankClient> = Arc::new(ReverseReranker);
        let mut first = hit("a", 0.9);
        first.diagnostics.hyde_queries = Some(vec!["hypothetical".to_string()]);
        let hits = vec![first, hit("b", 0.8), hit("c", 0.7)];

        let reranked = rerank(&client, "query", hits, 3).await.unwrap();
        // The reranker reversed the order; "c" is the new top hit.
        assert_eq!(reranked[0].chunk_id, "c");
        assert_eq!(
            reranked[0].diagnostics.hyde_queries.as_deref(),
            Some(&["hypothetical".to_string()][..])
        );
        assert!(reranked
            .iter()
            .skip(1)
            .all(|h| h.diagnostics.hyde_queries.is_none()));
    }

    #[tokio::test]
    async fn test_tail_beyond_top_n_keeps_order() {
        let client: Arc<dyn RerankClient> = Arc::new(ReverseReranker);
        let hits = vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.7), hit("d", 0.6)];
        let reranked = rerank(&client, "query", hits, 2).await.unwrap();
        assert_eq!(reranked[0].chunk_id, "b");
        assert_eq!(reranked[2].chunk_id, "c");
        assert_eq!(reranked[3].chunk_id, "d");
    }

    #[tokio::test]
    async fn test_single_hit_untouched() {
        let client: Arc<dyn RerankClient> = Arc::new(ReverseReranker);
        let hits = vec![hit("a", 0.9)];
        let reranked = rerank(&client, "query", hits, 10).await.unwrap();
        assert_eq!(reranked[0].chunk_id, "a");
        assert!((reranked[0].score - 0.9).abs() < 1e-6);
    }
}
