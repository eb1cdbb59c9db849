//! Reconciliation sweep.
//!
//! Runs outside the per-request path. Compares `indexed` chunks against the
//! dense store and repairs drift in both directions: chunks whose vector
//! record is missing are re-queued (`indexed → pending`), and points whose
//! chunk no longer exists are deleted. Eventually consistent, never
//! transactional.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::model::IndexingStatus;
use crate::storage::{DenseStore, RelationalStore, SearchFilter, SparseStore};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Chunks re-queued because their vector record was missing.
    pub requeued: usize,
    /// Orphaned points removed from the dense/sparse stores.
    pub orphans_removed: usize,
}

/// Sweep one knowledge base.
pub async fn sweep(
    relational: &Arc<dyn RelationalStore>,
    dense: &Arc<dyn DenseStore>,
    sparse: Option<&Arc<dyn SparseStore>>,
    collection: &str,
    tenant_id: &str,
    kb_id: &str,
) -> Result<ReconcileReport> {
    let chunks = relational.list_chunks_for_kb(kb_id).await?;
    let filter = SearchFilter::for_kbs(tenant_id, &[kb_id.to_string()]);
    let point_ids: HashSet<String> = dense
        .list_point_ids(collection, &filter)
        .await?
        .into_iter()
        .collect();
    let chunk_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

    let mut report = ReconcileReport::default();

    for chunk in &chunks {
        if chunk.indexing_status == IndexingStatus::Indexed && !point_ids.contains(&chunk.id) {
            relational
                .update_chunk_status(&chunk.id, IndexingStatus::Pending, None)
                .await?;
            report.requeued += 1;
        }
    }

    let orphans: Vec<String> = point_ids
        .iter()
        .filter(|id| !chunk_ids.contains(id.as_str()))
        .cloned()
        .collect();
    if !orphans.is_empty() {
        let orphan_filter = SearchFilter {
            tenant_id: Some(tenant_id.to_string()),
            kb_ids: vec![kb_id.to_string()],
            chunk_ids: Some(orphans.clone()),
            ..Default::default()
        };
        dense.delete_by_filter(collection, &orphan_filter).await?;
        if let Some(sparse) = sparse {
            sparse.delete(&orphan_filter).await?;
        }
        report.orphans_removed = orphans.len();
    }

    if report != ReconcileReport::default() {
        tracing::info!(
            kb_id = %kb_id,
            requeued = report.requeued,
            orphans_removed = report.orphans_removed,
            "reconciliation sweep repaired drift"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AclRules, Chunk, PointPayload, SensitivityLevel, VectorPoint};
    use crate::storage::{MemoryDense, MemoryRelational};
    use chrono::Utc;

    fn chunk(id: &str, status: IndexingStatus) -> Chunk {
        Chunk {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            ordinal: 0,
            text: "text".to_string(),
            enriched_text: None,
            metadata: serde_json::json!({}),
            indexing_status: status,
            indexing_error: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    fn point(id: &str) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector: vec![1.0, 0.0],
            payload: PointPayload {
                tenant_id: "t1".to_string(),
                kb_id: "kb1".to_string(),
                document_id: "d1".to_string(),
                chunk_id: id.to_string(),
                ordinal: 0,
                metadata: serde_json::json!({}),
                sensitivity: SensitivityLevel::Public,
                acl: AclRules::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_requeues_missing_points_and_removes_orphans() {
        let relational: Arc<dyn RelationalStore> = Arc::new(MemoryRelational::new());
        let dense_impl = Arc::new(MemoryDense::new());
        let dense: Arc<dyn DenseStore> = Arc::clone(&dense_impl) as Arc<dyn DenseStore>;

        // "drifted" is indexed but has no point; "orphan" has a point but no
        // chunk row; "healthy" has both.
        relational
            .create_chunks(&[
                chunk("drifted", IndexingStatus::Indexed),
                chunk("healthy", IndexingStatus::Indexed),
            ])
            .await
            .unwrap();
        dense.ensure_collection("c", 2).await.unwrap();
        dense
            .upsert_points("c", &[point("healthy"), point("orphan")])
            .await
            .unwrap();

        let report = sweep(&relational, &dense, None, "c", "t1", "kb1")
            .await
            .unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.orphans_removed, 1);

        let chunks = relational.list_chunks_for_kb("kb1").await.unwrap();
        let drifted = chunks.iter().find(|c| c.id == "drifted").unwrap();
        assert_eq!(drifted.indexing_status, IndexingStatus::Pending);
        assert_eq!(dense_impl.point_count("c"), 1);
    }

    #[tokio::test]
    async fn test_healthy_kb_untouched() {
        let relational: Arc<dyn RelationalStore> = Arc::new(MemoryRelational::new());
        let dense: Arc<dyn DenseStore> = Arc::new(MemoryDense::new());
        relational
            .create_chunks(&[chunk("healthy", IndexingStatus::Indexed)])
            .await
            .unwrap();
        dense.ensure_collection("c", 2).await.unwrap();
        dense.upsert_points("c", &[point("healthy")]).await.unwrap();

        let report = sweep(&relational, &dense, None, "c", "t1", "kb1")
            .await
            .unwrap();
        assert_eq!(report, ReconcileReport::default());
    }
}
