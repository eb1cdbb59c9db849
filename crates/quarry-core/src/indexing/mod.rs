//! Indexing: writing chunks to the dense and sparse stores.
//!
//! Per-chunk success is the unit of progress. There are no cross-chunk
//! transactions: a document may rest with some chunks `indexed` and others
//! `failed`, and the explicit retry operation drives `failed → indexing`
//! under a retry cap. Consistency with the relational store is
//! status-driven, backed by the reconciliation sweep.

pub mod hierarchical;
pub mod isolation;
pub mod reconcile;

pub use hierarchical::{TreeBuilder, TreeReport};
pub use isolation::collection_for_tenant;
pub use reconcile::{sweep, ReconcileReport};

use std::sync::Arc;

use crate::config::ResolvedConfig;
use crate::enrich::embedding_input;
use crate::error::{CoreError, Result};
use crate::model::{Chunk, Document, IndexingStatus, PointPayload, VectorPoint};
use crate::providers::EmbeddingClient;
use crate::storage::{bm25::tokenize_terms, DenseStore, RelationalStore, SparseStore};

/// Outcome of indexing one document's chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Chunks that reached `indexed` in this pass.
    pub indexed: usize,
    /// Chunks that reached `failed` in this pass.
    pub failed: usize,
    /// Chunks skipped because they were already `indexed`, or because their
    /// retry budget is exhausted.
    pub skipped: usize,
}

/// Standard indexer.
pub struct Indexer {
    relational: Arc<dyn RelationalStore>,
    dense: Arc<dyn DenseStore>,
    sparse: Option<Arc<dyn SparseStore>>,
    embeddings: Arc<dyn EmbeddingClient>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("embedding_model", &self.embeddings.model())
            .field("sparse", &self.sparse.is_some())
            .finish()
    }
}

/// Build a chunk's vector point, snapshotting the document's ACL.
fn point_for_chunk(document: &Document, chunk: &Chunk, vector: Vec<f32>) -> VectorPoint {
    debug_assert_eq!(chunk.tenant_id, document.tenant_id);
    debug_assert_eq!(chunk.kb_id, document.kb_id);
    VectorPoint {
        id: chunk.id.clone(),
        vector,
        payload: PointPayload {
            tenant_id: chunk.tenant_id.clone(),
            kb_id: chunk.kb_id.clone(),
            document_id: chunk.document_id.clone(),
            chunk_id: chunk.id.clone(),
            ordinal: chunk.ordinal,
            metadata: chunk.metadata.clone(),
            sensitivity: document.sensitivity,
            acl: document.acl.clone(),
        },
    }
}

impl Indexer {
    /// Create a new indexer.
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        dense: Arc<dyn DenseStore>,
        sparse: Option<Arc<dyn SparseStore>>,
        embeddings: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            relational,
            dense,
            sparse,
            embeddings,
        }
    }

    /// Index a document's chunks into the given collection.
    ///
    /// Chunks already `indexed` are skipped, which makes re-ingestion of
    /// identical content a no-op on vector records. Failures are recorded
    /// per chunk; the call itself only errors on misconfiguration.
    pub async fn index_document(
        &self,
        config: &ResolvedConfig,
        collection: &str,
        document: &Document,
        chunks: &[Chunk],
    ) -> Result<IndexReport> {
        if self.embeddings.dimension() != config.embedding.dim {
            return Err(CoreError::EmbeddingDimMismatch {
                query: self.embeddings.dimension(),
                collection: config.embedding.dim,
            });
        }
        self.dense
            .ensure_collection(collection, config.embedding.dim)
            .await?;

        let mut report = IndexReport::default();
        let pending: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| {
                if c.indexing_status == IndexingStatus::Indexed {
                    report.skipped += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        let prepend_summary = config
            .enrichment
            .summarizer
            .as_ref()
            .is_some_and(|s| s.prepend_summary);

        for batch in pending.chunks(config.embed_batch_size.max(1)) {
            self.index_batch(collection, document, batch, prepend_summary, &mut report)
                .await?;
        }

        tracing::info!(
            document_id = %document.id,
            kb_id = %document.kb_id,
            indexed = report.indexed,
            failed = report.failed,
            skipped = report.skipped,
            "document indexing complete"
        );
        Ok(report)
    }

    /// One embedding batch: mark `indexing`, embed, write points and sparse
    /// records, mark `indexed`. A failure marks every chunk in the batch
    /// `failed` and moves on to the next batch.
    async fn index_batch(
        &self,
        collection: &str,
        document: &Document,
        batch: &[&Chunk],
        prepend_summary: bool,
        report: &mut IndexReport,
    ) -> Result<()> {
        for chunk in batch {
            self.relational
                .update_chunk_status(&chunk.id, IndexingStatus::Indexing, None)
                .await?;
        }

        let inputs: Vec<String> = batch
            .iter()
            .map(|c| embedding_input(document, c, prepend_summary))
            .collect();

        let outcome = async {
            let vectors = self.embeddings.embed(&inputs).await?;
            let points: Vec<VectorPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| point_for_chunk(document, chunk, vector))
                .collect();
            self.dense.upsert_points(collection, &points).await?;

            if let Some(sparse) = &self.sparse {
                for (chunk, point) in batch.iter().zip(&points) {
                    sparse
                        .index(&point.payload, &tokenize_terms(&chunk.text))
                        .await?;
                }
            }
            Ok::<(), CoreError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                for chunk in batch {
                    self.relational
                        .update_chunk_status(&chunk.id, IndexingStatus::Indexed, None)
                        .await?;
                    report.indexed += 1;
                }
            }
            Err(err) => {
                tracing::warn!(
                    document_id = %document.id,
                    batch_size = batch.len(),
                    error = %err,
                    "indexing batch failed"
                );
                for chunk in batch {
                    self.relational
                        .update_chunk_status(
                            &chunk.id,
                            IndexingStatus::Failed,
                            Some(err.to_string()),
                        )
                        .await?;
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Re-drive a document's `failed` chunks.
    ///
    /// Idempotent: `indexed` chunks are untouched, and chunks whose
    /// `retry_count` reached the cap are skipped.
    pub async fn retry_failed_chunks(
        &self,
        config: &ResolvedConfig,
        collection: &str,
        document: &Document,
    ) -> Result<IndexReport> {
        let chunks = self
            .relational
            .list_chunks_for_document(&document.id)
            .await?;

        let mut exhausted = 0usize;
        let retryable: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| c.indexing_status == IndexingStatus::Failed)
            .filter(|c| {
                if c.retry_count >= config.max_chunk_retries {
                    exhausted += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        if retryable.is_empty() {
            return Ok(IndexReport {
                skipped: exhausted,
                ..Default::default()
            });
        }

        tracing::info!(
            document_id = %document.id,
            retrying = retryable.len(),
            exhausted,
            "retrying failed chunks"
        );
        let mut report = self
            .index_document(config, collection, document, &retryable)
            .await?;
        report.skipped += exhausted;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::test_support::test_document;
    use crate::config::{resolve, KbConfig, RequestOverrides, SystemSettings};
    use crate::model::{IsolationStrategy, Tenant, TenantStatus};
    use crate::providers::HashedEmbeddings;
    use crate::storage::{MemoryBm25, MemoryDense, MemoryRelational, SearchFilter};
    use chrono::Utc;

    const DIM: usize = 64;

    fn config() -> ResolvedConfig {
        let mut kb = KbConfig::default();
        kb.embedding.provider = "local".to_string();
        kb.embedding.dim = DIM;
        let tenant = Tenant {
            id: "t1".to_string(),
            status: TenantStatus::Active,
            isolation: IsolationStrategy::Shared,
            dedicated_collection: false,
            default_models: None,
            created_at: Utc::now(),
        };
        resolve(
            &RequestOverrides::default(),
            &kb,
            &tenant,
            &SystemSettings::default(),
        )
    }

    fn chunk(id: &str, ordinal: usize, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            ordinal,
            text: text.to_string(),
            enriched_text: None,
            metadata: serde_json::json!({"chunk_index": ordinal}),
            indexing_status: IndexingStatus::Pending,
            indexing_error: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        relational: Arc<MemoryRelational>,
        dense: Arc<MemoryDense>,
        indexer: Indexer,
    }

    fn fixture() -> Fixture {
        let relational = Arc::new(MemoryRelational::new());
        let dense = Arc::new(MemoryDense::new());
        let sparse = Arc::new(MemoryBm25::default());
        let indexer = Indexer::new(
            Arc::clone(&relational) as Arc<dyn RelationalStore>,
            Arc::clone(&dense) as Arc<dyn DenseStore>,
            Some(Arc::clone(&sparse) as Arc<dyn SparseStore>),
            Arc::new(HashedEmbeddings::new(DIM)),
        );
        Fixture {
            relational,
            dense,
            indexer,
        }
    }

    #[tokio::test]
    async fn test_index_document_marks_indexed() {
        let f = fixture();
        let document = test_document("d1");
        let chunks = vec![chunk("c0", 0, "alpha beta"), chunk("c1", 1, "gamma delta")];
        f.relational.create_document(&document).await.unwrap();
        f.relational.create_chunks(&chunks).await.unwrap();

        let report = f
            .indexer
            .index_document(&config(), "quarry_chunks", &document, &chunks)
            .await
            .unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, 0);

        let stored = f.relational.list_chunks_for_document("d1").await.unwrap();
        assert!(stored
            .iter()
            .all(|c| c.indexing_status == IndexingStatus::Indexed));
        assert_eq!(f.dense.point_count("quarry_chunks"), 2);
    }

    #[tokio::test]
    async fn test_reindex_is_noop_on_points() {
        let f = fixture();
        let document = test_document("d1");
        let chunks = vec![chunk("c0", 0, "alpha beta")];
        f.relational.create_document(&document).await.unwrap();
        f.relational.create_chunks(&chunks).await.unwrap();

        f.indexer
            .index_document(&config(), "quarry_chunks", &document, &chunks)
            .await
            .unwrap();
        let refreshed = f.relational.list_chunks_for_document("d1").await.unwrap();
        let report = f
            .indexer
            .index_document(&config(), "quarry_chunks", &document, &refreshed)
            .await
            .unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(f.dense.point_count("quarry_chunks"), 1);
    }

    #[tokio::test]
    async fn test_acl_snapshot_on_points() {
        let f = fixture();
        let mut document = test_document("d1");
        document.sensitivity = crate::model::SensitivityLevel::Restricted;
        document.acl.allow_roles.insert("sales".to_string());
        let chunks = vec![chunk("c0", 0, "confidential pricing")];
        f.relational.create_document(&document).await.unwrap();
        f.relational.create_chunks(&chunks).await.unwrap();

        f.indexer
            .index_document(&config(), "quarry_chunks", &document, &chunks)
            .await
            .unwrap();

        let filter = SearchFilter::for_kbs("t1", &["kb1".to_string()]);
        let query = HashedEmbeddings::new(DIM).embed_one("pricing");
        let points = f
            .dense
            .search("quarry_chunks", &query, 1, &filter)
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].payload.acl.allow_roles.contains("sales"));
        assert_eq!(
            points[0].payload.sensitivity,
            crate::model::SensitivityLevel::Restricted
        );
    }

    #[tokio::test]
    async fn test_dim_mismatch_rejected() {
        let f = fixture();
        let mut bad = config();
        bad.embedding.dim = DIM + 1;
        let document = test_document("d1");
        let err = f
            .indexer
            .index_document(&bad, "quarry_chunks", &document, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EMBEDDING_DIM_MISMATCH");
    }

    #[tokio::test]
    async fn test_retry_respects_cap() {
        let f = fixture();
        let document = test_document("d1");
        let mut failed = chunk("c0", 0, "text");
        failed.indexing_status = IndexingStatus::Failed;
        failed.retry_count = 99;
        f.relational.create_document(&document).await.unwrap();
        f.relational.create_chunks(&[failed]).await.unwrap();

        let report = f
            .indexer
            .retry_failed_chunks(&config(), "quarry_chunks", &document)
            .await
            .unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_retry_reindexes_failed() {
        let f = fixture();
        let document = test_document("d1");
        let mut failed = chunk("c0", 0, "text to recover");
        failed.indexing_status = IndexingStatus::Failed;
        failed.retry_count = 1;
        f.relational.create_document(&document).await.unwrap();
        f.relational.create_chunks(&[failed]).await.unwrap();

        let report = f
            .indexer
            .retry_failed_chunks(&config(), "quarry_chunks", &document)
            .await
            .unwrap();
        assert_eq!(report.indexed, 1);
        let stored = f.relational.list_chunks_for_document("d1").await.unwrap();
        assert_eq!(stored[0].indexing_status, IndexingStatus::Indexed);
    }
}
