//! Storage drivers.
//!
//! The core coordinates three backends through abstract traits:
//! - [`RelationalStore`]: the source of truth for tenants, knowledge bases,
//!   documents, chunks, and hierarchy nodes.
//! - [`DenseStore`]: embedding vectors with filtered k-NN search.
//! - [`SparseStore`]: tokenized terms with BM25 scoring.
//!
//! The dense and sparse stores are derived data: their records are written
//! per chunk by the indexing layer and re-creatable from the relational
//! store. Reference implementations live in [`memory`] (both), [`sqlite`]
//! (relational), and [`bm25`] (sparse).

pub mod bm25;
pub mod memory;
pub mod sqlite;

pub use bm25::MemoryBm25;
pub use memory::{MemoryDense, MemoryRelational};
pub use sqlite::SqliteRelational;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    ApiKeyIdentity, Chunk, Document, HierarchyNode, IndexingStatus, KnowledgeBase, PointPayload,
    SummaryStatus, Tenant, VectorPoint,
};

/// Filter applied to dense and sparse searches and deletes.
///
/// `tenant_id` and `kb_ids` carry the isolation contract: every retrieval
/// path sets both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Owning tenant; `None` only for administrative sweeps.
    pub tenant_id: Option<String>,
    /// Knowledge bases to search; empty means any.
    pub kb_ids: Vec<String>,
    /// Restrict to one document.
    pub document_id: Option<String>,
    /// Restrict to specific chunks.
    pub chunk_ids: Option<Vec<String>>,
    /// Exact-match constraints on structural metadata keys.
    pub metadata_eq: BTreeMap<String, serde_json::Value>,
}

impl SearchFilter {
    /// Standard retrieval filter: one tenant, a set of KBs.
    #[must_use]
    pub fn for_kbs(tenant_id: &str, kb_ids: &[String]) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            kb_ids: kb_ids.to_vec(),
            ..Default::default()
        }
    }

    /// Filter for everything belonging to one document.
    #[must_use]
    pub fn for_document(tenant_id: &str, kb_id: &str, document_id: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            kb_ids: vec![kb_id.to_string()],
            document_id: Some(document_id.to_string()),
            ..Default::default()
        }
    }

    /// Add an exact-match metadata constraint.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata_eq.insert(key.to_string(), value);
        self
    }

    /// Whether a point payload passes this filter.
    #[must_use]
    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(tenant) = &self.tenant_id {
            if payload.tenant_id != *tenant {
                return false;
            }
        }
        if !self.kb_ids.is_empty() && !self.kb_ids.contains(&payload.kb_id) {
            return false;
        }
        if let Some(document) = &self.document_id {
            if payload.document_id != *document {
                return false;
            }
        }
        if let Some(chunks) = &self.chunk_ids {
            if !chunks.contains(&payload.chunk_id) {
                return false;
            }
        }
        for (key, expected) in &self.metadata_eq {
            if payload.metadata.get(key) != Some(expected) {
                return false;
            }
        }
        true
    }
}

/// A dense-search result.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Point id (chunk id for chunk collections).
    pub id: String,
    /// Cosine similarity, roughly [0, 1] for normalized embeddings.
    pub score: f32,
    /// The point's payload.
    pub payload: PointPayload,
}

/// A sparse-search result carrying the raw, unbounded BM25 score.
#[derive(Debug, Clone)]
pub struct SparseHit {
    /// Chunk id.
    pub chunk_id: String,
    /// Raw BM25 score. Callers normalize before mixing with dense scores.
    pub raw_score: f32,
    /// The record's payload copy.
    pub payload: PointPayload,
}

/// Relational driver: the system of record.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Fetch a tenant.
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Create or replace a tenant record.
    async fn put_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Fetch an API key with its resolved identity.
    async fn get_api_key_with_identity(&self, key_id: &str) -> Result<Option<ApiKeyIdentity>>;

    /// Create or replace an API key record.
    async fn put_api_key(&self, key: &ApiKeyIdentity) -> Result<()>;

    /// Fetch a knowledge base with its configuration.
    async fn get_kb_with_config(&self, kb_id: &str) -> Result<Option<KnowledgeBase>>;

    /// Create or replace a knowledge base record.
    async fn put_kb(&self, kb: &KnowledgeBase) -> Result<()>;

    /// Replace a knowledge base's configuration and touch its timestamp.
    async fn update_kb_config(&self, kb_id: &str, config: &crate::config::KbConfig) -> Result<()>;

    /// Adjust a knowledge base's document count.
    async fn adjust_document_count(&self, kb_id: &str, delta: i64) -> Result<()>;

    /// Whether any chunk in the KB has reached `indexed`.
    async fn has_indexed_chunks(&self, kb_id: &str) -> Result<bool>;

    /// Persist a new document row.
    async fn create_document(&self, document: &Document) -> Result<()>;

    /// Update a document's summary and summary status.
    async fn update_document_summary(
        &self,
        document_id: &str,
        summary: Option<&str>,
        status: SummaryStatus,
    ) -> Result<()>;

    /// Fetch documents by id. Missing ids are silently absent.
    async fn get_documents_by_ids(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// List a knowledge base's documents.
    async fn list_documents_for_kb(&self, kb_id: &str) -> Result<Vec<Document>>;

    /// Delete a document and all of its chunks.
    async fn delete_document_cascade(&self, document_id: &str) -> Result<()>;

    /// Persist chunk rows.
    async fn create_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Update one chunk's indexing status. A transition to `failed` records
    /// the error string and increments `retry_count`.
    async fn update_chunk_status(
        &self,
        chunk_id: &str,
        status: IndexingStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// List a document's chunks in ordinal order.
    async fn list_chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// List every chunk in a knowledge base.
    async fn list_chunks_for_kb(&self, kb_id: &str) -> Result<Vec<Chunk>>;

    /// Fetch chunks by id. Missing ids are silently absent.
    async fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// Atomically replace a knowledge base's hierarchy tree.
    async fn replace_hierarchy(&self, kb_id: &str, nodes: &[HierarchyNode]) -> Result<()>;

    /// Fetch a knowledge base's hierarchy tree.
    async fn get_hierarchy_nodes(&self, kb_id: &str) -> Result<Vec<HierarchyNode>>;
}

/// Dense-vector driver.
#[async_trait]
pub trait DenseStore: Send + Sync {
    /// Create the collection if missing; verify the dimension if present.
    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()>;

    /// Dimension of an existing collection.
    async fn collection_dim(&self, name: &str) -> Result<Option<usize>>;

    /// Insert or replace points. Point ids equal chunk ids, so re-indexing
    /// a chunk never duplicates it.
    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()>;

    /// k-NN search, filtered.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>>;

    /// Ids of all points matching a filter. Used by the reconciliation
    /// sweep.
    async fn list_point_ids(&self, collection: &str, filter: &SearchFilter) -> Result<Vec<String>>;

    /// Delete all points matching a filter.
    async fn delete_by_filter(&self, collection: &str, filter: &SearchFilter) -> Result<()>;
}

/// Sparse lexical driver.
#[async_trait]
pub trait SparseStore: Send + Sync {
    /// Index a chunk's terms under its payload scope.
    async fn index(&self, payload: &PointPayload, terms: &[String]) -> Result<()>;

    /// BM25 search, filtered. Scores are raw and unbounded.
    async fn search(
        &self,
        terms: &[String],
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<SparseHit>>;

    /// Delete all records matching a filter.
    async fn delete(&self, filter: &SearchFilter) -> Result<()>;
}

/// Cosine similarity with a zero-norm guard.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AclRules, SensitivityLevel};

    fn payload(tenant: &str, kb: &str, chunk: &str) -> PointPayload {
        PointPayload {
            tenant_id: tenant.to_string(),
            kb_id: kb.to_string(),
            document_id: "d1".to_string(),
            chunk_id: chunk.to_string(),
            ordinal: 0,
            metadata: serde_json::json!({"child": true}),
            sensitivity: SensitivityLevel::Public,
            acl: AclRules::default(),
        }
    }

    #[test]
    fn test_filter_tenant_and_kb() {
        let filter = SearchFilter::for_kbs("t1", &["kb1".to_string()]);
        assert!(filter.matches(&payload("t1", "kb1", "c1")));
        assert!(!filter.matches(&payload("t2", "kb1", "c1")));
        assert!(!filter.matches(&payload("t1", "kb2", "c1")));
    }

    #[test]
    fn test_filter_metadata_eq() {
        let filter = SearchFilter::for_kbs("t1", &["kb1".to_string()])
            .with_metadata("child", serde_json::json!(true));
        assert!(filter.matches(&payload("t1", "kb1", "c1")));

        let mut parent = payload("t1", "kb1", "c2");
        parent.metadata = serde_json::json!({"child": false});
        assert!(!filter.matches(&parent));
    }

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
