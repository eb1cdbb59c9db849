//! In-memory reference implementations of the relational and dense drivers.
//!
//! Used by tests and embedded deployments. All state lives behind
//! `parking_lot` read-write locks; no guard is held across an await point.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{cosine_similarity, DenseStore, RelationalStore, ScoredPoint, SearchFilter};
use crate::error::{CoreError, Result};
use crate::model::{
    ApiKeyIdentity, Chunk, Document, HierarchyNode, IndexingStatus, KnowledgeBase, SummaryStatus,
    Tenant, VectorPoint,
};

#[derive(Default)]
struct RelationalState {
    tenants: HashMap<String, Tenant>,
    api_keys: HashMap<String, ApiKeyIdentity>,
    kbs: HashMap<String, KnowledgeBase>,
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    hierarchies: HashMap<String, Vec<HierarchyNode>>,
}

/// In-memory relational store.
#[derive(Default)]
pub struct MemoryRelational {
    state: RwLock<RelationalState>,
}

impl std::fmt::Debug for MemoryRelational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryRelational")
            .field("documents", &state.documents.len())
            .field("chunks", &state.chunks.len())
            .finish()
    }
}

impl MemoryRelational {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelational {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        Ok(self.state.read().tenants.get(tenant_id).cloned())
    }

    async fn put_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.state
            .write()
            .tenants
            .insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn get_api_key_with_identity(&self, key_id: &str) -> Result<Option<ApiKeyIdentity>> {
        Ok(self.state.read().api_keys.get(key_id).cloned())
    }

    async fn put_api_key(&self, key: &ApiKeyIdentity) -> Result<()> {
        self.state
            .write()
            .api_keys
            .insert(key.key_id.clone(), key.clone());
        Ok(())
    }

    async fn get_kb_with_config(&self, kb_id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.state.read().kbs.get(kb_id).cloned())
    }

    async fn put_kb(&self, kb: &KnowledgeBase) -> Result<()> {
        self.state.write().kbs.insert(kb.id.clone(), kb.clone());
        Ok(())
    }

    async fn update_kb_config(&self, kb_id: &str, config: &crate::config::KbConfig) -> Result<()> {
        let mut state = self.state.write();
        let kb = state
            .kbs
            .get_mut(kb_id)
            .ok_or_else(|| CoreError::KbNotFound(kb_id.to_string()))?;
        kb.config = config.clone();
        kb.updated_at = Utc::now();
        Ok(())
    }

    async fn adjust_document_count(&self, kb_id: &str, delta: i64) -> Result<()> {
        let mut state = self.state.write();
        if let Some(kb) = state.kbs.get_mut(kb_id) {
            kb.document_count = kb.document_count.saturating_add_signed(delta as isize);
            kb.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn has_indexed_chunks(&self, kb_id: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .chunks
            .values()
            .any(|c| c.kb_id == kb_id && c.indexing_status == IndexingStatus::Indexed))
    }

    async fn create_document(&self, document: &Document) -> Result<()> {
        self.state
            .write()
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn update_document_summary(
        &self,
        document_id: &str,
        summary: Option<&str>,
        status: SummaryStatus,
    ) -> Result<()> {
        let mut state = self.state.write();
        let document = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| CoreError::DocNotFound(document_id.to_string()))?;
        document.summary = summary.map(str::to_string);
        document.summary_status = status;
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn get_documents_by_ids(&self, ids: &[String]) -> Result<Vec<Document>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.documents.get(id).cloned())
            .collect())
    }

    async fn list_documents_for_kb(&self, kb_id: &str) -> Result<Vec<Document>> {
        let state = self.state.read();
        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.kb_id == kb_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn delete_document_cascade(&self, document_id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.documents.remove(document_id);
        state.chunks.retain(|_, c| c.document_id != document_id);
        Ok(())
    }

    async fn create_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write();
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn update_chunk_status(
        &self,
        chunk_id: &str,
        status: IndexingStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let chunk = state
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| CoreError::validation(format!("unknown chunk: {chunk_id}")))?;
        chunk.indexing_status = status;
        chunk.indexing_error = error;
        if status == IndexingStatus::Failed {
            chunk.retry_count += 1;
        }
        Ok(())
    }

    async fn list_chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    async fn list_chunks_for_kb(&self, kb_id: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.kb_id == kb_id)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| (&a.document_id, a.ordinal).cmp(&(&b.document_id, b.ordinal)));
        Ok(chunks)
    }

    async fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.chunks.get(id).cloned())
            .collect())
    }

    async fn replace_hierarchy(&self, kb_id: &str, nodes: &[HierarchyNode]) -> Result<()> {
        self.state
            .write()
            .hierarchies
            .insert(kb_id.to_string(), nodes.to_vec());
        Ok(())
    }

    async fn get_hierarchy_nodes(&self, kb_id: &str) -> Result<Vec<HierarchyNode>> {
        Ok(self
            .state
            .read()
            .hierarchies
            .get(kb_id)
            .cloned()
            .unwrap_or_default())
    }
}

struct MemoryCollection {
    dim: usize,
    points: HashMap<String, VectorPoint>,
}

/// In-memory dense store with exact cosine search.
#[derive(Default)]
pub struct MemoryDense {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl std::fmt::Debug for MemoryDense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collections = self.collections.read();
        f.debug_struct("MemoryDense")
            .field("collections", &collections.len())
            .finish()
    }
}

impl MemoryDense {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection, for tests and diagnostics.
    #[must_use]
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |c| c.points.len())
    }
}

#[async_trait]
impl DenseStore for MemoryDense {
    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let mut collections = self.collections.write();
        match collections.get(name) {
            Some(existing) if existing.dim != dim => Err(CoreError::EmbeddingDimMismatch {
                query: dim,
                collection: existing.dim,
            }),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    MemoryCollection {
                        dim,
                        points: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn collection_dim(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.collections.read().get(name).map(|c| c.dim))
    }

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| CoreError::validation(format!("unknown collection: {collection}")))?;
        for point in points {
            if point.vector.len() != target.dim {
                return Err(CoreError::EmbeddingDimMismatch {
                    query: point.vector.len(),
                    collection: target.dim,
                });
            }
            target.points.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read();
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if query.len() != target.dim {
            return Err(CoreError::EmbeddingDimMismatch {
                query: query.len(),
                collection: target.dim,
            });
        }

        let mut scored: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(query, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.ordinal.cmp(&b.payload.ordinal))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn list_point_ids(&self, collection: &str, filter: &SearchFilter) -> Result<Vec<String>> {
        let collections = self.collections.read();
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut ids: Vec<String> = target
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_by_filter(&self, collection: &str, filter: &SearchFilter) -> Result<()> {
        let mut collections = self.collections.write();
        if let Some(target) = collections.get_mut(collection) {
            target.points.retain(|_, p| !filter.matches(&p.payload));
        }
        Ok(())
    }
}
