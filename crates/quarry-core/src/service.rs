//! Retrieval orchestrator: the query-side entry point.
//!
//! Validates the caller against tenant status and key scope, resolves the
//! per-request configuration, runs the retriever strategy tree, and applies
//! post-processing. Also owns the KB-config update guard and KB statistics.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{
    guard_embedding_change, resolve, KbConfig, RequestOverrides, SystemSettings,
};
use crate::error::{CoreError, Result};
use crate::indexing::collection_for_tenant;
use crate::model::{
    ApiKeyIdentity, IndexingStatus, KeyRole, KnowledgeBase, ModelDescriptor, RetrievalResponse,
    Tenant,
};
use crate::providers::ProviderSet;
use crate::registry::OperatorRegistry;
use crate::retrieval::{run, RetrievalEnv, RetrievalQuery};
use crate::storage::{DenseStore, RelationalStore, SparseStore};

/// A retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// Query text.
    pub query: String,
    /// Knowledge bases to search. Must be non-empty.
    pub kb_ids: Vec<String>,
    /// Per-request overrides.
    #[serde(default)]
    pub overrides: RequestOverrides,
}

/// Knowledge-base statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbStats {
    /// Total chunks.
    pub total_chunks: usize,
    /// Chunks with `indexing_status=indexed`.
    pub indexed_chunks: usize,
    /// Chunks with `indexing_status=failed`.
    pub failed_chunks: usize,
    /// Chunks still pending or in flight.
    pub pending_chunks: usize,
    /// Distinct documents.
    pub num_documents: usize,
    /// Characters of chunk text.
    pub total_text_chars: usize,
    /// Average characters per chunk.
    pub avg_chunk_chars: usize,
}

/// Retrieval service.
pub struct RetrievalService {
    relational: Arc<dyn RelationalStore>,
    dense: Arc<dyn DenseStore>,
    sparse: Option<Arc<dyn SparseStore>>,
    providers: ProviderSet,
    registry: Arc<OperatorRegistry>,
    settings: SystemSettings,
}

impl std::fmt::Debug for RetrievalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalService")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl RetrievalService {
    /// Create a new retrieval service.
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        dense: Arc<dyn DenseStore>,
        sparse: Option<Arc<dyn SparseStore>>,
        providers: ProviderSet,
        registry: Arc<OperatorRegistry>,
        settings: SystemSettings,
    ) -> Self {
        Self {
            relational,
            dense,
            sparse,
            providers,
            registry,
            settings,
        }
    }

    /// Resolve an API key to its identity record. The transport layer calls
    /// this once per request and hands the result to every core operation.
    pub async fn resolve_api_key(&self, key_id: &str) -> Result<ApiKeyIdentity> {
        let key = self
            .relational
            .get_api_key_with_identity(key_id)
            .await?
            .ok_or_else(|| CoreError::validation("unknown API key"))?;
        self.active_tenant(&key.tenant_id).await?;
        Ok(key)
    }

    async fn active_tenant(&self, tenant_id: &str) -> Result<Tenant> {
        let tenant = self
            .relational
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::TenantDisabled(tenant_id.to_string()))?;
        if !tenant.is_active() {
            return Err(CoreError::TenantDisabled(tenant.id.clone()));
        }
        Ok(tenant)
    }

    /// Fetch a KB visible to the caller's tenant; cross-tenant ids surface
    /// as `KB_NOT_FOUND` so existence never leaks across tenants.
    async fn visible_kb(&self, key: &ApiKeyIdentity, kb_id: &str) -> Result<KnowledgeBase> {
        self.relational
            .get_kb_with_config(kb_id)
            .await?
            .filter(|kb| kb.tenant_id == key.tenant_id)
            .ok_or_else(|| CoreError::KbNotFound(kb_id.to_string()))
    }

    /// Execute a retrieval request.
    pub async fn retrieve(
        &self,
        key: &ApiKeyIdentity,
        request: &RetrievalRequest,
    ) -> Result<RetrievalResponse> {
        if request.kb_ids.is_empty() {
            return Err(CoreError::validation("kb_ids must not be empty"));
        }
        if request.query.trim().is_empty() {
            return Err(CoreError::validation("query must not be empty"));
        }

        let tenant = self.active_tenant(&key.tenant_id).await?;
        let mut primary_kb = None;
        for kb_id in &request.kb_ids {
            let kb = self.visible_kb(key, kb_id).await?;
            if !key.kb_in_scope(kb_id) {
                return Err(CoreError::KbNotInScope(kb_id.clone()));
            }
            if primary_kb.is_none() {
                primary_kb = Some(kb);
            }
        }
        let primary_kb = primary_kb.unwrap_or_else(|| unreachable!("kb_ids checked non-empty"));

        // Configuration resolves off the first KB; the effective retriever
        // (post-override) is validated against that KB's operators.
        let config = resolve(&request.overrides, &primary_kb.config, &tenant, &self.settings);
        let effective = KbConfig {
            retriever: config.retriever.clone(),
            ..primary_kb.config.clone()
        };
        self.registry.validate(&effective)?;

        if config.top_k_clamped {
            tracing::warn!(
                requested = ?request.overrides.top_k,
                clamped_to = config.top_k,
                "top_k out of range, clamped"
            );
        }

        let env = RetrievalEnv {
            relational: Arc::clone(&self.relational),
            dense: Arc::clone(&self.dense),
            sparse: self.sparse.clone(),
            providers: self.providers.clone(),
            collection: collection_for_tenant(&self.settings, &tenant),
            config,
        };
        let query = RetrievalQuery {
            text: request.query.clone(),
            tenant_id: tenant.id.clone(),
            kb_ids: request.kb_ids.clone(),
            top_k: env.config.top_k,
            metadata_eq: Default::default(),
        };

        let retriever = env.config.retriever.clone();
        let retrieval = run(&retriever, &env, &query);
        let hits = match env.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, retrieval)
                .await
                .map_err(|_| CoreError::provider_transient("request deadline exceeded"))??,
            None => retrieval.await?,
        };

        let hits = crate::postprocess::run(
            &self.relational,
            &self.providers,
            &env.config,
            &request.query,
            hits,
            &tenant.id,
            &key.identity,
            key.role,
        )
        .await?;

        let model = ModelDescriptor {
            retriever: env.config.retriever.name().to_string(),
            embedding_model: Some(self.providers.embedding.model().to_string()),
            llm_model: env
                .config
                .retriever
                .needs_llm()
                .then(|| {
                    self.providers
                        .llm
                        .as_ref()
                        .map(|l| l.model().to_string())
                })
                .flatten(),
            rerank_model: env
                .config
                .post
                .rerank
                .as_ref()
                .and_then(|_| self.providers.rerank.as_ref().map(|r| r.model().to_string())),
        };

        tracing::info!(
            tenant_id = %tenant.id,
            retriever = %model.retriever,
            hits = hits.len(),
            "retrieval complete"
        );
        Ok(RetrievalResponse { hits, model })
    }

    /// Update a knowledge base's configuration.
    ///
    /// Embedding settings are immutable once the KB has any `indexed`
    /// chunk; everything else may change freely.
    pub async fn update_kb_config(
        &self,
        key: &ApiKeyIdentity,
        kb_id: &str,
        proposed: KbConfig,
    ) -> Result<()> {
        if key.role == KeyRole::Read {
            return Err(CoreError::NoPermission);
        }
        self.active_tenant(&key.tenant_id).await?;
        let kb = self.visible_kb(key, kb_id).await?;
        if !key.kb_in_scope(kb_id) {
            return Err(CoreError::KbNotInScope(kb_id.to_string()));
        }

        let has_indexed = self.relational.has_indexed_chunks(kb_id).await?;
        guard_embedding_change(&kb.config, &proposed, has_indexed)?;
        self.registry.validate(&proposed)?;
        self.relational.update_kb_config(kb_id, &proposed).await?;
        tracing::info!(kb_id = %kb_id, "knowledge base configuration updated");
        Ok(())
    }

    /// Compute statistics for a knowledge base.
    pub async fn kb_stats(&self, key: &ApiKeyIdentity, kb_id: &str) -> Result<KbStats> {
        self.active_tenant(&key.tenant_id).await?;
        let kb = self.visible_kb(key, kb_id).await?;
        if !key.kb_in_scope(kb_id) {
            return Err(CoreError::KbNotInScope(kb_id.to_string()));
        }

        let chunks = self.relational.list_chunks_for_kb(&kb.id).await?;
        let mut by_status: HashMap<IndexingStatus, usize> = HashMap::new();
        let mut documents: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut total_text_chars = 0usize;
        for chunk in &chunks {
            *by_status.entry(chunk.indexing_status).or_insert(0) += 1;
            documents.insert(chunk.document_id.as_str());
            total_text_chars += chunk.text.chars().count();
        }

        let indexed = by_status.get(&IndexingStatus::Indexed).copied().unwrap_or(0);
        let failed = by_status.get(&IndexingStatus::Failed).copied().unwrap_or(0);
        Ok(KbStats {
            total_chunks: chunks.len(),
            indexed_chunks: indexed,
            failed_chunks: failed,
            pending_chunks: chunks.len() - indexed - failed,
            num_documents: documents.len(),
            total_text_chars,
            avg_chunk_chars: if chunks.is_empty() {
                0
            } else {
                total_text_chars / chunks.len()
            },
        })
    }
}
