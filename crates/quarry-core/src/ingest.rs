//! Ingestion orchestrator: document text in, indexed chunks out.
//!
//! The pipeline per document: validate caller and config, extract text,
//! persist the document row, summarize (optional), chunk, enrich
//! (optional), persist chunk rows, index. Enrichment failures are
//! swallowed; indexing failures stay per-chunk. Re-ingesting identical
//! content over fully indexed chunks is a no-op on vector records.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunking::build_chunker;
use crate::config::{resolve, RequestOverrides, ResolvedConfig, SystemSettings};
use crate::enrich::{ChunkEnricher, DocumentSummarizer};
use crate::error::{CoreError, Result};
use crate::indexing::{collection_for_tenant, Indexer, IndexReport, TreeBuilder, TreeReport};
use crate::model::{
    AclRules, ApiKeyIdentity, Document, KeyRole, KnowledgeBase, SensitivityLevel, SummaryStatus,
    Tenant,
};
use crate::providers::ProviderSet;
use crate::registry::OperatorRegistry;
use crate::storage::{DenseStore, RelationalStore, SearchFilter, SparseStore};

/// A document submitted for ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    /// Stable id; re-submitting the same id re-ingests the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Title; derived from the content when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Plain-text or markdown payload.
    pub text: String,
    /// Source metadata map.
    #[serde(default)]
    pub source_metadata: serde_json::Value,
    /// Sensitivity level.
    #[serde(default)]
    pub sensitivity: SensitivityLevel,
    /// ACL allow lists.
    #[serde(default)]
    pub acl: AclRules,
}

/// Outcome of one ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// The document id.
    pub document_id: String,
    /// Chunks produced by the chunker.
    pub chunks_created: usize,
    /// Chunks that reached `indexed`.
    pub chunks_indexed: usize,
    /// Chunks that reached `failed`.
    pub chunks_failed: usize,
    /// Final summary status.
    pub summary_status: SummaryStatus,
    /// True when the submission matched already-indexed content and nothing
    /// was written.
    pub unchanged: bool,
}

/// Title fallback: first markdown heading, else first non-empty line.
fn derive_title(text: &str) -> String {
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let title = trimmed.trim_start_matches('#').trim();
        if title.is_empty() {
            continue;
        }
        return title.chars().take(120).collect();
    }
    "Untitled".to_string()
}

fn content_hash(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Ingestion service.
pub struct IngestService {
    relational: Arc<dyn RelationalStore>,
    dense: Arc<dyn DenseStore>,
    sparse: Option<Arc<dyn SparseStore>>,
    providers: ProviderSet,
    registry: Arc<OperatorRegistry>,
    settings: SystemSettings,
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl IngestService {
    /// Create a new ingestion service.
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

    /// Resolve and validate the caller's access to a KB for a write.
    async fn writable_kb(
        &self,
        key: &ApiKeyIdentity,
        kb_id: &str,
    ) -> Result<(Tenant, KnowledgeBase)> {
        if key.role == KeyRole::Read {
            return Err(CoreError::NoPermission);
        }
        let tenant = self
            .relational
            .get_tenant(&key.tenant_id)
            .await?
            .ok_or_else(|| CoreError::TenantDisabled(key.tenant_id.clone()))?;
        if !tenant.is_active() {
            return Err(CoreError::TenantDisabled(tenant.id.clone()));
        }
        if !key.kb_in_scope(kb_id) {
            return Err(CoreError::KbNotInScope(kb_id.to_string()));
        }
        let kb = self
            .relational
            .get_kb_with_config(kb_id)
            .await?
            .filter(|kb| kb.tenant_id == key.tenant_id)
            .ok_or_else(|| CoreError::KbNotFound(kb_id.to_string()))?;
        Ok((tenant, kb))
    }

    fn resolved_for(&self, kb: &KnowledgeBase, tenant: &Tenant) -> ResolvedConfig {
        resolve(
            &RequestOverrides::default(),
            &kb.config,
            tenant,
            &self.settings,
        )
    }

    /// Ingest one document into a knowledge base.
    pub async fn ingest_document(
        &self,
        key: &ApiKeyIdentity,
        kb_id: &str,
        submission: NewDocument,
    ) -> Result<IngestReport> {
        let (tenant, kb) = self.writable_kb(key, kb_id).await?;
        self.registry.validate(&kb.config)?;
        let config = self.resolved_for(&kb, &tenant);
        let collection = collection_for_tenant(&self.settings, &tenant);

        let document_id = submission
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let hash = content_hash(&submission.text);

        // Idempotence: identical content with every chunk indexed is a no-op
        // on vector records. Changed content replaces the document.
        let mut is_new = true;
        if let Some(existing) = self
            .relational
            .get_documents_by_ids(std::slice::from_ref(&document_id))
            .await?
            .into_iter()
            .next()
        {
            let same_content = existing
                .source_metadata
                .get("content_hash")
                .and_then(|v| v.as_str())
                == Some(hash.as_str());
            let chunks = self
                .relational
                .list_chunks_for_document(&document_id)
                .await?;
            let all_indexed = !chunks.is_empty()
                && chunks
                    .iter()
                    .all(|c| c.indexing_status == crate::model::IndexingStatus::Indexed);
            if same_content && all_indexed {
                tracing::info!(document_id = %document_id, "re-ingest of indexed content, no-op");
                return Ok(IngestReport {
                    document_id,
                    chunks_created: chunks.len(),
                    chunks_indexed: chunks.len(),
                    chunks_failed: 0,
                    summary_status: existing.summary_status,
                    unchanged: true,
                });
            }
            self.delete_derived(&tenant, &existing, &collection).await?;
            self.relational.delete_document_cascade(&document_id).await?;
            is_new = false;
        }

        let mut source_metadata = submission.source_metadata.clone();
        if !source_metadata.is_object() {
            source_metadata = serde_json::json!({});
        }
        if let Some(map) = source_metadata.as_object_mut() {
            map.insert("content_hash".to_string(), serde_json::json!(hash));
        }

        let summarizer_enabled = config.enrichment.summarizer.is_some();
        let mut document = Document {
            id: document_id.clone(),
            tenant_id: tenant.id.clone(),
            kb_id: kb.id.clone(),
            title: submission
                .title
                .clone()
                .unwrap_or_else(|| derive_title(&submission.text)),
            source_metadata,
            summary: None,
            summary_status: if summarizer_enabled {
                SummaryStatus::Pending
            } else {
                SummaryStatus::Skipped
            },
            sensitivity: submission.sensitivity,
            acl: submission.acl.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.relational.create_document(&document).await?;
        if is_new {
            self.relational.adjust_document_count(&kb.id, 1).await?;
        }

        self.run_summarizer(&config, &mut document, &submission.text)
            .await?;

        let chunker = build_chunker(&config.chunker)?;
        let mut chunks = chunker.chunk(&document, &submission.text).await?;
        if let Some(context_settings) = &config.enrichment.chunk_context {
            match self.providers.llm.as_ref() {
                Some(llm) => {
                    let enricher = ChunkEnricher::new(Arc::clone(llm), context_settings.clone());
                    enricher.enrich_chunks(&document, &mut chunks).await;
                }
                None => {
                    tracing::warn!("chunk enrichment configured without an LLM provider, skipping");
                }
            }
        }
        self.relational.create_chunks(&chunks).await?;

        let indexer = Indexer::new(
            Arc::clone(&self.relational),
            Arc::clone(&self.dense),
            self.sparse
                .as_ref()
                .filter(|_| config.indexer.sparse_enabled())
                .cloned(),
            Arc::clone(&self.providers.embedding),
        );
        let index_report = indexer
            .index_document(&config, &collection, &document, &chunks)
            .await?;

        if matches!(
            config.indexer,
            crate::config::IndexerConfig::Hierarchical { .. }
        ) {
            if let Err(err) = self.rebuild_hierarchy_inner(&tenant, &kb).await {
                tracing::warn!(kb_id = %kb.id, error = %err, "hierarchy rebuild failed");
            }
        }

        Ok(IngestReport {
            document_id,
            chunks_created: chunks.len(),
            chunks_indexed: index_report.indexed,
            chunks_failed: index_report.failed,
            summary_status: document.summary_status,
            unchanged: false,
        })
    }

    /// Drive the summarizer status machine. Failure is non-fatal.
    async fn run_summarizer(
        &self,
        config: &ResolvedConfig,
        document: &mut Document,
        text: &str,
    ) -> Result<()> {
        let Some(settings) = &config.enrichment.summarizer else {
            return Ok(());
        };
        let Some(llm) = self.providers.llm.as_ref() else {
            tracing::warn!("summarizer configured without an LLM provider, skipping");
            document.summary_status = SummaryStatus::Skipped;
            self.relational
                .update_document_summary(&document.id, None, SummaryStatus::Skipped)
                .await?;
            return Ok(());
        };

        document.summary_status = SummaryStatus::Generating;
        self.relational
            .update_document_summary(&document.id, None, SummaryStatus::Generating)
            .await?;

        let summarizer = DocumentSummarizer::new(Arc::clone(llm), settings.clone());
        match summarizer.summarize(&document.title, text).await {
            Ok(summary) => {
                document.summary = Some(summary.clone());
                document.summary_status = SummaryStatus::Completed;
                self.relational
                    .update_document_summary(&document.id, Some(&summary), SummaryStatus::Completed)
                    .await?;
            }
            Err(err) => {
                tracing::warn!(
                    document_id = %document.id,
                    error = %err,
                    "document summarization failed, continuing without summary"
                );
                document.summary_status = SummaryStatus::Failed;
                self.relational
                    .update_document_summary(&document.id, None, SummaryStatus::Failed)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete_derived(
        &self,
        tenant: &Tenant,
        document: &Document,
        collection: &str,
    ) -> Result<()> {
        let filter = SearchFilter::for_document(&tenant.id, &document.kb_id, &document.id);
        self.dense.delete_by_filter(collection, &filter).await?;
        if let Some(sparse) = &self.sparse {
            sparse.delete(&filter).await?;
        }
        Ok(())
    }

    /// Delete a document, its chunks, and every derived record.
    pub async fn delete_document(&self, key: &ApiKeyIdentity, document_id: &str) -> Result<()> {
        if key.role == KeyRole::Read {
            return Err(CoreError::NoPermission);
        }
        let document = self
            .relational
            .get_documents_by_ids(&[document_id.to_string()])
            .await?
            .into_iter()
            .next()
            .filter(|d| d.tenant_id == key.tenant_id)
            .ok_or_else(|| CoreError::DocNotFound(document_id.to_string()))?;
        if !key.kb_in_scope(&document.kb_id) {
            return Err(CoreError::KbNotInScope(document.kb_id.clone()));
        }
        let tenant = self
            .relational
            .get_tenant(&key.tenant_id)
            .await?
            .ok_or_else(|| CoreError::TenantDisabled(key.tenant_id.clone()))?;

        let collection = collection_for_tenant(&self.settings, &tenant);
        self.delete_derived(&tenant, &document, &collection).await?;
        self.relational.delete_document_cascade(&document.id).await?;
        self.relational
            .adjust_document_count(&document.kb_id, -1)
            .await?;
        tracing::info!(document_id = %document.id, kb_id = %document.kb_id, "document deleted");
        Ok(())
    }

    /// Re-drive a document's failed chunks through the indexer.
    pub async fn retry_failed_chunks(
        &self,
        key: &ApiKeyIdentity,
        document_id: &str,
    ) -> Result<IndexReport> {
        let document = self
            .relational
            .get_documents_by_ids(&[document_id.to_string()])
            .await?
            .into_iter()
            .next()
            .filter(|d| d.tenant_id == key.tenant_id)
            .ok_or_else(|| CoreError::DocNotFound(document_id.to_string()))?;
        let (tenant, kb) = self.writable_kb(key, &document.kb_id).await?;
        let config = self.resolved_for(&kb, &tenant);
        let collection = collection_for_tenant(&self.settings, &tenant);

        let indexer = Indexer::new(
            Arc::clone(&self.relational),
            Arc::clone(&self.dense),
            self.sparse
                .as_ref()
                .filter(|_| config.indexer.sparse_enabled())
                .cloned(),
            Arc::clone(&self.providers.embedding),
        );
        indexer
            .retry_failed_chunks(&config, &collection, &document)
            .await
    }

    /// Rebuild a knowledge base's hierarchical summary tree.
    pub async fn rebuild_hierarchy(
        &self,
        key: &ApiKeyIdentity,
        kb_id: &str,
    ) -> Result<TreeReport> {
        let (tenant, kb) = self.writable_kb(key, kb_id).await?;
        self.rebuild_hierarchy_inner(&tenant, &kb).await
    }

    async fn rebuild_hierarchy_inner(
        &self,
        tenant: &Tenant,
        kb: &KnowledgeBase,
    ) -> Result<TreeReport> {
        let llm = Arc::clone(self.providers.require_llm()?);
        let builder = TreeBuilder::new(
            Arc::clone(&self.relational),
            Arc::clone(&self.providers.embedding),
            llm,
        );
        builder.build(&tenant.id, &kb.id, &kb.config.indexer).await
    }

    /// Run the reconciliation sweep for one knowledge base.
    pub async fn reconcile_kb(
        &self,
        key: &ApiKeyIdentity,
        kb_id: &str,
    ) -> Result<crate::indexing::ReconcileReport> {
        let (tenant, kb) = self.writable_kb(key, kb_id).await?;
        let collection = collection_for_tenant(&self.settings, &tenant);
        crate::indexing::sweep(
            &self.relational,
            &self.dense,
            self.sparse.as_ref(),
            &collection,
            &tenant.id,
            &kb.id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("# Heading\n\nBody"), "Heading");
        assert_eq!(derive_title("Plain first line\nSecond"), "Plain first line");
        assert_eq!(derive_title("\n\n   \n"), "Untitled");
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("same"), content_hash("same"));
        assert_ne!(content_hash("one"), content_hash("two"));
    }
}
