//! Per-request configuration resolution.
//!
//! Precedence, highest first: request overrides → knowledge-base config →
//! tenant defaults → system settings → built-in defaults. Built-in defaults
//! are the `Default` impls of the typed config structs, so the merge only
//! has to walk the explicit layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    ChunkerConfig, ContextWindowSettings, EmbeddingSettings, EnrichmentConfig, IndexerConfig,
    KbConfig, PostProcessConfig, RetrieverConfig, RetrySettings, SystemSettings,
};
use crate::model::Tenant;

/// Caller-supplied overrides for a single request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOverrides {
    /// Override the KB's retriever strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriever: Option<RetrieverConfig>,
    /// Requested result count; clamped to the system maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Force rerank on or off for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<bool>,
    /// Override context-window expansion for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<ContextWindowSettings>,
    /// Overall request deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// The fully resolved configuration a request runs with.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Chunker operator (ingestion only).
    pub chunker: ChunkerConfig,
    /// Indexer operator.
    pub indexer: IndexerConfig,
    /// Enrichment operators.
    pub enrichment: EnrichmentConfig,
    /// Retriever strategy tree.
    pub retriever: RetrieverConfig,
    /// Embedding settings.
    pub embedding: EmbeddingSettings,
    /// Post-processing steps.
    pub post: PostProcessConfig,
    /// Effective result count.
    pub top_k: usize,
    /// Whether the request clamped an out-of-range `top_k`.
    pub top_k_clamped: bool,
    /// Per-leg deadline for composite retrievers.
    pub leg_timeout: Duration,
    /// Overall request deadline, when the caller set one.
    pub deadline: Option<Duration>,
    /// LLM model for enrichment and composite retrievers.
    pub llm_model: String,
    /// Rerank model.
    pub rerank_model: String,
    /// Provider retry policy.
    pub retry: RetrySettings,
    /// Chunks embedded per provider call.
    pub embed_batch_size: usize,
    /// Cap on per-chunk indexing retries.
    pub max_chunk_retries: u32,
}

/// Default `top_k` when the request does not set one.
const DEFAULT_TOP_K: usize = 10;

/// Resolve the configuration for one request.
///
/// `top_k` outside `[1, system.top_k_max]` is clamped, not rejected; the
/// clamp is flagged so the caller can emit a warning metric.
#[must_use]
pub fn resolve(
    overrides: &RequestOverrides,
    kb: &KbConfig,
    tenant: &Tenant,
    system: &SystemSettings,
) -> ResolvedConfig {
    let requested_top_k = overrides.top_k.unwrap_or(DEFAULT_TOP_K);
    let top_k = requested_top_k.clamp(1, system.top_k_max);
    let top_k_clamped = top_k != requested_top_k;

    let mut post = kb.post.clone();
    match overrides.rerank {
        Some(true) if post.rerank.is_none() => {
            post.rerank = Some(super::RerankSettings {
                model: None,
                top_n: 10,
            });
        }
        Some(false) => post.rerank = None,
        _ => {}
    }
    if let Some(window) = &overrides.context_window {
        post.context_window = Some(window.clone());
    }

    let tenant_models = tenant.default_models.clone().unwrap_or_default();
    let llm_model = tenant_models
        .llm_model
        .unwrap_or_else(|| system.llm_model.clone());
    let rerank_model = post
        .rerank
        .as_ref()
        .and_then(|r| r.model.clone())
        .or(tenant_models.rerank_model)
        .unwrap_or_else(|| system.rerank_model.clone());

    ResolvedConfig {
        chunker: kb.chunker.clone(),
        indexer: kb.indexer.clone(),
        enrichment: kb.enrichment.clone(),
        retriever: overrides
            .retriever
            .clone()
            .unwrap_or_else(|| kb.retriever.clone()),
        embedding: kb.embedding.clone(),
        post,
        top_k,
        top_k_clamped,
        leg_timeout: Duration::from_millis(system.leg_timeout_ms),
        deadline: overrides.deadline_ms.map(Duration::from_millis),
        llm_model,
        rerank_model,
        retry: system.retry.clone(),
        embed_batch_size: system.embed_batch_size,
        max_chunk_retries: system.max_chunk_retries,
    }
}
