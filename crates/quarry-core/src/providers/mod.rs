//! Model-provider clients.
//!
//! The core talks to embedding, LLM, and rerank models through three small
//! traits and receives already-credentialed clients. Shipped
//! implementations:
//! - **OpenAI-compatible HTTP** clients for all three capabilities
//! - **Local hashed embeddings** for offline and embedded deployments
//!
//! Transient failures retry with bounded exponential backoff; auth failures
//! fail over to secondary credentials when configured.

mod local;
mod openai;
mod retry;

pub use local::HashedEmbeddings;
pub use openai::{OpenAiCompletions, OpenAiEmbeddings, OpenAiReranker};
pub use retry::with_retry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingSettings, ProviderSettings, RetrySettings};
use crate::error::{CoreError, Result};

/// Embedding model client.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts. Output order matches input order; every
    /// vector has [`Self::dimension`] components.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed embedding dimension of this client.
    fn dimension(&self) -> usize;

    /// Model name, for result provenance.
    fn model(&self) -> &str;
}

/// Completion model client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Model name, for result provenance.
    fn model(&self) -> &str;
}

/// Rerank model client.
#[async_trait]
pub trait RerankClient: Send + Sync {
    /// Score each candidate's relevance to the query. Output order matches
    /// the candidate order.
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;

    /// Model name, for result provenance.
    fn model(&self) -> &str;
}

/// The capability record handed to the pipeline: embedding is mandatory,
/// LLM and rerank are optional.
#[derive(Clone)]
pub struct ProviderSet {
    /// Embedding client.
    pub embedding: Arc<dyn EmbeddingClient>,
    /// LLM client, required by enrichers and the HyDE/multi-query/self-query
    /// retrievers.
    pub llm: Option<Arc<dyn LlmClient>>,
    /// Rerank client, required when rerank post-processing is enabled.
    pub rerank: Option<Arc<dyn RerankClient>>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("embedding", &self.embedding.model())
            .field("has_llm", &self.llm.is_some())
            .field("has_rerank", &self.rerank.is_some())
            .finish()
    }
}

impl ProviderSet {
    /// Assemble a provider set from explicit clients.
    #[must_use]
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        llm: Option<Arc<dyn LlmClient>>,
        rerank: Option<Arc<dyn RerankClient>>,
    ) -> Self {
        Self {
            embedding,
            llm,
            rerank,
        }
    }

    /// Build clients for a knowledge base's embedding settings plus the
    /// resolved LLM/rerank model names.
    pub fn from_settings(
        embedding: &EmbeddingSettings,
        llm_model: &str,
        rerank_model: &str,
        provider: &ProviderSettings,
        retry: &RetrySettings,
    ) -> Result<Self> {
        let embedding_client: Arc<dyn EmbeddingClient> = match embedding.provider.as_str() {
            "openai" => Arc::new(OpenAiEmbeddings::new(
                provider.clone(),
                embedding.model.clone(),
                embedding.dim,
                retry.clone(),
            )?),
            "local" => Arc::new(HashedEmbeddings::new(embedding.dim)),
            other => {
                return Err(CoreError::kb_config(format!(
                    "unsupported embedding provider: {other}"
                )))
            }
        };

        let llm: Option<Arc<dyn LlmClient>> = if provider.api_key.is_some() {
            Some(Arc::new(OpenAiCompletions::new(
                provider.clone(),
                llm_model.to_string(),
                retry.clone(),
            )?))
        } else {
            None
        };
        let rerank: Option<Arc<dyn RerankClient>> = if provider.api_key.is_some() {
            Some(Arc::new(OpenAiReranker::new(
                provider.clone(),
                rerank_model.to_string(),
                retry.clone(),
            )?))
        } else {
            None
        };

        Ok(Self::new(embedding_client, llm, rerank))
    }

    /// The LLM client, or a config error naming the capability gap.
    pub fn require_llm(&self) -> Result<&Arc<dyn LlmClient>> {
        self.llm.as_ref().ok_or_else(|| {
            CoreError::kb_config("configuration requires an LLM provider, none is available")
        })
    }

    /// The rerank client, or a config error naming the capability gap.
    pub fn require_rerank(&self) -> Result<&Arc<dyn RerankClient>> {
        self.rerank.as_ref().ok_or_else(|| {
            CoreError::kb_config("configuration requires a rerank provider, none is available")
        })
    }
}
