//! Process-wide settings, loaded from the environment.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Retry policy for model-provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Model-provider endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Primary API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Fallback API key, tried on auth errors.
    #[serde(default)]
    pub fallback_api_key: Option<String>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            fallback_api_key: None,
        }
    }
}

/// System-level defaults, the lowest explicit layer of configuration
/// resolution. Loaded from `QUARRY_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Base dense-store collection name; per-tenant collections derive from
    /// it.
    #[serde(default = "default_base_collection")]
    pub base_collection: String,
    /// Provider endpoint settings.
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Default embedding settings for new knowledge bases.
    #[serde(default)]
    pub embedding: super::EmbeddingSettings,
    /// Default LLM model for enrichment and composite retrievers.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// Default rerank model.
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    /// Provider retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Per-leg deadline for composite retrievers, in milliseconds.
    #[serde(default = "default_leg_timeout_ms")]
    pub leg_timeout_ms: u64,
    /// Chunks embedded per provider call.
    #[serde(default = "default_embed_batch")]
    pub embed_batch_size: usize,
    /// Cap on per-chunk indexing retries.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    /// Hard cap on requested `top_k`.
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,
    /// Chunk volume past which `auto` isolation promotes a tenant to a
    /// dedicated collection.
    #[serde(default = "default_auto_isolation_threshold")]
    pub auto_isolation_threshold: usize,
}

fn default_base_collection() -> String {
    "quarry_chunks".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_rerank_model() -> String {
    "rerank-v3".to_string()
}
fn default_leg_timeout_ms() -> u64 {
    10_000
}
fn default_embed_batch() -> usize {
    32
}
fn default_max_chunk_retries() -> u32 {
    3
}
fn default_top_k_max() -> usize {
    50
}
fn default_auto_isolation_threshold() -> usize {
    100_000
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            base_collection: default_base_collection(),
            provider: ProviderSettings::default(),
            embedding: super::EmbeddingSettings::default(),
            llm_model: default_llm_model(),
            rerank_model: default_rerank_model(),
            retry: RetrySettings::default(),
            leg_timeout_ms: default_leg_timeout_ms(),
            embed_batch_size: default_embed_batch(),
            max_chunk_retries: default_max_chunk_retries(),
            top_k_max: default_top_k_max(),
            auto_isolation_threshold: default_auto_isolation_threshold(),
        }
    }
}

impl SystemSettings {
    /// Load settings from the environment (prefix `QUARRY_`, `__` as the
    /// nesting separator), with `.env` support for local development.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let loaded = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("QUARRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| CoreError::Internal(anyhow::Error::new(e).context("settings")))?;

        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SystemSettings::default();
        assert_eq!(settings.base_collection, "quarry_chunks");
        assert_eq!(settings.top_k_max, 50);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.embedding.dim, 1536);
    }
}
