//! OpenAI-compatible HTTP clients for embedding, completion, and rerank.
//!
//! All three clients share the same error classification: network failures
//! and 429/5xx responses are transient (retried with backoff), 401/403 are
//! auth failures (failed over to secondary credentials when configured),
//! anything else fails immediately.

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{with_retry, EmbeddingClient, LlmClient, RerankClient};
use crate::config::{ProviderSettings, RetrySettings};
use crate::error::{CoreError, ProviderErrorKind, Result};

const HTTP_TIMEOUT_SECS: u64 = 60;

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| CoreError::Internal(anyhow::Error::new(e).context("http client")))
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> CoreError {
    let detail = format!("{status}: {body}");
    if status.as_u16() == 429 || status.is_server_error() {
        CoreError::provider_transient(detail)
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        CoreError::provider_auth(detail)
    } else {
        CoreError::provider_fatal(detail)
    }
}

fn classify_send_error(err: reqwest::Error) -> CoreError {
    CoreError::provider_transient(format!("request failed: {err}"))
}

async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Req,
) -> Result<Resp> {
    let response = http
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(body)
        .send()
        .await
        .map_err(classify_send_error)?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &text));
    }

    response
        .json::<Resp>()
        .await
        .map_err(|e| CoreError::Internal(anyhow::Error::new(e).context("parse provider response")))
}

/// Run `call` with the primary key, failing over to the fallback key on an
/// auth error.
async fn with_failover<T, F, Fut>(settings: &ProviderSettings, mut call: F) -> Result<T>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let primary = settings
        .api_key
        .clone()
        .ok_or_else(|| CoreError::provider_auth("no API key configured"))?;

    match call(primary).await {
        Err(CoreError::Provider {
            kind: ProviderErrorKind::Auth,
            detail,
        }) => match settings.fallback_api_key.clone() {
            Some(fallback) => {
                tracing::warn!("auth failure on primary credentials, trying fallback");
                call(fallback).await
            }
            None => Err(CoreError::Provider {
                kind: ProviderErrorKind::Auth,
                detail,
            }),
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbeddings {
    settings: ProviderSettings,
    model: String,
    dim: usize,
    retry: RetrySettings,
    http: reqwest::Client,
}

impl std::fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("model", &self.model)
            .field("dim", &self.dim)
            .finish()
    }
}

impl OpenAiEmbeddings {
    /// Create a new embeddings client.
    pub fn new(
        settings: ProviderSettings,
        model: String,
        dim: usize,
        retry: RetrySettings,
    ) -> Result<Self> {
        Ok(Self {
            settings,
            model,
            dim,
            retry,
            http: build_http_client()?,
        })
    }

    async fn embed_once(&self, api_key: String, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.settings.api_base);
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };
        let response: EmbeddingResponse = post_json(&self.http, &url, &api_key, &request).await?;

        let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != texts.len() {
            return Err(CoreError::provider_fatal(format!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(first) = vectors.first() {
            if first.len() != self.dim {
                return Err(CoreError::provider_fatal(format!(
                    "provider returned dimension {}, expected {}",
                    first.len(),
                    self.dim
                )));
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(&self.retry, || {
            with_failover(&self.settings, |key| self.embed_once(key, texts))
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiCompletions {
    settings: ProviderSettings,
    model: String,
    retry: RetrySettings,
    http: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompletions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompletions")
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompletions {
    /// Create a new completions client.
    pub fn new(settings: ProviderSettings, model: String, retry: RetrySettings) -> Result<Self> {
        Ok(Self {
            settings,
            model,
            retry,
            http: build_http_client()?,
        })
    }

    async fn complete_once(
        &self,
        api_key: String,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.settings.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
        };
        let response: ChatResponse = post_json(&self.http, &url, &api_key, &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("no choices in completion response")
            .map_err(|e| CoreError::provider_fatal(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompletions {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        with_retry(&self.retry, || {
            with_failover(&self.settings, |key| {
                self.complete_once(key, prompt, max_tokens)
            })
        })
        .await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Rerank
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Rerank client for OpenAI-compatible `/rerank` endpoints.
pub struct OpenAiReranker {
    settings: ProviderSettings,
    model: String,
    retry: RetrySettings,
    http: reqwest::Client,
}

impl std::fmt::Debug for OpenAiReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiReranker")
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiReranker {
    /// Create a new rerank client.
    pub fn new(settings: ProviderSettings, model: String, retry: RetrySettings) -> Result<Self> {
        Ok(Self {
            settings,
            model,
            retry,
            http: build_http_client()?,
        })
    }

    async fn rerank_once(
        &self,
        api_key: String,
        query: &str,
        candidates: &[String],
    ) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.settings.api_base);
        let request = RerankRequest {
            model: &self.model,
            query,
            documents: candidates,
        };
        let response: RerankResponse = post_json(&self.http, &url, &api_key, &request).await?;

        let mut scores = vec![0.0f32; candidates.len()];
        for result in response.results {
            if result.index >= scores.len() {
                return Err(CoreError::provider_fatal(format!(
                    "rerank result index {} out of range ({} candidates)",
                    result.index,
                    scores.len()
                )));
            }
            scores[result.index] = result.relevance_score;
        }
        Ok(scores)
    }
}

#[async_trait]
impl RerankClient for OpenAiReranker {
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(&self.retry, || {
            with_failover(&self.settings, |key| {
                self.rerank_once(key, query, candidates)
            })
        })
        .await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let too_many = reqwest::StatusCode::from_u16(429).unwrap();
        assert!(classify_status(too_many, "slow down").is_transient());

        let server = reqwest::StatusCode::from_u16(503).unwrap();
        assert!(classify_status(server, "unavailable").is_transient());

        let unauthorized = reqwest::StatusCode::from_u16(401).unwrap();
        assert!(matches!(
            classify_status(unauthorized, "bad key"),
            CoreError::Provider {
                kind: ProviderErrorKind::Auth,
                ..
            }
        ));

        let bad_request = reqwest::StatusCode::from_u16(400).unwrap();
        assert!(!classify_status(bad_request, "bad input").is_transient());
    }

    #[tokio::test]
    async fn test_failover_requires_key() {
        let settings = ProviderSettings {
            api_key: None,
            ..Default::default()
        };
        let result: Result<()> = with_failover(&settings, |_key| async { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(CoreError::Provider {
                kind: ProviderErrorKind::Auth,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_failover_switches_key() {
        let settings = ProviderSettings {
            api_key: Some("primary".to_string()),
            fallback_api_key: Some("secondary".to_string()),
            ..Default::default()
        };
        let result = with_failover(&settings, |key| async move {
            if key == "primary" {
                Err(CoreError::provider_auth("expired"))
            } else {
                Ok(key)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "secondary");
    }
}
