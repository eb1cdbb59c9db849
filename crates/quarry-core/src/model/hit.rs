//! Retrieval result types.

use serde::{Deserialize, Serialize};

/// Diagnostic fields attached by composite retrievers.
///
/// Post-processing migrates these from the pre-rerank top hit to the
/// post-rerank top hit so clients always see them on the first result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HitDiagnostics {
    /// Hypothetical answers generated by the HyDE retriever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyde_queries: Option<Vec<String>>,
    /// Paraphrases generated by the multi-query retriever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_queries: Option<Vec<String>>,
    /// Semantic part extracted by the self-query retriever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_query: Option<String>,
    /// Metadata filter extracted by the self-query retriever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_filters: Option<serde_json::Value>,
    /// Per-strategy merge breakdowns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_details: Option<serde_json::Value>,
}

impl HitDiagnostics {
    /// True when no diagnostic field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hyde_queries.is_none()
            && self.generated_queries.is_none()
            && self.semantic_query.is_none()
            && self.parsed_filters.is_none()
            && self.retrieval_details.is_none()
    }

    /// Move every set field of `other` into `self`, keeping existing values.
    pub fn absorb(&mut self, other: Self) {
        if self.hyde_queries.is_none() {
            self.hyde_queries = other.hyde_queries;
        }
        if self.generated_queries.is_none() {
            self.generated_queries = other.generated_queries;
        }
        if self.semantic_query.is_none() {
            self.semantic_query = other.semantic_query;
        }
        if self.parsed_filters.is_none() {
            self.parsed_filters = other.parsed_filters;
        }
        if self.retrieval_details.is_none() {
            self.retrieval_details = other.retrieval_details;
        }
    }
}

/// Neighboring-chunk expansion attached by post-processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextWindow {
    /// Hit text with neighbors, concatenated in chunk order.
    pub context_text: String,
    /// Concatenated text of the preceding neighbors.
    pub context_before: String,
    /// Concatenated text of the following neighbors.
    pub context_after: String,
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedHit {
    /// Chunk this hit resolves to.
    pub chunk_id: String,
    /// Owning knowledge base.
    pub kb_id: String,
    /// Owning document.
    pub document_id: String,
    /// Original chunk text.
    pub text: String,
    /// Retrieval score. Normalized to [0, 1] for dense/sparse/hybrid;
    /// rank-fusion scores for composite strategies.
    pub score: f32,
    /// Chunk ordinal within its document, used for tie-breaks.
    pub ordinal: usize,
    /// Structural metadata copied from the chunk.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Name of the strategy that produced this hit.
    pub source_tag: String,
    /// Tree level for hierarchical-tree hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Set when a parent-document hit fell back to the child chunk.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parent_not_found: bool,
    /// Composite-retriever diagnostics; populated on the first hit.
    #[serde(default, skip_serializing_if = "HitDiagnostics::is_empty")]
    pub diagnostics: HitDiagnostics,
    /// Context-window expansion, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextWindow>,
}

impl RetrievedHit {
    /// Deterministic ordering key: ordinal ascending, then chunk id.
    #[must_use]
    pub fn tie_break_key(&self) -> (usize, &str) {
        (self.ordinal, self.chunk_id.as_str())
    }
}

/// Models and strategy that served a retrieval request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Retriever strategy name that ran.
    pub retriever: String,
    /// Embedding model, when one was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    /// LLM model, when a composite strategy called one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    /// Rerank model, when reranking ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_model: Option<String>,
}

/// Final retrieval response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    /// Ranked hits, security-trimmed and post-processed.
    pub hits: Vec<RetrievedHit>,
    /// Provenance of the models that served the request.
    pub model: ModelDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_absorb_keeps_existing() {
        let mut a = HitDiagnostics {
            hyde_queries: Some(vec!["h1".to_string()]),
            ..Default::default()
        };
        let b = HitDiagnostics {
            hyde_queries: Some(vec!["h2".to_string()]),
            semantic_query: Some("q".to_string()),
            ..Default::default()
        };
        a.absorb(b);
        assert_eq!(a.hyde_queries.as_deref(), Some(&["h1".to_string()][..]));
        assert_eq!(a.semantic_query.as_deref(), Some("q"));
    }

    #[test]
    fn test_serialization_skips_empty() {
        let hit = RetrievedHit {
            chunk_id: "c1".to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            text: "text".to_string(),
            score: 0.5,
            ordinal: 0,
            metadata: serde_json::json!({}),
            source_tag: "dense".to_string(),
            level: None,
            parent_not_found: false,
            diagnostics: HitDiagnostics::default(),
            context: None,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert!(json.get("parent_not_found").is_none());
        assert!(json.get("diagnostics").is_none());
        assert!(json.get("context").is_none());
    }
}
