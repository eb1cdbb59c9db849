//! Error taxonomy for the retrieval core.
//!
//! Every public operation returns [`CoreError`], which carries a stable
//! machine-readable code and an HTTP status for the transport layer to map.
//! Provider and storage internals may use `anyhow` for context chains; those
//! are converted at the trait boundary.

use thiserror::Error;

/// Result alias used across the core.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Classification of a model-provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Network errors, 429s, 5xx responses. Retried with backoff.
    Transient,
    /// Authentication or authorization failures. Triggers credential failover.
    Auth,
    /// Anything else. Fails immediately.
    Fatal,
}

/// Core error taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Named operator is not registered.
    #[error("operator not found: {category}/{name}")]
    OperatorNotFound {
        /// Operator category (chunker, retriever, ...).
        category: &'static str,
        /// Requested operator name.
        name: String,
    },

    /// Divergent re-registration of an existing operator name.
    #[error("conflicting registration for operator {category}/{name}")]
    OperatorConflict {
        /// Operator category.
        category: &'static str,
        /// Conflicting operator name.
        name: String,
    },

    /// Incompatible operators or an embedding change after documents exist.
    #[error("knowledge base configuration error: {0}")]
    KbConfig(String),

    /// Knowledge base missing, or not visible from the caller's tenant.
    #[error("knowledge base not found: {0}")]
    KbNotFound(String),

    /// Document missing, or not visible from the caller's tenant.
    #[error("document not found: {0}")]
    DocNotFound(String),

    /// The API key's scope list excludes the requested knowledge base.
    #[error("knowledge base {0} is outside the API key scope")]
    KbNotInScope(String),

    /// Retrieval produced results, but security trimming removed all of them.
    #[error("no results passed security trimming")]
    NoPermission,

    /// Bad input: empty kb_ids, out-of-range parameters, unknown filters.
    #[error("validation error: {0}")]
    Validation(String),

    /// Query embedding dimension does not match the collection dimension.
    #[error("embedding dimension mismatch: query {query}, collection {collection}")]
    EmbeddingDimMismatch {
        /// Dimension of the query embedding.
        query: usize,
        /// Dimension the collection was created with.
        collection: usize,
    },

    /// A persistence write failed for a chunk. Recorded on the chunk row;
    /// never fails the whole document.
    #[error("indexing failed: {0}")]
    IndexingFailed(String),

    /// Upstream model or store failure.
    #[error("provider error: {detail}")]
    Provider {
        /// Failure classification, drives retry/failover.
        kind: ProviderErrorKind,
        /// Human-readable detail, context preserved through retries.
        detail: String,
    },

    /// Tenant status is not `active`.
    #[error("tenant {0} is disabled")]
    TenantDisabled(String),

    /// Uncaught internal error. Surfaced without leaking internals.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Build a validation error.
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    /// Build a KB configuration error.
    pub fn kb_config(detail: impl Into<String>) -> Self {
        Self::KbConfig(detail.into())
    }

    /// Build a transient provider error.
    pub fn provider_transient(detail: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Transient,
            detail: detail.into(),
        }
    }

    /// Build an auth provider error.
    pub fn provider_auth(detail: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Auth,
            detail: detail.into(),
        }
    }

    /// Build a fatal provider error.
    pub fn provider_fatal(detail: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Fatal,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OperatorNotFound { .. } => "OPERATOR_NOT_FOUND",
            Self::OperatorConflict { .. } => "OPERATOR_CONFLICT",
            Self::KbConfig(_) => "KB_CONFIG_ERROR",
            Self::KbNotFound(_) => "KB_NOT_FOUND",
            Self::DocNotFound(_) => "DOC_NOT_FOUND",
            Self::KbNotInScope(_) => "KB_NOT_IN_SCOPE",
            Self::NoPermission => "NO_PERMISSION",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::EmbeddingDimMismatch { .. } => "EMBEDDING_DIM_MISMATCH",
            Self::IndexingFailed(_) => "INDEXING_FAILED",
            Self::Provider { .. } => "PROVIDER_TRANSIENT",
            Self::TenantDisabled(_) => "TENANT_DISABLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the transport layer should map this error to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::OperatorNotFound { .. }
            | Self::OperatorConflict { .. }
            | Self::KbConfig(_)
            | Self::Validation(_) => 400,
            Self::KbNotFound(_) | Self::DocNotFound(_) => 404,
            Self::KbNotInScope(_) | Self::NoPermission | Self::TenantDisabled(_) => 403,
            Self::EmbeddingDimMismatch { .. }
            | Self::IndexingFailed(_)
            | Self::Provider { .. }
            | Self::Internal(_) => 500,
        }
    }

    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                kind: ProviderErrorKind::Transient,
                ..
            }
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(anyhow::Error::new(err).context("sqlite"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(anyhow::Error::new(err).context("json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        assert_eq!(CoreError::NoPermission.code(), "NO_PERMISSION");
        assert_eq!(CoreError::NoPermission.http_status(), 403);
        assert_eq!(CoreError::validation("x").http_status(), 400);
        assert_eq!(CoreError::KbNotFound("kb".into()).http_status(), 404);
        assert_eq!(
            CoreError::EmbeddingDimMismatch {
                query: 8,
                collection: 16
            }
            .http_status(),
            500
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(CoreError::provider_transient("429").is_transient());
        assert!(!CoreError::provider_fatal("bad request").is_transient());
        assert!(!CoreError::provider_auth("401").is_transient());
    }
}
