//! Data model for the retrieval core.
//!
//! Entities and their lifecycle states:
//! - Tenants own knowledge bases; knowledge bases own documents; documents
//!   own chunks; chunks own their vector and sparse records.
//! - Per-chunk indexing state drives consistency between the relational
//!   store and the dense/sparse stores.
//! - ACL fields are snapshotted onto vector records at indexing time and
//!   evaluated again at query time against the caller's identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

mod hit;

pub use hit::{ContextWindow, HitDiagnostics, ModelDescriptor, RetrievalResponse, RetrievedHit};

/// Tenant status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant may ingest and query.
    Active,
    /// All core calls are rejected.
    Disabled,
}

/// Data-layout policy for the dense store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// All tenants share one collection; retrieval filters by tenant id.
    Shared,
    /// One collection per tenant.
    PerTenant,
    /// Chosen operationally per tenant; switching is one-way and does not
    /// migrate existing data.
    Auto,
}

impl Default for IsolationStrategy {
    fn default() -> Self {
        Self::Shared
    }
}

/// Tenant record. Created by the admin surface; read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Opaque tenant identifier.
    pub id: String,
    /// Tenant status.
    pub status: TenantStatus,
    /// Dense-store isolation strategy.
    #[serde(default)]
    pub isolation: IsolationStrategy,
    /// Under `auto` isolation: whether this tenant has been promoted to a
    /// dedicated collection. One-way.
    #[serde(default)]
    pub dedicated_collection: bool,
    /// Tenant-level model defaults, below KB config in resolution order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_models: Option<TenantModelDefaults>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Whether the tenant may make core calls.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Tenant-level model defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantModelDefaults {
    /// Default embedding model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    /// Default LLM model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    /// Default rerank model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_model: Option<String>,
}

/// Knowledge base record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Unique identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Chunker/indexer/enricher/retriever/embedding configuration.
    pub config: crate::config::KbConfig,
    /// Number of documents currently in the KB.
    pub document_count: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Document summary generation status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    /// Summarizer enabled, not yet run.
    Pending,
    /// Summarizer call in flight.
    Generating,
    /// Summary stored on the document.
    Completed,
    /// Summarizer failed; the document proceeds without a summary.
    Failed,
    /// Summarizer disabled for this KB.
    Skipped,
}

impl SummaryStatus {
    /// Stable string form, used by the relational drivers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "generating" => Some(Self::Generating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Document sensitivity level for security trimming.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    /// Visible to any caller in the same tenant.
    Public,
    /// Visible only to callers matching the ACL or holding clearance.
    Restricted,
}

impl Default for SensitivityLevel {
    fn default() -> Self {
        Self::Public
    }
}

impl SensitivityLevel {
    /// Stable string form, used by the relational drivers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }
}

/// Access-control allow lists on a document.
///
/// Sets are ordered so ACL snapshots compare and serialize deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclRules {
    /// Users allowed to read restricted content.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allow_users: BTreeSet<String>,
    /// Roles allowed to read restricted content.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allow_roles: BTreeSet<String>,
    /// Groups allowed to read restricted content.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allow_groups: BTreeSet<String>,
}

impl AclRules {
    /// True when no allow lists are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allow_users.is_empty() && self.allow_roles.is_empty() && self.allow_groups.is_empty()
    }
}

/// Document record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: String,
    /// Owning tenant. Always equals the KB's tenant.
    pub tenant_id: String,
    /// Owning knowledge base.
    pub kb_id: String,
    /// Document title.
    pub title: String,
    /// Source metadata map (origin URI, content hash, arbitrary keys).
    #[serde(default)]
    pub source_metadata: serde_json::Value,
    /// LLM-generated summary, when the summarizer ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Summary lifecycle status.
    pub summary_status: SummaryStatus,
    /// Security trimming level.
    #[serde(default)]
    pub sensitivity: SensitivityLevel,
    /// Allow lists evaluated when `sensitivity` is restricted.
    #[serde(default)]
    pub acl: AclRules,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Per-chunk indexing state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    /// Row persisted, no write to the dense/sparse stores yet.
    Pending,
    /// Write in flight.
    Indexing,
    /// Vector record (and sparse record when enabled) persisted.
    Indexed,
    /// Write failed; see `indexing_error`. Retried only explicitly.
    Failed,
}

impl IndexingStatus {
    /// Stable string form, used by the relational drivers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "indexing" => Some(Self::Indexing),
            "indexed" => Some(Self::Indexed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Chunk record: the atomic retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier.
    pub id: String,
    /// Owning tenant. Always equals the document's tenant.
    pub tenant_id: String,
    /// Owning knowledge base. Always equals the document's KB.
    pub kb_id: String,
    /// Owning document.
    pub document_id: String,
    /// 0-based dense ordinal within the document.
    pub ordinal: usize,
    /// Original chunk text. Always what is returned to callers.
    pub text: String,
    /// LLM-contextualized text. When present, used as the embedding input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched_text: Option<String>,
    /// Structural metadata: `chunk_index`, and per-chunker keys such as
    /// `headings`, `language`, `block_kind`, `parent_id`, `child`.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Indexing lifecycle status.
    pub indexing_status: IndexingStatus,
    /// Error string from the last failed indexing attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexing_error: Option<String>,
    /// Number of indexing attempts after the first failure.
    pub retry_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Structural `parent_id`, when this chunk is a child.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.get("parent_id").and_then(|v| v.as_str())
    }

    /// Whether this chunk is a child under parent-child chunking.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.metadata
            .get("child")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Payload copied onto every vector record.
///
/// `tenant_id` and `kb_id` are mandatory; all retrievers filter on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning knowledge base.
    pub kb_id: String,
    /// Owning document.
    pub document_id: String,
    /// Chunk id this point mirrors.
    pub chunk_id: String,
    /// Chunk ordinal, for deterministic tie-breaks.
    pub ordinal: usize,
    /// Copy of the chunk's structural metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Document sensitivity at indexing time.
    pub sensitivity: SensitivityLevel,
    /// Document ACL snapshot at indexing time.
    #[serde(default)]
    pub acl: AclRules,
}

/// A vector record in the dense store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point id. Equal to the chunk id, which makes upserts idempotent.
    pub id: String,
    /// Embedding, fixed dimension per collection.
    pub vector: Vec<f32>,
    /// Filterable payload.
    pub payload: PointPayload,
}

/// Node in a knowledge base's hierarchical summary tree.
///
/// Level 0 nodes mirror chunks one-to-one at the time the tree was built;
/// higher levels are LLM cluster summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Unique identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning knowledge base.
    pub kb_id: String,
    /// 0 = leaf (chunk view), 1+ = summary levels.
    pub level: u32,
    /// Child node ids (empty for leaves).
    #[serde(default)]
    pub children: Vec<String>,
    /// For leaves: the chunk this node mirrors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// Node text: chunk text at level 0, cluster summary above.
    pub text: String,
    /// Node embedding.
    pub embedding: Vec<f32>,
}

/// API key role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// Full access; bypasses security trimming.
    Admin,
    /// Ingest and query.
    Write,
    /// Query only.
    Read,
}

/// Identity clearance for restricted content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Clearance {
    /// Default clearance.
    Standard,
    /// May read restricted documents regardless of allow lists.
    Restricted,
}

impl Default for Clearance {
    fn default() -> Self {
        Self::Standard
    }
}

/// The identity behind an API key, evaluated during security trimming.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// User principal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Roles held by the caller.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    /// Groups the caller belongs to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: BTreeSet<String>,
    /// Clearance level.
    #[serde(default)]
    pub clearance: Clearance,
}

/// API key record with its resolved identity. Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyIdentity {
    /// Key identifier.
    pub key_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Key role.
    pub role: KeyRole,
    /// When present, the key may only touch these knowledge bases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kb_scope: Option<BTreeSet<String>>,
    /// Identity used for security trimming.
    #[serde(default)]
    pub identity: CallerIdentity,
}

impl ApiKeyIdentity {
    /// Whether the key may touch the given knowledge base.
    #[must_use]
    pub fn kb_in_scope(&self, kb_id: &str) -> bool {
        match &self.kb_scope {
            Some(scope) => scope.contains(kb_id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            IndexingStatus::Pending,
            IndexingStatus::Indexing,
            IndexingStatus::Indexed,
            IndexingStatus::Failed,
        ] {
            assert_eq!(IndexingStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            SummaryStatus::Pending,
            SummaryStatus::Generating,
            SummaryStatus::Completed,
            SummaryStatus::Failed,
            SummaryStatus::Skipped,
        ] {
            assert_eq!(SummaryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(IndexingStatus::parse("bogus"), None);
    }

    #[test]
    fn test_acl_empty() {
        let mut acl = AclRules::default();
        assert!(acl.is_empty());
        acl.allow_roles.insert("sales".to_string());
        assert!(!acl.is_empty());
    }

    #[test]
    fn test_clearance_ordering() {
        assert!(Clearance::Restricted > Clearance::Standard);
    }

    #[test]
    fn test_kb_scope() {
        let mut key = ApiKeyIdentity {
            key_id: "k1".to_string(),
            tenant_id: "t1".to_string(),
            role: KeyRole::Read,
            kb_scope: None,
            identity: CallerIdentity::default(),
        };
        assert!(key.kb_in_scope("kb1"));
        key.kb_scope = Some(["kb2".to_string()].into_iter().collect());
        assert!(!key.kb_in_scope("kb1"));
        assert!(key.kb_in_scope("kb2"));
    }

    #[test]
    fn test_chunk_parent_metadata() {
        let chunk = Chunk {
            id: "c1".to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            ordinal: 1,
            text: "child text".to_string(),
            enriched_text: None,
            metadata: serde_json::json!({"chunk_index": 1, "child": true, "parent_id": "c0"}),
            indexing_status: IndexingStatus::Pending,
            indexing_error: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        assert!(chunk.is_child());
        assert_eq!(chunk.parent_id(), Some("c0"));
    }
}
