//! ACL security trimming.
//!
//! Evaluated per hit against the owning document's sensitivity and allow
//! lists. Rules:
//! - `role=admin` bypasses trimming entirely;
//! - `public` documents pass for any caller in the same tenant;
//! - `restricted` documents pass iff the caller's user, roles, or groups
//!   intersect the allow lists, or the caller's clearance is `restricted`.
//!   A restricted document with no allow lists at all passes only via
//!   clearance or admin role.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    AclRules, CallerIdentity, Clearance, Document, KeyRole, RetrievedHit, SensitivityLevel,
};
use crate::storage::RelationalStore;

/// Whether one document passes for one identity.
#[must_use]
pub fn document_passes(
    sensitivity: SensitivityLevel,
    acl: &AclRules,
    identity: &CallerIdentity,
) -> bool {
    match sensitivity {
        SensitivityLevel::Public => true,
        SensitivityLevel::Restricted => {
            if identity.clearance >= Clearance::Restricted {
                return true;
            }
            let user_allowed = identity
                .user
                .as_ref()
                .is_some_and(|u| acl.allow_users.contains(u));
            let role_allowed = identity.roles.iter().any(|r| acl.allow_roles.contains(r));
            let group_allowed = identity.groups.iter().any(|g| acl.allow_groups.contains(g));
            user_allowed || role_allowed || group_allowed
        }
    }
}

/// Drop hits the caller may not see. Hits with no owning document (summary
/// nodes of a hierarchy tree) pass for same-tenant callers.
pub async fn trim(
    relational: &Arc<dyn RelationalStore>,
    hits: Vec<RetrievedHit>,
    tenant_id: &str,
    identity: &CallerIdentity,
    role: KeyRole,
) -> Result<Vec<RetrievedHit>> {
    if role == KeyRole::Admin {
        return Ok(hits);
    }

    let mut doc_ids: Vec<String> = hits
        .iter()
        .map(|h| h.document_id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    doc_ids.sort();
    doc_ids.dedup();

    let documents: HashMap<String, Document> = relational
        .get_documents_by_ids(&doc_ids)
        .await?
        .into_iter()
        .map(|d| (d.id.clone(), d))
        .collect();

    let before = hits.len();
    let trimmed: Vec<RetrievedHit> = hits
        .into_iter()
        .filter(|hit| {
            if hit.document_id.is_empty() {
                return true;
            }
            let Some(document) = documents.get(&hit.document_id) else {
                tracing::warn!(document_id = %hit.document_id, "hit without document row, dropping");
                return false;
            };
            if document.tenant_id != tenant_id {
                return false;
            }
            document_passes(document.sensitivity, &document.acl, identity)
        })
        .collect();

    if trimmed.len() < before {
        tracing::debug!(
            dropped = before - trimmed.len(),
            kept = trimmed.len(),
            "security trimming dropped hits"
        );
    }
    Ok(trimmed)
}
