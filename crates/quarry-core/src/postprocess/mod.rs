//! Post-processing pipeline, applied in fixed order after retrieval:
//! ACL security trimming, then optional rerank, then optional
//! context-window expansion.

pub mod acl;
pub mod context_window;
pub mod rerank;

use std::sync::Arc;

use crate::config::ResolvedConfig;
use crate::error::{CoreError, Result};
use crate::model::{CallerIdentity, KeyRole, RetrievedHit};
use crate::providers::ProviderSet;
use crate::storage::RelationalStore;

/// Run the full pipeline over a retriever's output.
///
/// Returns `NO_PERMISSION` when the retriever found results but trimming
/// removed every one of them.
pub async fn run(
    relational: &Arc<dyn RelationalStore>,
    providers: &ProviderSet,
    config: &ResolvedConfig,
    query_text: &str,
    hits: Vec<RetrievedHit>,
    tenant_id: &str,
    identity: &CallerIdentity,
    role: KeyRole,
) -> Result<Vec<RetrievedHit>> {
    let had_results = !hits.is_empty();

    let mut hits = acl::trim(relational, hits, tenant_id, identity, role).await?;
    if had_results && hits.is_empty() {
        return Err(CoreError::NoPermission);
    }

    if let Some(settings) = &config.post.rerank {
        let client = providers.require_rerank()?;
        hits = rerank::rerank(client, query_text, hits, settings.top_n).await?;
    }

    if let Some(settings) = &config.post.context_window {
        context_window::expand(relational, &mut hits, settings).await?;
    }

    Ok(hits)
}
