//! Hierarchical-tree retrieval over the KB summary tree.
//!
//! Two modes:
//! - **collapsed**: every tree node (all levels) competes in one flat
//!   cosine ranking;
//! - **traversal**: walk from the roots, keeping the top-b children at
//!   each level, down to the leaves. The visited nodes form a mixed-level
//!   result set.
//!
//! Mixed-level sets are deduped by node id before post-processing; the
//! best-scoring occurrence wins.

use std::collections::HashMap;

use super::{RetrievalEnv, RetrievalQuery};
use crate::config::TreeMode;
use crate::error::{CoreError, Result};
use crate::model::{HierarchyNode, RetrievedHit};
use crate::storage::cosine_similarity;

pub(crate) const SOURCE_TAG: &str = "hierarchical_tree";

pub(crate) async fn retrieve(
    env: &RetrievalEnv,
    query: &RetrievalQuery,
    mode: TreeMode,
    branch: usize,
) -> Result<Vec<RetrievedHit>> {
    let mut nodes: Vec<HierarchyNode> = Vec::new();
    for kb_id in &query.kb_ids {
        nodes.extend(env.relational.get_hierarchy_nodes(kb_id).await?);
    }
    // Tenant isolation holds even if a caller passes a foreign KB id.
    nodes.retain(|n| n.tenant_id == query.tenant_id);
    if nodes.is_empty() {
        return Err(CoreError::kb_config(
            "hierarchical-tree retrieval requires a built summary tree",
        ));
    }

    let embedded = env
        .providers
        .embedding
        .embed(std::slice::from_ref(&query.text))
        .await?;
    let Some(query_vector) = embedded.into_iter().next() else {
        return Ok(Vec::new());
    };

    let scored: Vec<(usize, f32)> = match mode {
        TreeMode::Collapsed => nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (i, cosine_similarity(&query_vector, &n.embedding)))
            .collect(),
        TreeMode::Traversal => traverse(&nodes, &query_vector, branch.max(1)),
    };

    // Dedup by node id, best score wins.
    let mut best: HashMap<&str, f32> = HashMap::new();
    for (i, score) in &scored {
        let id = nodes[*i].id.as_str();
        let entry = best.entry(id).or_insert(f32::MIN);
        if *score > *entry {
            *entry = *score;
        }
    }

    let mut hits = Vec::new();
    for node in &nodes {
        let Some(&score) = best.get(node.id.as_str()) else {
            continue;
        };
        hits.push(hit_for_node(env, node, score).await?);
    }
    Ok(hits)
}

/// Root-to-leaf descent keeping the top-b children per level.
fn traverse(nodes: &[HierarchyNode], query_vector: &[f32], branch: usize) -> Vec<(usize, f32)> {
    let by_id: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let max_level = nodes.iter().map(|n| n.level).max().unwrap_or(0);

    let mut frontier: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.level == max_level)
        .map(|(i, _)| i)
        .collect();

    let mut visited: Vec<(usize, f32)> = Vec::new();
    while !frontier.is_empty() {
        let mut scored: Vec<(usize, f32)> = frontier
            .iter()
            .map(|&i| (i, cosine_similarity(query_vector, &nodes[i].embedding)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| nodes[a.0].id.cmp(&nodes[b.0].id))
        });
        scored.truncate(branch);
        visited.extend(scored.iter().copied());

        frontier = scored
            .iter()
            .flat_map(|(i, _)| nodes[*i].children.iter())
            .filter_map(|child_id| by_id.get(child_id.as_str()).copied())
            .collect();
    }
    visited
}

async fn hit_for_node(
    env: &RetrievalEnv,
    node: &HierarchyNode,
    score: f32,
) -> Result<RetrievedHit> {
    // Leaves resolve back to their chunk row; summary nodes stand alone.
    if let Some(chunk_id) = &node.chunk_id {
        let chunks = env
            .relational
            .get_chunks_by_ids(std::slice::from_ref(chunk_id))
            .await?;
        if let Some(chunk) = chunks.into_iter().next() {
            return Ok(RetrievedHit {
                chunk_id: chunk.id,
                kb_id: chunk.kb_id,
                document_id: chunk.document_id,
                text: chunk.text,
                score,
                ordinal: chunk.ordinal,
                metadata: chunk.metadata,
                source_tag: SOURCE_TAG.to_string(),
                level: Some(node.level),
                parent_not_found: false,
                diagnostics: Default::default(),
                context: None,
            });
        }
    }
    Ok(RetrievedHit {
        chunk_id: node.id.clone(),
        kb_id: node.kb_id.clone(),
        document_id: String::new(),
        text: node.text.clone(),
        score,
        ordinal: 0,
        metadata: serde_json::json!({"node_id": node.id.clone(), "children": node.children.len()}),
        source_tag: SOURCE_TAG.to_string(),
        level: Some(node.level),
        parent_not_found: false,
        diagnostics: Default::default(),
        context: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, level: u32, children: Vec<&str>, embedding: Vec<f32>) -> HierarchyNode {
        HierarchyNode {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            level,
            children: children.into_iter().map(str::to_string).collect(),
            chunk_id: None,
            text: format!("node {id}"),
            embedding,
        }
    }

    #[test]
    fn test_traversal_descends_relevant_branch() {
        let nodes = vec![
            node("root_x", 1, vec!["leaf_x1", "leaf_x2"], vec![1.0, 0.0]),
            node("root_y", 1, vec!["leaf_y1"], vec![0.0, 1.0]),
            node("leaf_x1", 0, vec![], vec![0.9, 0.1]),
            node("leaf_x2", 0, vec![], vec![0.8, 0.2]),
            node("leaf_y1", 0, vec![], vec![0.1, 0.9]),
        ];
        let visited = traverse(&nodes, &[1.0, 0.0], 1);
        let ids: Vec<&str> = visited.iter().map(|(i, _)| nodes[*i].id.as_str()).collect();
        assert_eq!(ids, vec!["root_x", "leaf_x1"]);
    }

    #[test]
    fn test_traversal_branch_width() {
        let nodes = vec![
            node("root", 1, vec!["a", "b", "c"], vec![1.0, 0.0]),
            node("a", 0, vec![], vec![1.0, 0.0]),
            node("b", 0, vec![], vec![0.9, 0.1]),
            node("c", 0, vec![], vec![0.0, 1.0]),
        ];
        let visited = traverse(&nodes, &[1.0, 0.0], 2);
        let leaf_ids: Vec<&str> = visited
            .iter()
            .filter(|(i, _)| nodes[*i].level == 0)
            .map(|(i, _)| nodes[*i].id.as_str())
            .collect();
        assert_eq!(leaf_ids, vec!["a", "b"]);
    }
}
