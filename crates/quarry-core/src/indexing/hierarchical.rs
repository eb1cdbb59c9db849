//! Hierarchical summary tree.
//!
//! The KB's `indexed` chunks become level-0 leaves. Each round clusters the
//! current level's embeddings, asks the LLM for a summary per cluster, and
//! makes every summary a node one level up whose children are the clustered
//! members. The build stops at `max_levels` or when fewer than two clusters
//! remain. A rebuild replaces the whole tree atomically from the reader's
//! perspective: the old tree stays queryable until the new one is committed.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use uuid::Uuid;

use crate::config::{ClusterMethod, IndexerConfig};
use crate::error::{CoreError, Result};
use crate::model::{HierarchyNode, IndexingStatus};
use crate::providers::{EmbeddingClient, LlmClient};
use crate::storage::{cosine_similarity, RelationalStore};

const SUMMARY_MAX_TOKENS: usize = 300;
const CLUSTER_TEXT_CHARS: usize = 1_200;
const KMEANS_ITERATIONS: usize = 10;
/// Soft assignment: a member also joins a secondary cluster whose centroid
/// similarity is within this fraction of its best.
const SOFT_ASSIGN_RATIO: f32 = 0.95;

/// Outcome of a tree build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeReport {
    /// Summary levels built above the leaves.
    pub levels: u32,
    /// Total nodes persisted, leaves included.
    pub nodes: usize,
}

/// Hierarchical tree builder.
pub struct TreeBuilder {
    relational: Arc<dyn RelationalStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LlmClient>,
}

impl std::fmt::Debug for TreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("embedding_model", &self.embeddings.model())
            .field("llm_model", &self.llm.model())
            .finish()
    }
}

/// Plain k-means over dense vectors, deterministic for a fixed seed.
fn kmeans(vectors: &[Vec<f32>], k: usize, seed: u64) -> Vec<usize> {
    let k = k.min(vectors.len()).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..vectors.len()).collect();
    indices.shuffle(&mut rng);
    let mut centroids: Vec<Vec<f32>> = indices[..k].iter().map(|&i| vectors[i].clone()).collect();

    let mut assignments = vec![0usize; vectors.len()];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let best = nearest_centroid(vector, &centroids);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = vectors
                .iter()
                .enumerate()
                .filter(|(i, _)| assignments[*i] == c)
                .map(|(_, v)| v)
                .collect();
            if members.is_empty() {
                continue;
            }
            let dim = centroid.len();
            let mut mean = vec![0.0f32; dim];
            for member in &members {
                for (m, v) in mean.iter_mut().zip(member.iter()) {
                    *m += v;
                }
            }
            for m in &mut mean {
                *m /= members.len() as f32;
            }
            *centroid = mean;
        }
    }
    assignments
}

fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0usize;
    let mut best_score = f32::MIN;
    for (c, centroid) in centroids.iter().enumerate() {
        let score = cosine_similarity(vector, centroid);
        if score > best_score {
            best_score = score;
            best = c;
        }
    }
    best
}

/// Merge clusters below the minimum size into their nearest sibling.
fn enforce_min_cluster_size(
    assignments: &mut [usize],
    vectors: &[Vec<f32>],
    k: usize,
    min_size: usize,
) {
    if min_size <= 1 {
        return;
    }
    loop {
        let mut sizes = vec![0usize; k];
        for &a in assignments.iter() {
            sizes[a] += 1;
        }
        let Some(small) = (0..k).find(|&c| sizes[c] > 0 && sizes[c] < min_size) else {
            break;
        };
        if sizes.iter().filter(|&&s| s > 0).count() <= 1 {
            break;
        }

        // Move every member of the undersized cluster to its nearest other
        // non-empty cluster's first member.
        let targets: Vec<usize> = (0..k).filter(|&c| c != small && sizes[c] > 0).collect();
        for i in 0..assignments.len() {
            if assignments[i] != small {
                continue;
            }
            let mut best = targets[0];
            let mut best_score = f32::MIN;
            for &t in &targets {
                let representative = assignments.iter().position(|&a| a == t);
                if let Some(r) = representative {
                    let score = cosine_similarity(&vectors[i], &vectors[r]);
                    if score > best_score {
                        best_score = score;
                        best = t;
                    }
                }
            }
            assignments[i] = best;
        }
    }
}

impl TreeBuilder {
    /// Create a new tree builder.
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        embeddings: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            relational,
            embeddings,
            llm,
        }
    }

    async fn summarize_cluster(&self, texts: &[&str]) -> Result<String> {
        let joined: String = texts
            .iter()
            .map(|t| t.chars().take(CLUSTER_TEXT_CHARS).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "The passages below cover related content. Write one paragraph \
             that summarizes what they collectively say.\n\n{joined}\n\nSummary:"
        );
        let summary = self.llm.complete(&prompt, SUMMARY_MAX_TOKENS).await?;
        Ok(summary.trim().to_string())
    }

    /// Build (or rebuild) the tree for a knowledge base.
    pub async fn build(
        &self,
        tenant_id: &str,
        kb_id: &str,
        indexer: &IndexerConfig,
    ) -> Result<TreeReport> {
        let IndexerConfig::Hierarchical {
            max_levels,
            cluster_method,
            min_cluster_size,
            branching,
            ..
        } = indexer
        else {
            return Err(CoreError::kb_config(
                "hierarchical tree build requires the hierarchical indexer",
            ));
        };

        let chunks = self.relational.list_chunks_for_kb(kb_id).await?;
        let leaves: Vec<_> = chunks
            .iter()
            .filter(|c| c.indexing_status == IndexingStatus::Indexed)
            .collect();
        if leaves.is_empty() {
            return Err(CoreError::validation(format!(
                "knowledge base {kb_id} has no indexed chunks to build a tree from"
            )));
        }

        let leaf_texts: Vec<String> = leaves.iter().map(|c| c.text.clone()).collect();
        let leaf_vectors = self.embeddings.embed(&leaf_texts).await?;

        let mut all_nodes: Vec<HierarchyNode> = leaves
            .iter()
            .zip(&leaf_vectors)
            .map(|(chunk, vector)| HierarchyNode {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                kb_id: kb_id.to_string(),
                level: 0,
                children: Vec::new(),
                chunk_id: Some(chunk.id.clone()),
                text: chunk.text.clone(),
                embedding: vector.clone(),
            })
            .collect();

        let mut current: Vec<usize> = (0..all_nodes.len()).collect();
        let mut levels_built = 0u32;

        for level in 1..=*max_levels {
            if current.len() < 2 {
                break;
            }
            let k = current.len().div_ceil((*branching).max(1));
            if k < 2 {
                break;
            }

            let vectors: Vec<Vec<f32>> = current
                .iter()
                .map(|&i| all_nodes[i].embedding.clone())
                .collect();
            let mut assignments = kmeans(&vectors, k, u64::from(level));
            enforce_min_cluster_size(&mut assignments, &vectors, k, *min_cluster_size);

            // Group members per cluster; soft assignment may add a member to
            // a secondary cluster.
            let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); k];
            for (pos, &cluster) in assignments.iter().enumerate() {
                clusters[cluster].push(current[pos]);
            }
            if *cluster_method == ClusterMethod::SoftProbabilistic {
                self.soft_assign(&mut clusters, &assignments, &vectors, &current);
            }
            clusters.retain(|members| !members.is_empty());
            if clusters.len() < 2 {
                break;
            }

            let mut next_level: Vec<usize> = Vec::with_capacity(clusters.len());
            for members in &clusters {
                let texts: Vec<&str> = members.iter().map(|&i| all_nodes[i].text.as_str()).collect();
                let summary = self.summarize_cluster(&texts).await?;
                let embedding = self
                    .embeddings
                    .embed(std::slice::from_ref(&summary))
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| CoreError::provider_fatal("empty embedding batch"))?;

                let node = HierarchyNode {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: tenant_id.to_string(),
                    kb_id: kb_id.to_string(),
                    level,
                    children: members.iter().map(|&i| all_nodes[i].id.clone()).collect(),
                    chunk_id: None,
                    text: summary,
                    embedding,
                };
                all_nodes.push(node);
                next_level.push(all_nodes.len() - 1);
            }

            levels_built = level;
            current = next_level;
        }

        self.relational.replace_hierarchy(kb_id, &all_nodes).await?;
        tracing::info!(
            kb_id = %kb_id,
            levels = levels_built,
            nodes = all_nodes.len(),
            "hierarchy tree built"
        );
        Ok(TreeReport {
            levels: levels_built,
            nodes: all_nodes.len(),
        })
    }

    /// Secondary membership for near-boundary points.
    fn soft_assign(
        &self,
        clusters: &mut [Vec<usize>],
        assignments: &[usize],
        vectors: &[Vec<f32>],
        current: &[usize],
    ) {
        // Centroid per cluster as the mean of its members.
        let centroids: Vec<Option<Vec<f32>>> = (0..clusters.len())
            .map(|c| {
                let members: Vec<&Vec<f32>> = assignments
                    .iter()
                    .enumerate()
                    .filter(|(_, &a)| a == c)
                    .map(|(i, _)| &vectors[i])
                    .collect();
                if members.is_empty() {
                    return None;
                }
                let dim = members[0].len();
                let mut mean = vec![0.0f32; dim];
                for member in &members {
                    for (m, v) in mean.iter_mut().zip(member.iter()) {
                        *m += v;
                    }
                }
                for m in &mut mean {
                    *m /= members.len() as f32;
                }
                Some(mean)
            })
            .collect();

        for (pos, &primary) in assignments.iter().enumerate() {
            let Some(primary_centroid) = &centroids[primary] else {
                continue;
            };
            let primary_score = cosine_similarity(&vectors[pos], primary_centroid);
            for (c, centroid) in centroids.iter().enumerate() {
                if c == primary {
                    continue;
                }
                let Some(centroid) = centroid else { continue };
                let score = cosine_similarity(&vectors[pos], centroid);
                if score >= primary_score * SOFT_ASSIGN_RATIO
                    && !clusters[c].contains(&current[pos])
                {
                    clusters[c].push(current[pos]);
                }
            }
        }
    }
}
