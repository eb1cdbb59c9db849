//! Configuration types for knowledge bases and the core pipeline.
//!
//! Every built-in operator is a sealed variant with a typed parameter
//! struct; the string names used by the operator registry map onto these
//! variants. A per-request [`ResolvedConfig`] is produced by merging request
//! overrides over KB config over tenant defaults over system settings over
//! built-in defaults (see [`resolve`]).

use serde::{Deserialize, Serialize};

mod resolve;
mod settings;

pub use resolve::{resolve, RequestOverrides, ResolvedConfig};
pub use settings::{ProviderSettings, RetrySettings, SystemSettings};

use crate::error::{CoreError, Result};

/// Chunker selection with typed parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ChunkerConfig {
    /// Split on a separator, recombining pieces to stay under `max_chars`.
    Paragraph {
        /// Paragraph separator.
        #[serde(default = "default_paragraph_separator")]
        separator: String,
        /// Maximum characters per chunk.
        #[serde(default = "default_max_chars")]
        max_chars: usize,
    },
    /// Fixed-size character windows with fixed overlap.
    SlidingWindow {
        /// Window size in characters.
        #[serde(default = "default_window_chars")]
        window_chars: usize,
        /// Overlap between consecutive windows, in characters.
        #[serde(default = "default_overlap_chars")]
        overlap_chars: usize,
    },
    /// Split by an ordered separator list, falling back to finer separators
    /// until pieces fit `chunk_size`.
    Recursive {
        /// Separators tried in order; the empty string means per-character.
        #[serde(default = "default_recursive_separators")]
        separators: Vec<String>,
        /// Maximum characters per chunk.
        #[serde(default = "default_max_chars")]
        chunk_size: usize,
    },
    /// Split at markdown heading boundaries down to `max_heading_level`.
    Markdown {
        /// Deepest heading level that starts a new chunk.
        #[serde(default = "default_heading_level")]
        max_heading_level: u8,
        /// Maximum characters per chunk within a section.
        #[serde(default = "default_max_chars")]
        max_chars: usize,
    },
    /// Split at top-level declaration boundaries of source code.
    Code {
        /// Language hint; auto-detected from metadata when absent.
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Maximum characters per chunk.
        #[serde(default = "default_max_chars")]
        max_chars: usize,
    },
    /// Two-level structure: coarse parents for context, fine children for
    /// matching.
    ParentChild {
        /// Maximum characters per parent chunk.
        #[serde(default = "default_parent_chars")]
        parent_chars: usize,
        /// Maximum characters per child chunk.
        #[serde(default = "default_child_chars")]
        child_chars: usize,
    },
    /// Sentence-boundary packing toward a token target with token overlap.
    Sentence {
        /// Target tokens per chunk.
        #[serde(default = "default_target_tokens")]
        target_tokens: usize,
        /// Tokens carried over between consecutive chunks.
        #[serde(default = "default_overlap_tokens")]
        overlap_tokens: usize,
    },
}

fn default_paragraph_separator() -> String {
    "\n\n".to_string()
}
fn default_max_chars() -> usize {
    1200
}
fn default_window_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    160
}
fn default_recursive_separators() -> Vec<String> {
    vec![
        "\n\n".to_string(),
        "\n".to_string(),
        ". ".to_string(),
        " ".to_string(),
        String::new(),
    ]
}
fn default_heading_level() -> u8 {
    3
}
fn default_parent_chars() -> usize {
    2000
}
fn default_child_chars() -> usize {
    400
}
fn default_target_tokens() -> usize {
    256
}
fn default_overlap_tokens() -> usize {
    32
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::Recursive {
            separators: default_recursive_separators(),
            chunk_size: default_max_chars(),
        }
    }
}

impl ChunkerConfig {
    /// Registry name of this chunker.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Paragraph { .. } => "paragraph",
            Self::SlidingWindow { .. } => "sliding_window",
            Self::Recursive { .. } => "recursive",
            Self::Markdown { .. } => "markdown",
            Self::Code { .. } => "code",
            Self::ParentChild { .. } => "parent_child",
            Self::Sentence { .. } => "sentence",
        }
    }
}

/// Clustering method for the hierarchical indexer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    /// Hard k-means assignment.
    KMeans,
    /// K-means centroids with soft secondary membership.
    SoftProbabilistic,
}

impl Default for ClusterMethod {
    fn default() -> Self {
        Self::KMeans
    }
}

/// Indexer selection with typed parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum IndexerConfig {
    /// Vector records plus optional sparse records, per-chunk status machine.
    Standard {
        /// Whether BM25 sparse records are written alongside vectors.
        #[serde(default = "default_true")]
        sparse_enabled: bool,
    },
    /// Standard indexing plus a recursive summary tree over the KB's chunks.
    Hierarchical {
        /// Whether BM25 sparse records are written alongside vectors.
        #[serde(default = "default_true")]
        sparse_enabled: bool,
        /// Maximum summary levels above the leaves.
        #[serde(default = "default_max_levels")]
        max_levels: u32,
        /// Clustering method.
        #[serde(default)]
        cluster_method: ClusterMethod,
        /// Clusters smaller than this are merged into their nearest peer.
        #[serde(default = "default_min_cluster_size")]
        min_cluster_size: usize,
        /// Target members per cluster, controls cluster count per level.
        #[serde(default = "default_branching")]
        branching: usize,
    },
}

fn default_true() -> bool {
    true
}
fn default_max_levels() -> u32 {
    3
}
fn default_min_cluster_size() -> usize {
    2
}
fn default_branching() -> usize {
    5
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::Standard {
            sparse_enabled: true,
        }
    }
}

impl IndexerConfig {
    /// Registry name of this indexer.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard { .. } => "standard",
            Self::Hierarchical { .. } => "hierarchical",
        }
    }

    /// Whether sparse records are written for this KB.
    #[must_use]
    pub fn sparse_enabled(&self) -> bool {
        match self {
            Self::Standard { sparse_enabled } | Self::Hierarchical { sparse_enabled, .. } => {
                *sparse_enabled
            }
        }
    }
}

/// Document summary length hint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLength {
    /// A sentence or two.
    Short,
    /// A short paragraph.
    Medium,
    /// Several paragraphs.
    Long,
}

impl Default for SummaryLength {
    fn default() -> Self {
        Self::Medium
    }
}

/// Document summarizer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizerSettings {
    /// Summary length hint.
    #[serde(default)]
    pub size_hint: SummaryLength,
    /// When true, the summary is prefixed to each chunk's embedding input;
    /// the stored chunk text is never modified.
    #[serde(default)]
    pub prepend_summary: bool,
}

/// Chunk contextualization settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkContextSettings {
    /// Neighboring chunks on each side included in the enrichment prompt.
    #[serde(default = "default_context_neighbors")]
    pub window: usize,
}

fn default_context_neighbors() -> usize {
    2
}

/// Enrichment configuration. Both enrichers call an LLM and are therefore
/// disabled by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentConfig {
    /// Document summarizer, when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer: Option<SummarizerSettings>,
    /// Chunk contextualizer, when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_context: Option<ChunkContextSettings>,
}

/// Normalization applied to raw BM25 scores before hybrid/fusion use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SparseNormalization {
    /// `1 / (1 + exp(-(raw - threshold)))`. Recommended when mixing with
    /// dense scores.
    Sigmoid {
        /// Absolute score threshold mapped to 0.5.
        #[serde(default = "default_sigmoid_threshold")]
        threshold: f32,
    },
    /// Min-max over the current result batch.
    MinMax,
}

fn default_sigmoid_threshold() -> f32 {
    8.0
}

impl Default for SparseNormalization {
    fn default() -> Self {
        Self::Sigmoid {
            threshold: default_sigmoid_threshold(),
        }
    }
}

/// Merge policy for fusion and ensemble retrievers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MergePolicy {
    /// Reciprocal-rank fusion: `score = Σ 1/(k + rank)`.
    Rrf {
        /// RRF constant.
        #[serde(default = "default_rrf_k")]
        k: f32,
    },
    /// Weighted sum over normalized scores.
    WeightedSum,
}

fn default_rrf_k() -> f32 {
    60.0
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::Rrf { k: default_rrf_k() }
    }
}

/// What the parent-document retriever returns per hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParentReturnMode {
    /// Parent chunk only.
    ParentOnly,
    /// Parent chunk plus the matched child texts in metadata.
    ParentWithChildren,
}

impl Default for ParentReturnMode {
    fn default() -> Self {
        Self::ParentOnly
    }
}

/// Traversal mode for the hierarchical-tree retriever.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TreeMode {
    /// Treat all tree nodes as a flat set and retrieve top-k across levels.
    Collapsed,
    /// Start from the roots, keep top-b children per level, descend to
    /// leaves.
    Traversal,
}

impl Default for TreeMode {
    fn default() -> Self {
        Self::Collapsed
    }
}

/// A weighted leg of an ensemble retriever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleLeg {
    /// The leg's retriever.
    pub retriever: RetrieverConfig,
    /// Merge weight.
    pub weight: f32,
}

/// Retriever strategy tree with typed parameters.
///
/// Leaves are primitive retrievers; internal nodes carry a merge policy.
/// Recursion is shallow in practice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum RetrieverConfig {
    /// k-NN over the dense store, cosine similarity.
    Dense,
    /// BM25 over the sparse store.
    Sparse {
        /// Score normalization.
        #[serde(default)]
        normalization: SparseNormalization,
    },
    /// Dense and sparse in parallel, merged by weighted sum on normalized
    /// scores.
    Hybrid {
        /// Weight of the dense leg.
        #[serde(default = "default_dense_weight")]
        dense_weight: f32,
        /// Weight of the sparse leg.
        #[serde(default = "default_sparse_weight")]
        sparse_weight: f32,
        /// Sparse score normalization.
        #[serde(default)]
        normalization: SparseNormalization,
    },
    /// Run multiple base retrievers and merge.
    Fusion {
        /// Base retrievers to run in parallel.
        legs: Vec<RetrieverConfig>,
        /// Merge policy.
        #[serde(default)]
        merge: MergePolicy,
    },
    /// Retrieve with LLM-generated hypothetical answers.
    Hyde {
        /// Base retriever run per generated query.
        base: Box<RetrieverConfig>,
        /// Number of hypothetical answers to generate.
        #[serde(default = "default_num_queries")]
        num_queries: usize,
        /// Whether the original query also runs against the base.
        #[serde(default = "default_true_flag")]
        include_original: bool,
    },
    /// Retrieve with LLM-generated paraphrases of the query.
    MultiQuery {
        /// Base retriever run per paraphrase.
        base: Box<RetrieverConfig>,
        /// Number of paraphrases to generate.
        #[serde(default = "default_num_queries")]
        num_queries: usize,
    },
    /// Decompose the query into a semantic part and a metadata filter.
    SelfQuery {
        /// Base retriever run with the semantic part.
        base: Box<RetrieverConfig>,
    },
    /// Match on child chunks, return their parents.
    ParentDocument {
        /// Base retriever run over child chunks.
        base: Box<RetrieverConfig>,
        /// What to return per hit.
        #[serde(default)]
        return_mode: ParentReturnMode,
    },
    /// Arbitrary weighted retriever list.
    Ensemble {
        /// Weighted legs.
        legs: Vec<EnsembleLeg>,
        /// Merge policy.
        #[serde(default)]
        merge: MergePolicy,
    },
    /// Retrieve over the hierarchical summary tree.
    HierarchicalTree {
        /// Traversal mode.
        #[serde(default)]
        mode: TreeMode,
        /// Children kept per level in traversal mode.
        #[serde(default = "default_branch_keep")]
        branch: usize,
    },
}

fn default_dense_weight() -> f32 {
    0.7
}
fn default_sparse_weight() -> f32 {
    0.3
}
fn default_num_queries() -> usize {
    3
}
fn default_true_flag() -> bool {
    true
}
fn default_branch_keep() -> usize {
    3
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::Dense
    }
}

impl RetrieverConfig {
    /// Registry name of this retriever.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse { .. } => "sparse",
            Self::Hybrid { .. } => "hybrid",
            Self::Fusion { .. } => "fusion",
            Self::Hyde { .. } => "hyde",
            Self::MultiQuery { .. } => "multi_query",
            Self::SelfQuery { .. } => "self_query",
            Self::ParentDocument { .. } => "parent_document",
            Self::Ensemble { .. } => "ensemble",
            Self::HierarchicalTree { .. } => "hierarchical_tree",
        }
    }

    /// Whether any node of this strategy tree needs an LLM client.
    #[must_use]
    pub fn needs_llm(&self) -> bool {
        match self {
            Self::Dense | Self::Sparse { .. } | Self::Hybrid { .. } => false,
            Self::Hyde { .. } | Self::MultiQuery { .. } | Self::SelfQuery { .. } => true,
            Self::ParentDocument { base, .. } => base.needs_llm(),
            Self::Fusion { legs, .. } => legs.iter().any(Self::needs_llm),
            Self::Ensemble { legs, .. } => legs.iter().any(|l| l.retriever.needs_llm()),
            Self::HierarchicalTree { .. } => false,
        }
    }

    /// Whether any node of this strategy tree reads the sparse store.
    #[must_use]
    pub fn needs_sparse(&self) -> bool {
        match self {
            Self::Sparse { .. } | Self::Hybrid { .. } => true,
            Self::Dense | Self::HierarchicalTree { .. } => false,
            Self::Hyde { base, .. } | Self::MultiQuery { base, .. } | Self::SelfQuery { base } => {
                base.needs_sparse()
            }
            Self::ParentDocument { base, .. } => base.needs_sparse(),
            Self::Fusion { legs, .. } => legs.iter().any(Self::needs_sparse),
            Self::Ensemble { legs, .. } => legs.iter().any(|l| l.retriever.needs_sparse()),
        }
    }

    /// Whether any node requires the parent-child chunker.
    #[must_use]
    pub fn needs_parent_child_chunker(&self) -> bool {
        match self {
            Self::ParentDocument { .. } => true,
            Self::Hyde { base, .. } | Self::MultiQuery { base, .. } | Self::SelfQuery { base } => {
                base.needs_parent_child_chunker()
            }
            Self::Fusion { legs, .. } => legs.iter().any(Self::needs_parent_child_chunker),
            Self::Ensemble { legs, .. } => {
                legs.iter().any(|l| l.retriever.needs_parent_child_chunker())
            }
            _ => false,
        }
    }

    /// Whether any node requires the hierarchical indexer.
    #[must_use]
    pub fn needs_hierarchical_indexer(&self) -> bool {
        match self {
            Self::HierarchicalTree { .. } => true,
            Self::Hyde { base, .. } | Self::MultiQuery { base, .. } | Self::SelfQuery { base } => {
                base.needs_hierarchical_indexer()
            }
            Self::ParentDocument { base, .. } => base.needs_hierarchical_indexer(),
            Self::Fusion { legs, .. } => legs.iter().any(Self::needs_hierarchical_indexer),
            Self::Ensemble { legs, .. } => {
                legs.iter().any(|l| l.retriever.needs_hierarchical_indexer())
            }
            _ => false,
        }
    }
}

/// Embedding provider/model/dimension for a knowledge base.
///
/// Immutable once any document in the KB has reached `indexed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingSettings {
    /// Provider name (`openai`, `local`).
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Embedding dimension.
    pub dim: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dim: 1536,
        }
    }
}

/// Rerank settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankSettings {
    /// Rerank model name; system default when empty.
    #[serde(default)]
    pub model: Option<String>,
    /// Hits sent to the rerank model.
    #[serde(default = "default_rerank_top_n")]
    pub top_n: usize,
}

fn default_rerank_top_n() -> usize {
    10
}

/// Context-window expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextWindowSettings {
    /// Neighbor chunks before the hit.
    #[serde(default = "default_context_span")]
    pub before: usize,
    /// Neighbor chunks after the hit.
    #[serde(default = "default_context_span")]
    pub after: usize,
    /// Total character cap; expansion is trimmed to fit, the hit chunk is
    /// kept intact.
    #[serde(default = "default_context_cap")]
    pub max_chars: usize,
}

fn default_context_span() -> usize {
    1
}
fn default_context_cap() -> usize {
    6000
}

/// Post-processing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PostProcessConfig {
    /// Rerank step, when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankSettings>,
    /// Context-window expansion, when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<ContextWindowSettings>,
}

/// Full knowledge-base configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KbConfig {
    /// Chunker operator.
    #[serde(default)]
    pub chunker: ChunkerConfig,
    /// Indexer operator.
    #[serde(default)]
    pub indexer: IndexerConfig,
    /// Enrichment operators.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Default retriever strategy.
    #[serde(default)]
    pub retriever: RetrieverConfig,
    /// Embedding settings.
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    /// Post-processing defaults.
    #[serde(default)]
    pub post: PostProcessConfig,
}

/// Reject KB config updates that change embedding settings while the KB has
/// indexed chunks. Changing anything else remains allowed.
pub fn guard_embedding_change(
    current: &KbConfig,
    proposed: &KbConfig,
    has_indexed_chunks: bool,
) -> Result<()> {
    if has_indexed_chunks && current.embedding != proposed.embedding {
        return Err(CoreError::kb_config(format!(
            "embedding configuration is immutable once documents are indexed \
             (current {}/{} dim {}, proposed {}/{} dim {})",
            current.embedding.provider,
            current.embedding.model,
            current.embedding.dim,
            proposed.embedding.provider,
            proposed.embedding.model,
            proposed.embedding.dim,
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_config_round_trip() {
        let config = ChunkerConfig::ParentChild {
            parent_chars: 200,
            child_chars: 50,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"name\":\"parent_child\""));
        let back: ChunkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_chunker_defaults_from_name_only() {
        let config: ChunkerConfig = serde_json::from_str(r#"{"name":"recursive"}"#).unwrap();
        assert_eq!(config, ChunkerConfig::default());
    }

    #[test]
    fn test_retriever_tree_requirements() {
        let config = RetrieverConfig::Fusion {
            legs: vec![
                RetrieverConfig::Dense,
                RetrieverConfig::Hyde {
                    base: Box::new(RetrieverConfig::Sparse {
                        normalization: SparseNormalization::default(),
                    }),
                    num_queries: 3,
                    include_original: true,
                },
            ],
            merge: MergePolicy::default(),
        };
        assert!(config.needs_llm());
        assert!(config.needs_sparse());
        assert!(!config.needs_parent_child_chunker());
        assert!(!config.needs_hierarchical_indexer());
    }

    #[test]
    fn test_embedding_guard() {
        let current = KbConfig::default();
        let mut proposed = current.clone();
        assert!(guard_embedding_change(&current, &proposed, true).is_ok());

        proposed.embedding.model = "text-embedding-3-large".to_string();
        proposed.embedding.dim = 3072;
        assert!(guard_embedding_change(&current, &proposed, false).is_ok());
        let err = guard_embedding_change(&current, &proposed, true).unwrap_err();
        assert_eq!(err.code(), "KB_CONFIG_ERROR");

        // Non-embedding changes stay allowed with indexed chunks.
        let mut retriever_only = current.clone();
        retriever_only.retriever = RetrieverConfig::Hybrid {
            dense_weight: 0.5,
            sparse_weight: 0.5,
            normalization: SparseNormalization::MinMax,
        };
        assert!(guard_embedding_change(&current, &retriever_only, true).is_ok());
    }
}
