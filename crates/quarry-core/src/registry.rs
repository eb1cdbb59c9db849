//! Operator registry.
//!
//! Every built-in operator is a compile-time variant of its category's
//! config enum; the registry keeps the name-based lookup for extensibility
//! and is where operator compatibility is validated before any write.
//! Registrations happen at startup only; lookups are read-mostly.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::{IndexerConfig, KbConfig, RetrieverConfig};
use crate::error::{CoreError, Result};

/// Operator categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorCategory {
    /// Document → chunks.
    Chunker,
    /// Optional LLM augmentation.
    Enricher,
    /// Chunks → dense/sparse records.
    Indexer,
    /// Query → ranked hits.
    Retriever,
    /// Hits → trimmed/reranked/expanded hits.
    PostProcessor,
}

impl OperatorCategory {
    /// Stable category name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunker => "chunker",
            Self::Enricher => "enricher",
            Self::Indexer => "indexer",
            Self::Retriever => "retriever",
            Self::PostProcessor => "postprocessor",
        }
    }
}

const BUILTIN_FINGERPRINT: &str = "builtin";

const BUILTIN_OPERATORS: &[(OperatorCategory, &str)] = &[
    (OperatorCategory::Chunker, "paragraph"),
    (OperatorCategory::Chunker, "sliding_window"),
    (OperatorCategory::Chunker, "recursive"),
    (OperatorCategory::Chunker, "markdown"),
    (OperatorCategory::Chunker, "code"),
    (OperatorCategory::Chunker, "parent_child"),
    (OperatorCategory::Chunker, "sentence"),
    (OperatorCategory::Enricher, "summarizer"),
    (OperatorCategory::Enricher, "chunk_context"),
    (OperatorCategory::Indexer, "standard"),
    (OperatorCategory::Indexer, "hierarchical"),
    (OperatorCategory::Retriever, "dense"),
    (OperatorCategory::Retriever, "sparse"),
    (OperatorCategory::Retriever, "hybrid"),
    (OperatorCategory::Retriever, "fusion"),
    (OperatorCategory::Retriever, "hyde"),
    (OperatorCategory::Retriever, "multi_query"),
    (OperatorCategory::Retriever, "self_query"),
    (OperatorCategory::Retriever, "parent_document"),
    (OperatorCategory::Retriever, "ensemble"),
    (OperatorCategory::Retriever, "hierarchical_tree"),
    (OperatorCategory::PostProcessor, "acl_trim"),
    (OperatorCategory::PostProcessor, "rerank"),
    (OperatorCategory::PostProcessor, "context_window"),
];

/// Process-wide operator registry.
pub struct OperatorRegistry {
    entries: RwLock<HashMap<(OperatorCategory, String), String>>,
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.entries.read().len())
            .finish()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OperatorRegistry {
    /// Registry pre-populated with every built-in operator.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self {
            entries: RwLock::new(HashMap::new()),
        };
        for (category, name) in BUILTIN_OPERATORS {
            registry
                .register(*category, name, BUILTIN_FINGERPRINT)
                .unwrap_or_else(|_| unreachable!("builtin registration cannot conflict"));
        }
        registry
    }

    /// Register an operator name. Idempotent when the fingerprint matches
    /// the existing registration; divergent re-registration is rejected.
    pub fn register(
        &self,
        category: OperatorCategory,
        name: &str,
        fingerprint: &str,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        match entries.get(&(category, name.to_string())) {
            Some(existing) if existing == fingerprint => Ok(()),
            Some(_) => Err(CoreError::OperatorConflict {
                category: category.as_str(),
                name: name.to_string(),
            }),
            None => {
                entries.insert((category, name.to_string()), fingerprint.to_string());
                Ok(())
            }
        }
    }

    /// Look an operator up by name.
    pub fn get(&self, category: OperatorCategory, name: &str) -> Result<()> {
        if self.entries.read().contains_key(&(category, name.to_string())) {
            Ok(())
        } else {
            Err(CoreError::OperatorNotFound {
                category: category.as_str(),
                name: name.to_string(),
            })
        }
    }

    /// Cross-check a KB configuration: every named operator exists and the
    /// combination is coherent. Called before any write and before every
    /// retrieval with a request-level retriever override.
    pub fn validate(&self, config: &KbConfig) -> Result<()> {
        self.get(OperatorCategory::Chunker, config.chunker.name())?;
        self.get(OperatorCategory::Indexer, config.indexer.name())?;
        self.get(OperatorCategory::Retriever, config.retriever.name())?;
        if config.enrichment.summarizer.is_some() {
            self.get(OperatorCategory::Enricher, "summarizer")?;
        }
        if config.enrichment.chunk_context.is_some() {
            self.get(OperatorCategory::Enricher, "chunk_context")?;
        }
        if config.post.rerank.is_some() {
            self.get(OperatorCategory::PostProcessor, "rerank")?;
        }
        if config.post.context_window.is_some() {
            self.get(OperatorCategory::PostProcessor, "context_window")?;
        }

        self.validate_retriever(&config.retriever, config)
    }

    fn validate_retriever(&self, retriever: &RetrieverConfig, config: &KbConfig) -> Result<()> {
        self.get(OperatorCategory::Retriever, retriever.name())?;

        match retriever {
            RetrieverConfig::Sparse { .. } if !config.indexer.sparse_enabled() => {
                return Err(CoreError::kb_config(
                    "sparse retriever requires an indexer with sparse records enabled",
                ));
            }
            RetrieverConfig::Hybrid {
                dense_weight,
                sparse_weight,
                ..
            } => {
                if !config.indexer.sparse_enabled() {
                    return Err(CoreError::kb_config(
                        "hybrid retriever requires an indexer with sparse records enabled",
                    ));
                }
                if *dense_weight < 0.0 || *sparse_weight < 0.0 || dense_weight + sparse_weight <= 0.0
                {
                    return Err(CoreError::kb_config(
                        "hybrid retriever weights must be non-negative and sum to a positive value",
                    ));
                }
            }
            RetrieverConfig::ParentDocument { base, .. } => {
                if config.chunker.name() != "parent_child" {
                    return Err(CoreError::kb_config(
                        "parent_document retriever requires the parent_child chunker",
                    ));
                }
                self.validate_retriever(base, config)?;
            }
            RetrieverConfig::HierarchicalTree { .. } => {
                if !matches!(config.indexer, IndexerConfig::Hierarchical { .. }) {
                    return Err(CoreError::kb_config(
                        "hierarchical_tree retriever requires the hierarchical indexer",
                    ));
                }
            }
            RetrieverConfig::Fusion { legs, .. } => {
                if legs.is_empty() {
                    return Err(CoreError::kb_config(
                        "fusion retriever requires at least one base retriever",
                    ));
                }
                for leg in legs {
                    self.validate_retriever(leg, config)?;
                }
            }
            RetrieverConfig::Ensemble { legs, .. } => {
                if legs.is_empty() {
                    return Err(CoreError::kb_config(
                        "ensemble retriever requires at least one leg",
                    ));
                }
                for leg in legs {
                    if leg.weight < 0.0 {
                        return Err(CoreError::kb_config("ensemble weights must be non-negative"));
                    }
                    self.validate_retriever(&leg.retriever, config)?;
                }
            }
            RetrieverConfig::Hyde { base, .. }
            | RetrieverConfig::MultiQuery { base, .. }
            | RetrieverConfig::SelfQuery { base } => {
                self.validate_retriever(base, config)?;
            }
            RetrieverConfig::Dense | RetrieverConfig::Sparse { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkerConfig, EnsembleLeg, MergePolicy, SparseNormalization};

    #[test]
    fn test_builtin_lookup() {
        let registry = OperatorRegistry::with_builtins();
        assert!(registry.get(OperatorCategory::Chunker, "recursive").is_ok());
        let err = registry
            .get(OperatorCategory::Retriever, "mystery")
            .unwrap_err();
        assert_eq!(err.code(), "OPERATOR_NOT_FOUND");
    }

    #[test]
    fn test_register_idempotent_and_conflicting() {
        let registry = OperatorRegistry::with_builtins();
        registry
            .register(OperatorCategory::Chunker, "custom", "v1")
            .unwrap();
        registry
            .register(OperatorCategory::Chunker, "custom", "v1")
            .unwrap();
        let err = registry
            .register(OperatorCategory::Chunker, "custom", "v2")
            .unwrap_err();
        assert_eq!(err.code(), "OPERATOR_CONFLICT");
    }

    #[test]
    fn test_parent_document_requires_parent_child_chunker() {
        let registry = OperatorRegistry::with_builtins();
        let mut config = KbConfig::default();
        config.retriever = RetrieverConfig::ParentDocument {
            base: Box::new(RetrieverConfig::Dense),
            return_mode: Default::default(),
        };
        let err = registry.validate(&config).unwrap_err();
        assert_eq!(err.code(), "KB_CONFIG_ERROR");

        config.chunker = ChunkerConfig::ParentChild {
            parent_chars: 2000,
            child_chars: 400,
        };
        assert!(registry.validate(&config).is_ok());
    }

    #[test]
    fn test_tree_requires_hierarchical_indexer() {
        let registry = OperatorRegistry::with_builtins();
        let mut config = KbConfig::default();
        config.retriever = RetrieverConfig::HierarchicalTree {
            mode: Default::default(),
            branch: 3,
        };
        assert!(registry.validate(&config).is_err());

        config.indexer = serde_json::from_str(r#"{"name": "hierarchical"}"#).unwrap();
        assert!(registry.validate(&config).is_ok());
    }

    #[test]
    fn test_sparse_requires_sparse_enabled() {
        let registry = OperatorRegistry::with_builtins();
        let mut config = KbConfig::default();
        config.indexer = IndexerConfig::Standard {
            sparse_enabled: false,
        };
        config.retriever = RetrieverConfig::Sparse {
            normalization: SparseNormalization::default(),
        };
        assert!(registry.validate(&config).is_err());
    }

    #[test]
    fn test_nested_legs_validated() {
        let registry = OperatorRegistry::with_builtins();
        let mut config = KbConfig::default();
        config.indexer = IndexerConfig::Standard {
            sparse_enabled: false,
        };
        // A sparse leg buried inside an ensemble still trips the check.
        config.retriever = RetrieverConfig::Ensemble {
            legs: vec![
                EnsembleLeg {
                    retriever: RetrieverConfig::Dense,
                    weight: 0.5,
                },
                EnsembleLeg {
                    retriever: RetrieverConfig::Sparse {
                        normalization: SparseNormalization::default(),
                    },
                    weight: 0.5,
                },
            ],
            merge: MergePolicy::default(),
        };
        assert!(registry.validate(&config).is_err());
    }

    #[test]
    fn test_empty_fusion_rejected() {
        let registry = OperatorRegistry::with_builtins();
        let mut config = KbConfig::default();
        config.retriever = RetrieverConfig::Fusion {
            legs: vec![],
            merge: MergePolicy::default(),
        };
        assert!(registry.validate(&config).is_err());
    }
}
