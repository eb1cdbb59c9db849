//! Multi-tenant knowledge-base retrieval core.
//!
//! Quarry ingests text documents, splits them into retrievable chunks,
//! maintains dense and sparse indexes behind abstract storage drivers, and
//! answers queries with ranked, security-trimmed passages.
//!
//! # Components
//!
//! - **Registry** ([`registry`]): name-based operator lookup and KB-config
//!   compatibility validation
//! - **Chunking** ([`chunking`]): seven strategies from paragraph splitting
//!   to parent-child structures
//! - **Enrichment** ([`enrich`]): optional LLM document summaries and
//!   contextualized chunk text
//! - **Indexing** ([`indexing`]): per-chunk status machine over the dense
//!   and sparse stores, hierarchical summary trees, reconciliation
//! - **Retrieval** ([`retrieval`]): dense / BM25 / hybrid primitives and
//!   the composite strategies built on them (fusion, HyDE, multi-query,
//!   self-query, parent-document, ensemble, hierarchical-tree)
//! - **Post-processing** ([`postprocess`]): ACL security trimming, rerank,
//!   context-window expansion
//!
//! The [`ingest::IngestService`] and [`service::RetrievalService`]
//! orchestrators thread a per-request [`config::ResolvedConfig`] through
//! these components: request overrides → KB config → tenant defaults →
//! system settings → built-in defaults.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quarry_core::{
//!     config::SystemSettings,
//!     ingest::{IngestService, NewDocument},
//!     providers::ProviderSet,
//!     registry::OperatorRegistry,
//!     service::{RetrievalRequest, RetrievalService},
//!     storage::{MemoryBm25, MemoryDense, MemoryRelational},
//! };
//!
//! let relational = Arc::new(MemoryRelational::new());
//! let dense = Arc::new(MemoryDense::new());
//! let sparse = Arc::new(MemoryBm25::default());
//! let registry = Arc::new(OperatorRegistry::with_builtins());
//! let settings = SystemSettings::from_env()?;
//!
//! let ingest = IngestService::new(
//!     relational.clone(), dense.clone(), Some(sparse.clone()),
//!     providers.clone(), registry.clone(), settings.clone(),
//! );
//! ingest.ingest_document(&key, "kb-id", NewDocument {
//!     text: "Aspirin is used to relieve pain.".into(),
//!     ..Default::default()
//! }).await?;
//!
//! let retrieval = RetrievalService::new(
//!     relational, dense, Some(sparse), providers, registry, settings,
//! );
//! let response = retrieval.retrieve(&key, &RetrievalRequest {
//!     query: "what is aspirin for?".into(),
//!     kb_ids: vec!["kb-id".into()],
//!     overrides: Default::default(),
//! }).await?;
//! ```

pub mod chunking;
pub mod config;
pub mod enrich;
pub mod error;
pub mod indexing;
pub mod ingest;
pub mod model;
pub mod postprocess;
pub mod providers;
pub mod registry;
pub mod retrieval;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use error::{CoreError, Result};
pub use ingest::{IngestService, IngestReport, NewDocument};
pub use model::{RetrievalResponse, RetrievedHit};
pub use registry::OperatorRegistry;
pub use service::{KbStats, RetrievalRequest, RetrievalService};
