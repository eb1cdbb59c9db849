//! End-to-end scenarios over the in-memory stores and deterministic
//! providers: ingestion through retrieval, security trimming, composite
//! strategies, and the configuration guards.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use quarry_core::config::{
    ChunkerConfig, EmbeddingSettings, KbConfig, RequestOverrides, RetrieverConfig,
    SparseNormalization, SystemSettings,
};
use quarry_core::error::Result;
use quarry_core::ingest::{IngestService, NewDocument};
use quarry_core::model::{
    AclRules, ApiKeyIdentity, CallerIdentity, Clearance, IsolationStrategy, KeyRole,
    KnowledgeBase, SensitivityLevel, Tenant, TenantStatus,
};
use quarry_core::providers::{HashedEmbeddings, LlmClient, ProviderSet, RerankClient};
use quarry_core::registry::OperatorRegistry;
use quarry_core::service::{RetrievalRequest, RetrievalService};
use quarry_core::storage::{
    DenseStore, MemoryBm25, MemoryDense, MemoryRelational, RelationalStore, SparseStore,
};

/// Collision-free for the vocabulary these tests use, so cosine scores are
/// exactly the bag-of-words overlap.
const DIM: usize = 320;

struct ScriptedLlm {
    lines: Vec<String>,
}

impl ScriptedLlm {
    fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
        Ok(self.lines.join("\n"))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Scores candidates by input position, so rerank always reverses the
/// incoming order. That makes field migration observable.
struct ReversingReranker;

#[async_trait]
impl RerankClient for ReversingReranker {
    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok((0..candidates.len()).map(|i| i as f32).collect())
    }

    fn model(&self) -> &str {
        "reversing"
    }
}

struct World {
    relational: Arc<MemoryRelational>,
    dense: Arc<MemoryDense>,
    ingest: IngestService,
    retrieval: RetrievalService,
}

fn local_embedding() -> EmbeddingSettings {
    EmbeddingSettings {
        provider: "local".to_string(),
        model: "hashed-bow".to_string(),
        dim: DIM,
    }
}

fn world_with_llm(lines: &[&str]) -> World {
    let relational = Arc::new(MemoryRelational::new());
    let dense = Arc::new(MemoryDense::new());
    let sparse = Arc::new(MemoryBm25::default());
    let registry = Arc::new(OperatorRegistry::with_builtins());
    let settings = SystemSettings::default();

    let providers = ProviderSet::new(
        Arc::new(HashedEmbeddings::new(DIM)),
        Some(Arc::new(ScriptedLlm::new(lines))),
        Some(Arc::new(ReversingReranker)),
    );

    let ingest = IngestService::new(
        Arc::clone(&relational) as Arc<dyn RelationalStore>,
        Arc::clone(&dense) as Arc<dyn DenseStore>,
        Some(Arc::clone(&sparse) as Arc<dyn SparseStore>),
        providers.clone(),
        Arc::clone(&registry),
        settings.clone(),
    );
    let retrieval = RetrievalService::new(
        Arc::clone(&relational) as Arc<dyn RelationalStore>,
        Arc::clone(&dense) as Arc<dyn DenseStore>,
        Some(Arc::clone(&sparse) as Arc<dyn SparseStore>),
        providers,
        registry,
        settings,
    );

    World {
        relational,
        dense,
        ingest,
        retrieval,
    }
}

fn world() -> World {
    world_with_llm(&[])
}

async fn seed_tenant(world: &World, tenant_id: &str) {
    let tenant = Tenant {
        id: tenant_id.to_string(),
        status: TenantStatus::Active,
        isolation: IsolationStrategy::Shared,
        dedicated_collection: false,
        default_models: None,
        created_at: Utc::now(),
    };
    world.relational.put_tenant(&tenant).await.unwrap();
}

async fn seed_kb(world: &World, tenant_id: &str, kb_id: &str, config: KbConfig) {
    let kb = KnowledgeBase {
        id: kb_id.to_string(),
        tenant_id: tenant_id.to_string(),
        name: kb_id.to_string(),
        description: None,
        config,
        document_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    world.relational.put_kb(&kb).await.unwrap();
}

fn write_key(tenant_id: &str) -> ApiKeyIdentity {
    ApiKeyIdentity {
        key_id: format!("{tenant_id}-writer"),
        tenant_id: tenant_id.to_string(),
        role: KeyRole::Write,
        kb_scope: None,
        identity: CallerIdentity::default(),
    }
}

fn read_key(tenant_id: &str, roles: &[&str]) -> ApiKeyIdentity {
    ApiKeyIdentity {
        key_id: format!("{tenant_id}-reader"),
        tenant_id: tenant_id.to_string(),
        role: KeyRole::Read,
        kb_scope: None,
        identity: CallerIdentity {
            user: Some("user1".to_string()),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            groups: BTreeSet::new(),
            clearance: Clearance::Standard,
        },
    }
}

fn recursive_kb_config() -> KbConfig {
    KbConfig {
        chunker: ChunkerConfig::Recursive {
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                " ".to_string(),
                String::new(),
            ],
            chunk_size: 200,
        },
        embedding: local_embedding(),
        ..Default::default()
    }
}

fn request(query: &str, kb_ids: &[&str]) -> RetrievalRequest {
    RetrievalRequest {
        query: query.to_string(),
        kb_ids: kb_ids.iter().map(|k| (*k).to_string()).collect(),
        overrides: RequestOverrides::default(),
    }
}

// ---------------------------------------------------------------------------
// S1: basic dense recall
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_basic_dense_recall() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;

    let report = world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                title: Some("Aspirin".to_string()),
                text: "Aspirin is used to relieve pain. Pregnant women should not take it."
                    .to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(report.chunks_indexed > 0);
    assert_eq!(report.chunks_failed, 0);

    let mut req = request("Can pregnant women take aspirin?", &["kb1"]);
    req.overrides.top_k = Some(3);
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();

    assert!(!response.hits.is_empty());
    let top = &response.hits[0];
    assert!(top.text.contains("Pregnant women should not take it"));
    assert!(top.score > 0.5, "score was {}", top.score);
    assert_eq!(response.model.retriever, "dense");
    assert_eq!(response.model.embedding_model.as_deref(), Some("hashed-bow"));
}

// ---------------------------------------------------------------------------
// S2: ACL trimming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_acl_trimming() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;

    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                title: Some("Aspirin".to_string()),
                text: "Aspirin is used to relieve pain.".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                title: Some("Pricing".to_string()),
                text: "Confidential pricing: $42.".to_string(),
                sensitivity: SensitivityLevel::Restricted,
                acl: AclRules {
                    allow_roles: ["sales".to_string()].into_iter().collect(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The restricted document is the only lexical match: a viewer gets
    // NO_PERMISSION, not an empty list.
    let mut req = request("pricing", &["kb1"]);
    req.overrides.retriever = Some(RetrieverConfig::Sparse {
        normalization: SparseNormalization::default(),
    });
    let err = world
        .retrieval
        .retrieve(&read_key("t1", &["viewer"]), &req)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_PERMISSION");
    assert_eq!(err.http_status(), 403);

    // A sales caller passes the allow list.
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &["sales"]), &req)
        .await
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert!(response.hits[0].text.contains("Confidential pricing"));

    // Dense retrieval never returns the restricted document to the viewer.
    let dense_req = request("pricing", &["kb1"]);
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &["viewer"]), &dense_req)
        .await
        .unwrap();
    assert!(response
        .hits
        .iter()
        .all(|h| !h.text.contains("Confidential")));
}

// ---------------------------------------------------------------------------
// S3: parent-child expansion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_parent_child_expansion() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(
        &world,
        "t1",
        "kb1",
        KbConfig {
            chunker: ChunkerConfig::ParentChild {
                parent_chars: 200,
                child_chars: 50,
            },
            retriever: RetrieverConfig::ParentDocument {
                base: Box::new(RetrieverConfig::Dense),
                return_mode: Default::default(),
            },
            embedding: local_embedding(),
            ..Default::default()
        },
    )
    .await;

    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                title: Some("Paragraphs".to_string()),
                text: "A. First paragraph here. B. Second paragraph here.".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut req = request("First paragraph", &["kb1"]);
    req.overrides.top_k = Some(1);
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();

    assert_eq!(response.hits.len(), 1);
    let hit = &response.hits[0];
    assert!(hit.text.contains("First paragraph"));
    assert!(hit.text.contains("Second paragraph"));
    assert!(hit.metadata.get("parent_id").is_some());
    assert!(!hit.parent_not_found);
    assert_eq!(response.model.retriever, "parent_document");
}

// ---------------------------------------------------------------------------
// S4: HyDE visibility through rerank
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_hyde_fields_survive_rerank() {
    let world = world_with_llm(&[
        "aspirin relieves pain for about four hours",
        "pregnant women should not take aspirin",
    ]);
    seed_tenant(&world, "t1").await;
    seed_kb(
        &world,
        "t1",
        "kb1",
        KbConfig {
            chunker: ChunkerConfig::Paragraph {
                separator: "\n\n".to_string(),
                max_chars: 60,
            },
            embedding: local_embedding(),
            ..Default::default()
        },
    )
    .await;

    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                title: Some("Aspirin".to_string()),
                text: "Aspirin is used to relieve pain.\n\n\
                       Pregnant women should not take it.\n\n\
                       The first paragraph is about aspirin.\n\n\
                       Confidential pricing is not here.\n\n\
                       A second paragraph about pain."
                    .to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut req = request("Can pregnant women take aspirin?", &["kb1"]);
    req.overrides.top_k = Some(5);
    req.overrides.retriever = Some(RetrieverConfig::Hyde {
        base: Box::new(RetrieverConfig::Dense),
        num_queries: 2,
        include_original: true,
    });
    req.overrides.rerank = Some(true);

    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();

    assert!(response.hits.len() >= 2);
    let hyde_queries = response.hits[0]
        .diagnostics
        .hyde_queries
        .as_ref()
        .expect("hyde_queries migrated to the post-rerank top hit");
    assert_eq!(hyde_queries.len(), 2);
    assert!(response
        .hits
        .iter()
        .skip(1)
        .all(|h| h.diagnostics.hyde_queries.is_none()));
    assert_eq!(response.model.rerank_model.as_deref(), Some("reversing"));
    assert_eq!(response.model.llm_model.as_deref(), Some("scripted"));
}

// ---------------------------------------------------------------------------
// S5: embedding-change guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_embedding_change_guard() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;

    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Aspirin is used to relieve pain.".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Changing the embedding model after chunks are indexed is rejected.
    let mut changed = recursive_kb_config();
    changed.embedding.model = "hashed-bow-v2".to_string();
    let err = world
        .retrieval
        .update_kb_config(&write_key("t1"), "kb1", changed)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "KB_CONFIG_ERROR");
    assert_eq!(err.http_status(), 400);

    // An identical embedding with other changes goes through.
    let mut retriever_only = recursive_kb_config();
    retriever_only.retriever = RetrieverConfig::Hybrid {
        dense_weight: 0.6,
        sparse_weight: 0.4,
        normalization: SparseNormalization::default(),
    };
    world
        .retrieval
        .update_kb_config(&write_key("t1"), "kb1", retriever_only)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// S6: tenant isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_tenant_isolation() {
    let world = world();
    for tenant in ["t1", "t2"] {
        seed_tenant(&world, tenant).await;
        let kb_id = format!("{tenant}-kb");
        seed_kb(&world, tenant, &kb_id, recursive_kb_config()).await;
        world
            .ingest
            .ingest_document(
                &write_key(tenant),
                &kb_id,
                NewDocument {
                    text: "The widget-alpha component specification.".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    // T2 sees exactly its own document.
    let response = world
        .retrieval
        .retrieve(&read_key("t2", &[]), &request("widget-alpha", &["t2-kb"]))
        .await
        .unwrap();
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].kb_id, "t2-kb");

    // T1's KB id never resolves for T2, existence does not leak.
    let err = world
        .retrieval
        .retrieve(&read_key("t2", &[]), &request("widget-alpha", &["t1-kb"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "KB_NOT_FOUND");
    assert_eq!(err.http_status(), 404);
}

// ---------------------------------------------------------------------------
// Universal properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrieval_is_deterministic() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Aspirin is used to relieve pain.\n\n\
                       Pregnant women should not take it.\n\n\
                       The widget-alpha component specification."
                    .to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let req = request("pain relief", &["kb1"]);
    let key = read_key("t1", &[]);
    let first = world.retrieval.retrieve(&key, &req).await.unwrap();
    let second = world.retrieval.retrieve(&key, &req).await.unwrap();

    let ids_first: Vec<&str> = first.hits.iter().map(|h| h.chunk_id.as_str()).collect();
    let ids_second: Vec<&str> = second.hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids_first, ids_second);
    for (a, b) in first.hits.iter().zip(&second.hits) {
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[tokio::test]
async fn reingest_same_content_is_noop() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;

    let submission = NewDocument {
        id: Some("doc-1".to_string()),
        text: "Aspirin is used to relieve pain.".to_string(),
        ..Default::default()
    };
    let first = world
        .ingest
        .ingest_document(&write_key("t1"), "kb1", submission.clone())
        .await
        .unwrap();
    assert!(!first.unchanged);
    let points_after_first = world.dense.point_count("quarry_chunks");

    let second = world
        .ingest
        .ingest_document(&write_key("t1"), "kb1", submission)
        .await
        .unwrap();
    assert!(second.unchanged);
    assert_eq!(world.dense.point_count("quarry_chunks"), points_after_first);
}

#[tokio::test]
async fn delete_document_removes_derived_records() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;

    let report = world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                id: Some("doc-1".to_string()),
                text: "Aspirin is used to relieve pain.".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(world.dense.point_count("quarry_chunks") > 0);

    world
        .ingest
        .delete_document(&write_key("t1"), &report.document_id)
        .await
        .unwrap();
    assert_eq!(world.dense.point_count("quarry_chunks"), 0);
    assert!(world
        .relational
        .list_chunks_for_document(&report.document_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn hybrid_scores_stay_bounded() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Aspirin is used to relieve pain.\n\n\
                       Pregnant women should not take it."
                    .to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut req = request("relieve pain", &["kb1"]);
    req.overrides.retriever = Some(RetrieverConfig::Hybrid {
        dense_weight: 0.7,
        sparse_weight: 0.3,
        normalization: SparseNormalization::default(),
    });
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();

    assert!(!response.hits.is_empty());
    for hit in &response.hits {
        assert!(
            (0.0..=1.0 + 1e-6).contains(&hit.score),
            "hybrid score out of bounds: {}",
            hit.score
        );
    }
}

#[tokio::test]
async fn validation_and_guard_errors() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;

    // Empty kb_ids.
    let err = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &request("query", &[]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    // Out-of-scope KB.
    let mut scoped = read_key("t1", &[]);
    scoped.kb_scope = Some(["other-kb".to_string()].into_iter().collect());
    let err = world
        .retrieval
        .retrieve(&scoped, &request("query", &["kb1"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "KB_NOT_IN_SCOPE");

    // Disabled tenant rejects all calls.
    let disabled = Tenant {
        id: "frozen".to_string(),
        status: TenantStatus::Disabled,
        isolation: IsolationStrategy::Shared,
        dedicated_collection: false,
        default_models: None,
        created_at: Utc::now(),
    };
    world.relational.put_tenant(&disabled).await.unwrap();
    seed_kb(&world, "frozen", "frozen-kb", recursive_kb_config()).await;
    let err = world
        .retrieval
        .retrieve(&read_key("frozen", &[]), &request("query", &["frozen-kb"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TENANT_DISABLED");
    assert_eq!(err.http_status(), 403);
}

#[tokio::test]
async fn top_k_is_clamped() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Aspirin is used to relieve pain.".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut req = request("pain", &["kb1"]);
    req.overrides.top_k = Some(10_000);
    // Clamped, not rejected.
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();
    assert!(response.hits.len() <= 50);
}

#[tokio::test]
async fn multi_query_attaches_generated_queries() {
    let world = world_with_llm(&["aspirin for pain", "aspirin during pregnancy"]);
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Aspirin is used to relieve pain.\n\n\
                       Pregnant women should not take it."
                    .to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut req = request("aspirin", &["kb1"]);
    req.overrides.retriever = Some(RetrieverConfig::MultiQuery {
        base: Box::new(RetrieverConfig::Dense),
        num_queries: 2,
    });
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();

    assert!(!response.hits.is_empty());
    let generated = response.hits[0]
        .diagnostics
        .generated_queries
        .as_ref()
        .expect("generated_queries on the first hit");
    assert_eq!(generated.len(), 2);
    assert!(response.hits[0].diagnostics.retrieval_details.is_some());
}

#[tokio::test]
async fn api_key_resolution_round_trips_identity() {
    let world = world();
    seed_tenant(&world, "t1").await;
    let key = read_key("t1", &["sales"]);
    world.relational.put_api_key(&key).await.unwrap();

    let resolved = world.retrieval.resolve_api_key(&key.key_id).await.unwrap();
    assert_eq!(resolved.tenant_id, "t1");
    assert_eq!(resolved.role, KeyRole::Read);
    assert!(resolved.identity.roles.contains("sales"));

    let err = world
        .retrieval
        .resolve_api_key("no-such-key")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn bm25_rebuild_restores_sparse_retrieval() {
    let world = world();
    seed_tenant(&world, "t1").await;
    seed_kb(&world, "t1", "kb1", recursive_kb_config()).await;
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Confidential pricing: $42.".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // A fresh cache (as after a restart) starts empty; rebuilding from
    // relational truth restores lexical retrieval.
    let fresh = MemoryBm25::default();
    let restored = quarry_core::storage::bm25::rebuild_from_relational(
        &fresh,
        &(Arc::clone(&world.relational) as Arc<dyn RelationalStore>),
        &["kb1".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(restored, 1);

    let hits = fresh
        .search(
            &quarry_core::storage::bm25::tokenize_terms("pricing"),
            &quarry_core::storage::SearchFilter::for_kbs("t1", &["kb1".to_string()]),
            10,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn context_window_expansion_attaches_neighbors() {
    let world = world();
    seed_tenant(&world, "t1").await;
    let mut config = recursive_kb_config();
    config.chunker = ChunkerConfig::Paragraph {
        separator: "\n\n".to_string(),
        max_chars: 40,
    };
    config.post.context_window = Some(quarry_core::config::ContextWindowSettings {
        before: 1,
        after: 1,
        max_chars: 500,
    });
    seed_kb(&world, "t1", "kb1", config).await;
    world
        .ingest
        .ingest_document(
            &write_key("t1"),
            "kb1",
            NewDocument {
                text: "Aspirin is used to relieve pain.\n\n\
                       Pregnant women should not take it.\n\n\
                       The widget-alpha component specification."
                    .to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut req = request("pregnant women", &["kb1"]);
    req.overrides.top_k = Some(1);
    let response = world
        .retrieval
        .retrieve(&read_key("t1", &[]), &req)
        .await
        .unwrap();

    let context = response.hits[0]
        .context
        .as_ref()
        .expect("context window attached");
    assert!(context.context_before.contains("relieve pain"));
    assert!(context.context_after.contains("widget-alpha"));
    assert!(context.context_text.contains("Pregnant women"));
}
