//! SQLite-backed relational driver.
//!
//! Reference implementation of [`RelationalStore`] for embedded
//! deployments. Structured columns (configs, ACLs, metadata, identities)
//! are stored as JSON text; timestamps as RFC 3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use super::RelationalStore;
use crate::error::{CoreError, Result};
use crate::model::{
    ApiKeyIdentity, Chunk, Document, HierarchyNode, IndexingStatus, KnowledgeBase, SummaryStatus,
    Tenant,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    key_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_bases (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    config TEXT NOT NULL,
    document_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_kb_tenant ON knowledge_bases(tenant_id);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    kb_id TEXT NOT NULL,
    title TEXT NOT NULL,
    source_metadata TEXT NOT NULL,
    summary TEXT,
    summary_status TEXT NOT NULL,
    sensitivity TEXT NOT NULL,
    acl TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_kb ON documents(kb_id);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    kb_id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    enriched_text TEXT,
    metadata TEXT NOT NULL,
    indexing_status TEXT NOT NULL,
    indexing_error TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(kb_id);
CREATE INDEX IF NOT EXISTS idx_chunks_status ON chunks(kb_id, indexing_status);

CREATE TABLE IF NOT EXISTS hierarchy_nodes (
    id TEXT PRIMARY KEY,
    kb_id TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hierarchy_kb ON hierarchy_nodes(kb_id);
"#;

/// SQLite relational store.
pub struct SqliteRelational {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteRelational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRelational").finish_non_exhaustive()
    }
}

fn bad_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(anyhow::anyhow!(message)),
    )
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| bad_column(idx, format!("bad timestamp: {e}")))
}

fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| bad_column(idx, format!("bad json: {e}")))
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let summary_status: String = row.get(6)?;
    let sensitivity: String = row.get(7)?;
    let acl: String = row.get(8)?;
    Ok(Document {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kb_id: row.get(2)?,
        title: row.get(3)?,
        source_metadata: parse_json(4, &row.get::<_, String>(4)?)?,
        summary: row.get(5)?,
        summary_status: SummaryStatus::parse(&summary_status)
            .ok_or_else(|| bad_column(6, format!("bad summary status: {summary_status}")))?,
        sensitivity: crate::model::SensitivityLevel::parse(&sensitivity)
            .ok_or_else(|| bad_column(7, format!("bad sensitivity: {sensitivity}")))?,
        acl: serde_json::from_str(&acl).map_err(|e| bad_column(8, format!("bad acl: {e}")))?,
        created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
        updated_at: parse_ts(10, &row.get::<_, String>(10)?)?,
    })
}

const DOCUMENT_COLUMNS: &str = "id, tenant_id, kb_id, title, source_metadata, summary, \
     summary_status, sensitivity, acl, created_at, updated_at";

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let status: String = row.get(8)?;
    Ok(Chunk {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kb_id: row.get(2)?,
        document_id: row.get(3)?,
        ordinal: row.get::<_, i64>(4)? as usize,
        text: row.get(5)?,
        enriched_text: row.get(6)?,
        metadata: parse_json(7, &row.get::<_, String>(7)?)?,
        indexing_status: IndexingStatus::parse(&status)
            .ok_or_else(|| bad_column(8, format!("bad indexing status: {status}")))?,
        indexing_error: row.get(9)?,
        retry_count: row.get::<_, i64>(10)? as u32,
        created_at: parse_ts(11, &row.get::<_, String>(11)?)?,
    })
}

const CHUNK_COLUMNS: &str = "id, tenant_id, kb_id, document_id, ordinal, text, enriched_text, \
     metadata, indexing_status, indexing_error, retry_count, created_at";

impl SqliteRelational {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl RelationalStore for SqliteRelational {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM tenants WHERE id = ?1",
                [tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|r| serde_json::from_str(&r).map_err(CoreError::from))
            .transpose()
    }

    async fn put_tenant(&self, tenant: &Tenant) -> Result<()> {
        let record = serde_json::to_string(tenant)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tenants (id, record) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET record = excluded.record",
            params![tenant.id, record],
        )?;
        Ok(())
    }

    async fn get_api_key_with_identity(&self, key_id: &str) -> Result<Option<ApiKeyIdentity>> {
        let conn = self.conn.lock();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM api_keys WHERE key_id = ?1",
                [key_id],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|r| serde_json::from_str(&r).map_err(CoreError::from))
            .transpose()
    }

    async fn put_api_key(&self, key: &ApiKeyIdentity) -> Result<()> {
        let record = serde_json::to_string(key)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO api_keys (key_id, tenant_id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(key_id) DO UPDATE SET tenant_id = excluded.tenant_id,
                 record = excluded.record",
            params![key.key_id, key.tenant_id, record],
        )?;
        Ok(())
    }

    async fn get_kb_with_config(&self, kb_id: &str) -> Result<Option<KnowledgeBase>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, tenant_id, name, description, config, document_count, created_at, \
             updated_at FROM knowledge_bases WHERE id = ?1",
            [kb_id],
            |row| {
                let config: String = row.get(4)?;
                Ok(KnowledgeBase {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    config: serde_json::from_str(&config)
                        .map_err(|e| bad_column(4, format!("bad kb config: {e}")))?,
                    document_count: row.get::<_, i64>(5)? as usize,
                    created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
                    updated_at: parse_ts(7, &row.get::<_, String>(7)?)?,
                })
            },
        )
        .optional()
        .map_err(CoreError::from)
    }

    async fn put_kb(&self, kb: &KnowledgeBase) -> Result<()> {
        let config = serde_json::to_string(&kb.config)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO knowledge_bases (id, tenant_id, name, description, config, \
             document_count, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                 description = excluded.description, config = excluded.config,
                 document_count = excluded.document_count, updated_at = excluded.updated_at",
            params![
                kb.id,
                kb.tenant_id,
                kb.name,
                kb.description,
                config,
                kb.document_count as i64,
                kb.created_at.to_rfc3339(),
                kb.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_kb_config(&self, kb_id: &str, config: &crate::config::KbConfig) -> Result<()> {
        let serialized = serde_json::to_string(config)?;
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE knowledge_bases SET config = ?1, updated_at = ?2 WHERE id = ?3",
            params![serialized, Utc::now().to_rfc3339(), kb_id],
        )?;
        if updated == 0 {
            return Err(CoreError::KbNotFound(kb_id.to_string()));
        }
        Ok(())
    }

    async fn adjust_document_count(&self, kb_id: &str, delta: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE knowledge_bases SET document_count = MAX(0, document_count + ?1), \
             updated_at = ?2 WHERE id = ?3",
            params![delta, Utc::now().to_rfc3339(), kb_id],
        )?;
        Ok(())
    }

    async fn has_indexed_chunks(&self, kb_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chunks WHERE kb_id = ?1 AND indexing_status = 'indexed')",
            [kb_id],
            |row| row.get(0),
        )?;
        Ok(count != 0)
    }

    async fn create_document(&self, document: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, tenant_id, kb_id, title, source_metadata, \
             summary, summary_status, sensitivity, acl, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                document.id,
                document.tenant_id,
                document.kb_id,
                document.title,
                serde_json::to_string(&document.source_metadata)?,
                document.summary,
                document.summary_status.as_str(),
                document.sensitivity.as_str(),
                serde_json::to_string(&document.acl)?,
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_document_summary(
        &self,
        document_id: &str,
        summary: Option<&str>,
        status: SummaryStatus,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE documents SET summary = ?1, summary_status = ?2, updated_at = ?3 \
             WHERE id = ?4",
            params![
                summary,
                status.as_str(),
                Utc::now().to_rfc3339(),
                document_id
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::DocNotFound(document_id.to_string()));
        }
        Ok(())
    }

    async fn get_documents_by_ids(&self, ids: &[String]) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut documents = Vec::with_capacity(ids.len());
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        for id in ids {
            if let Some(document) = stmt.query_row([id], row_to_document).optional()? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    async fn list_documents_for_kb(&self, kb_id: &str) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE kb_id = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let documents = stmt
            .query_map([kb_id], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    async fn delete_document_cascade(&self, document_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", [document_id])?;
        tx.execute("DELETE FROM documents WHERE id = ?1", [document_id])?;
        tx.commit()?;
        Ok(())
    }

    async fn create_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        for chunk in chunks {
            tx.execute(
                "INSERT OR REPLACE INTO chunks (id, tenant_id, kb_id, document_id, ordinal, \
                 text, enriched_text, metadata, indexing_status, indexing_error, retry_count, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    chunk.id,
                    chunk.tenant_id,
                    chunk.kb_id,
                    chunk.document_id,
                    chunk.ordinal as i64,
                    chunk.text,
                    chunk.enriched_text,
                    serde_json::to_string(&chunk.metadata)?,
                    chunk.indexing_status.as_str(),
                    chunk.indexing_error,
                    i64::from(chunk.retry_count),
                    chunk.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn update_chunk_status(
        &self,
        chunk_id: &str,
        status: IndexingStatus,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let updated = if status == IndexingStatus::Failed {
            conn.execute(
                "UPDATE chunks SET indexing_status = ?1, indexing_error = ?2, \
                 retry_count = retry_count + 1 WHERE id = ?3",
                params![status.as_str(), error, chunk_id],
            )?
        } else {
            conn.execute(
                "UPDATE chunks SET indexing_status = ?1, indexing_error = ?2 WHERE id = ?3",
                params![status.as_str(), error, chunk_id],
            )?
        };
        if updated == 0 {
            return Err(CoreError::validation(format!("unknown chunk: {chunk_id}")));
        }
        Ok(())
    }

    async fn list_chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ?1 ORDER BY ordinal"
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map([document_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    async fn list_chunks_for_kb(&self, kb_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE kb_id = ?1 ORDER BY document_id, ordinal"
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map([kb_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    async fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = stmt.query_row([id], row_to_chunk).optional()? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    async fn replace_hierarchy(&self, kb_id: &str, nodes: &[HierarchyNode]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM hierarchy_nodes WHERE kb_id = ?1", [kb_id])?;
        for node in nodes {
            tx.execute(
                "INSERT INTO hierarchy_nodes (id, kb_id, record) VALUES (?1, ?2, ?3)",
                params![node.id, kb_id, serde_json::to_string(node)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_hierarchy_nodes(&self, kb_id: &str) -> Result<Vec<HierarchyNode>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record FROM hierarchy_nodes WHERE kb_id = ?1 ORDER BY id")?;
        let records = stmt
            .query_map([kb_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        records
            .iter()
            .map(|r| serde_json::from_str(r).map_err(CoreError::from))
            .collect()
    }
}
