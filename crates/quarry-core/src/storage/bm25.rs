//! In-memory BM25 inverted index.
//!
//! This store is a cache of relational truth: rebuildable at startup and
//! under an exclusive build lock, never authoritative. While a rebuild is
//! in progress, searches return empty so retrieval degrades to dense-only
//! rather than blocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{SearchFilter, SparseHit, SparseStore};
use crate::error::Result;
use crate::model::PointPayload;

/// Okapi BM25 parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

struct SparseEntry {
    payload: PointPayload,
    term_freq: HashMap<String, u32>,
    len: usize,
}

#[derive(Default)]
struct Bm25State {
    entries: HashMap<String, SparseEntry>,
    doc_freq: HashMap<String, usize>,
    total_len: usize,
}

impl Bm25State {
    fn insert(&mut self, payload: PointPayload, terms: &[String]) {
        self.remove(&payload.chunk_id.clone());
        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *term_freq.entry(term.clone()).or_insert(0) += 1;
        }
        for term in term_freq.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += terms.len();
        self.entries.insert(
            payload.chunk_id.clone(),
            SparseEntry {
                payload,
                term_freq,
                len: terms.len(),
            },
        );
    }

    fn remove(&mut self, chunk_id: &str) {
        if let Some(entry) = self.entries.remove(chunk_id) {
            for term in entry.term_freq.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
            self.total_len = self.total_len.saturating_sub(entry.len);
        }
    }

    fn avg_len(&self) -> f32 {
        if self.entries.is_empty() {
            return 1.0;
        }
        self.total_len as f32 / self.entries.len() as f32
    }
}

/// Memory-backed BM25 sparse store.
pub struct MemoryBm25 {
    state: RwLock<Bm25State>,
    rebuilding: AtomicBool,
    params: Bm25Params,
}

impl std::fmt::Debug for MemoryBm25 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryBm25")
            .field("entries", &state.entries.len())
            .field("rebuilding", &self.rebuilding.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for MemoryBm25 {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl MemoryBm25 {
    /// Create an empty index.
    #[must_use]
    pub fn new(params: Bm25Params) -> Self {
        Self {
            state: RwLock::new(Bm25State::default()),
            rebuilding: AtomicBool::new(false),
            params,
        }
    }

    /// Whether a rebuild currently holds the build lock.
    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// Replace the whole index from relational truth.
    ///
    /// Runs under the exclusive build lock; concurrent searches return empty
    /// until the rebuild commits.
    pub fn rebuild<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (PointPayload, Vec<String>)>,
    {
        self.rebuilding.store(true, Ordering::Release);
        let mut fresh = Bm25State::default();
        for (payload, terms) in entries {
            fresh.insert(payload, &terms);
        }
        {
            let mut state = self.state.write();
            *state = fresh;
        }
        self.rebuilding.store(false, Ordering::Release);
        tracing::info!(entries = self.state.read().entries.len(), "BM25 index rebuilt");
    }

    fn score(&self, state: &Bm25State, entry: &SparseEntry, terms: &[String]) -> f32 {
        let n = state.entries.len() as f32;
        let avg_len = state.avg_len();
        let mut score = 0.0f32;
        for term in terms {
            let Some(&tf) = entry.term_freq.get(term) else {
                continue;
            };
            let df = state.doc_freq.get(term).copied().unwrap_or(0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = tf as f32;
            let denom =
                tf + self.params.k1 * (1.0 - self.params.b + self.params.b * entry.len as f32 / avg_len);
            score += idf * tf * (self.params.k1 + 1.0) / denom;
        }
        score
    }
}

/// Rebuild the memory index from relational truth for a set of knowledge
/// bases. Intended for startup and for recovery after drift; retrieval
/// degrades to dense-only while the rebuild runs.
pub async fn rebuild_from_relational(
    store: &MemoryBm25,
    relational: &std::sync::Arc<dyn super::RelationalStore>,
    kb_ids: &[String],
) -> Result<usize> {
    let mut entries: Vec<(PointPayload, Vec<String>)> = Vec::new();
    for kb_id in kb_ids {
        let chunks = relational.list_chunks_for_kb(kb_id).await?;
        let mut doc_ids: Vec<String> = chunks.iter().map(|c| c.document_id.clone()).collect();
        doc_ids.sort();
        doc_ids.dedup();
        let documents: std::collections::HashMap<String, crate::model::Document> = relational
            .get_documents_by_ids(&doc_ids)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        for chunk in chunks
            .iter()
            .filter(|c| c.indexing_status == crate::model::IndexingStatus::Indexed)
        {
            let Some(document) = documents.get(&chunk.document_id) else {
                continue;
            };
            let payload = PointPayload {
                tenant_id: chunk.tenant_id.clone(),
                kb_id: chunk.kb_id.clone(),
                document_id: chunk.document_id.clone(),
                chunk_id: chunk.id.clone(),
                ordinal: chunk.ordinal,
                metadata: chunk.metadata.clone(),
                sensitivity: document.sensitivity,
                acl: document.acl.clone(),
            };
            entries.push((payload, tokenize_terms(&chunk.text)));
        }
    }
    let count = entries.len();
    store.rebuild(entries);
    Ok(count)
}

/// Tokenize text for BM25: lowercased alphanumeric terms.
#[must_use]
pub fn tokenize_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl SparseStore for MemoryBm25 {
    async fn index(&self, payload: &PointPayload, terms: &[String]) -> Result<()> {
        self.state.write().insert(payload.clone(), terms);
        Ok(())
    }

    async fn search(
        &self,
        terms: &[String],
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<SparseHit>> {
        if self.is_rebuilding() {
            tracing::warn!("BM25 rebuild in progress, degrading to empty sparse results");
            return Ok(Vec::new());
        }
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        let mut hits: Vec<SparseHit> = state
            .entries
            .values()
            .filter(|entry| filter.matches(&entry.payload))
            .filter_map(|entry| {
                let raw_score = self.score(&state, entry, terms);
                (raw_score > 0.0).then(|| SparseHit {
                    chunk_id: entry.payload.chunk_id.clone(),
                    raw_score,
                    payload: entry.payload.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.ordinal.cmp(&b.payload.ordinal))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, filter: &SearchFilter) -> Result<()> {
        let mut state = self.state.write();
        let doomed: Vec<String> = state
            .entries
            .values()
            .filter(|entry| filter.matches(&entry.payload))
            .map(|entry| entry.payload.chunk_id.clone())
            .collect();
        for chunk_id in doomed {
            state.remove(&chunk_id);
        }
        Ok(())
    }
}
