//! Enrichment: optional LLM-generated document summaries and contextualized
//! chunk text.
//!
//! Both enrichers are disabled by default and swallow provider failures:
//! a document always proceeds to indexing, with or without enrichment.

mod contextual;
mod summarizer;

pub use contextual::ChunkEnricher;
pub use summarizer::DocumentSummarizer;

use crate::model::{Chunk, Document};

/// Separator between a prepended summary and chunk text in embedding input.
pub(crate) const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// The text a chunk is embedded under.
///
/// `enriched_text` wins when present; otherwise the document summary is
/// prefixed when the summarizer ran with `prepend_summary`. The chunk's
/// stored `text` is never modified and is always what callers get back.
#[must_use]
pub fn embedding_input(document: &Document, chunk: &Chunk, prepend_summary: bool) -> String {
    if let Some(enriched) = &chunk.enriched_text {
        return enriched.clone();
    }
    match (&document.summary, prepend_summary) {
        (Some(summary), true) => format!("{summary}{SUMMARY_SEPARATOR}{}", chunk.text),
        _ => chunk.text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AclRules, IndexingStatus, SensitivityLevel, SummaryStatus};
    use chrono::Utc;

    fn fixtures() -> (Document, Chunk) {
        let document = Document {
            id: "d1".to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            title: "Doc".to_string(),
            source_metadata: serde_json::json!({}),
            summary: Some("A summary.".to_string()),
            summary_status: SummaryStatus::Completed,
            sensitivity: SensitivityLevel::Public,
            acl: AclRules::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let chunk = Chunk {
            id: "c1".to_string(),
            tenant_id: "t1".to_string(),
            kb_id: "kb1".to_string(),
            document_id: "d1".to_string(),
            ordinal: 0,
            text: "Chunk text.".to_string(),
            enriched_text: None,
            metadata: serde_json::json!({}),
            indexing_status: IndexingStatus::Pending,
            indexing_error: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        (document, chunk)
    }

    #[test]
    fn test_enriched_text_wins() {
        let (document, mut chunk) = fixtures();
        chunk.enriched_text = Some("Contextualized.".to_string());
        assert_eq!(embedding_input(&document, &chunk, true), "Contextualized.");
    }

    #[test]
    fn test_summary_prefix() {
        let (document, chunk) = fixtures();
        let input = embedding_input(&document, &chunk, true);
        assert!(input.starts_with("A summary."));
        assert!(input.ends_with("Chunk text."));
        assert_eq!(embedding_input(&document, &chunk, false), "Chunk text.");
    }
}
