//! Document summarizer.

use std::sync::Arc;

use crate::config::{SummarizerSettings, SummaryLength};
use crate::error::Result;
use crate::providers::LlmClient;

/// Content sent to the model is capped to keep prompts bounded.
const MAX_CONTENT_CHARS: usize = 12_000;

/// LLM-backed document summarizer.
pub struct DocumentSummarizer {
    llm: Arc<dyn LlmClient>,
    settings: SummarizerSettings,
}

impl std::fmt::Debug for DocumentSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSummarizer")
            .field("model", &self.llm.model())
            .field("size_hint", &self.settings.size_hint)
            .finish()
    }
}

fn size_instruction(hint: SummaryLength) -> (&'static str, usize) {
    match hint {
        SummaryLength::Short => ("one or two sentences", 120),
        SummaryLength::Medium => ("a short paragraph", 300),
        SummaryLength::Long => ("several paragraphs", 800),
    }
}

impl DocumentSummarizer {
    /// Create a new summarizer.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, settings: SummarizerSettings) -> Self {
        Self { llm, settings }
    }

    /// Generate a summary for a document.
    pub async fn summarize(&self, title: &str, content: &str) -> Result<String> {
        let (length, max_tokens) = size_instruction(self.settings.size_hint);
        let truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();

        let prompt = format!(
            "Summarize the following document in {length}. Focus on the topics \
             it covers and the questions it can answer.\n\n\
             Title: {title}\n\nDocument:\n{truncated}\n\nSummary:"
        );

        let summary = self.llm.complete(&prompt, max_tokens).await?;
        Ok(summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, prompt: &str, _max_tokens: usize) -> Result<String> {
            assert!(prompt.contains("Title: Aspirin"));
            Ok("  Pain relief guidance.  ".to_string())
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_summary_trimmed() {
        let summarizer = DocumentSummarizer::new(
            Arc::new(EchoLlm),
            SummarizerSettings {
                size_hint: SummaryLength::Short,
                prepend_summary: false,
            },
        );
        let summary = summarizer
            .summarize("Aspirin", "Aspirin is used to relieve pain.")
            .await
            .unwrap();
        assert_eq!(summary, "Pain relief guidance.");
    }

    #[test]
    fn test_size_instructions_scale() {
        let (_, short) = size_instruction(SummaryLength::Short);
        let (_, long) = size_instruction(SummaryLength::Long);
        assert!(short < long);
    }
}
