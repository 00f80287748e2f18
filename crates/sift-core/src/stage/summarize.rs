use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use super::{excerpt, DocumentsInput, StageUnit, SummarizeOutput};
use crate::capability::{GenerationRequest, Generator};
use crate::error::{CollaboratorError, StageError};
use crate::model::Document;
use crate::tokens::truncate_to_tokens;

/// Concurrent generation calls per run.
const CONCURRENCY: usize = 4;

const SYSTEM_PROMPT: &str = "You are a research assistant. Summarize the document in two or \
three sentences, keeping concrete figures and findings.";

/// One summary per document, in document order.
pub struct SummarizeStage {
    generator: Arc<dyn Generator>,
    content_token_budget: usize,
    max_tokens: u32,
}

impl SummarizeStage {
    pub fn new(generator: Arc<dyn Generator>, content_token_budget: usize, max_tokens: u32) -> Self {
        Self {
            generator,
            content_token_budget,
            max_tokens,
        }
    }

    async fn summarize(&self, document: &Document) -> Result<String, CollaboratorError> {
        let request = GenerationRequest::new(
            SYSTEM_PROMPT,
            format!(
                "Title: {}\n\n{}",
                document.display_title(),
                truncate_to_tokens(&document.content, self.content_token_budget)
            ),
        )
        .max_tokens(self.max_tokens);
        let summary = self.generator.generate(request).await?;
        Ok(summary.trim().to_string())
    }
}

#[async_trait]
impl StageUnit for SummarizeStage {
    type Input = DocumentsInput;
    type Output = SummarizeOutput;

    async fn run(&self, input: DocumentsInput) -> Result<SummarizeOutput, StageError> {
        let calls: Vec<BoxFuture<'_, Result<String, CollaboratorError>>> = input
            .documents
            .iter()
            .map(|doc| self.summarize(doc).boxed())
            .collect();
        let results: Vec<Result<String, CollaboratorError>> = stream::iter(calls)
            .buffered(CONCURRENCY)
            .collect()
            .await;

        let mut summaries = Vec::with_capacity(results.len());
        let mut first_error = None;
        let mut fallbacks = 0;
        for (doc, result) in input.documents.iter().zip(results) {
            match result {
                Ok(summary) if !summary.is_empty() => summaries.push(summary),
                Ok(_) => {
                    fallbacks += 1;
                    summaries.push(excerpt(doc));
                }
                Err(e) => {
                    warn!(title = doc.display_title(), error = %e, "Summary failed, using excerpt");
                    fallbacks += 1;
                    first_error.get_or_insert(e);
                    summaries.push(excerpt(doc));
                }
            }
        }

        info!(count = summaries.len(), fallbacks, "Summaries ready");
        let warning = (fallbacks > 0).then(|| {
            let cause = first_error
                .map(|e| format!(": {}", e))
                .unwrap_or_else(|| ": empty response".to_string());
            StageError::degraded(format!(
                "{} of {} summaries fell back to excerpts{}",
                fallbacks,
                summaries.len(),
                cause
            ))
        });
        Ok(SummarizeOutput { summaries, warning })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Capability;
    use crate::stage::StageOutput;
    use crate::testing::{sample_documents, ScriptedGenerator};

    #[tokio::test]
    async fn test_one_summary_per_document_in_order() {
        let generator = ScriptedGenerator::new(|req| {
            let title = req.user.lines().next().unwrap_or_default().to_string();
            Ok(format!("Summary of {}", title.trim_start_matches("Title: ")))
        });
        let stage = SummarizeStage::new(Arc::new(generator), 100, 200);
        let mut output = stage
            .run(DocumentsInput {
                documents: sample_documents(),
            })
            .await
            .unwrap();

        let expected: Vec<String> = sample_documents()
            .iter()
            .map(|d| format!("Summary of {}", d.title))
            .collect();
        assert_eq!(output.summaries, expected);
        assert!(output.take_warning().is_none());
    }

    #[tokio::test]
    async fn test_failed_calls_fall_back_to_excerpts() {
        let generator = ScriptedGenerator::new(|req| {
            if req.user.contains("volatility") {
                Err(CollaboratorError::rejected(Capability::Generation, "quota exceeded"))
            } else {
                Ok("fine".to_string())
            }
        });
        let stage = SummarizeStage::new(Arc::new(generator), 100, 200);
        let mut output = stage
            .run(DocumentsInput {
                documents: sample_documents(),
            })
            .await
            .unwrap();

        assert_eq!(output.summaries.len(), 3);
        assert_eq!(output.summaries[0], "fine");
        assert_eq!(output.summaries[1], excerpt(&sample_documents()[1]));
        let warning = output.take_warning().unwrap().to_string();
        assert!(warning.contains("1 of 3"));
        assert!(warning.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_summaries_stay_in_order_under_concurrency() {
        let documents: Vec<Document> = (0..9)
            .map(|i| Document::new(format!("Paper {}", i), format!("Body {}", i), "arxiv"))
            .collect();
        let generator = ScriptedGenerator::new(|req| {
            Ok(req.user.lines().next().unwrap_or_default().replace("Title: ", ""))
        });
        let stage = SummarizeStage::new(Arc::new(generator), 100, 200);

        fn assert_send<T: Send>(value: T) -> T {
            value
        }
        let output = assert_send(stage.run(DocumentsInput { documents })).await.unwrap();

        let expected: Vec<String> = (0..9).map(|i| format!("Paper {}", i)).collect();
        assert_eq!(output.summaries, expected);
    }

    #[tokio::test]
    async fn test_no_documents_no_calls() {
        let generator = Arc::new(ScriptedGenerator::replying("unused"));
        let stage = SummarizeStage::new(generator.clone(), 100, 200);
        let output = stage.run(DocumentsInput { documents: vec![] }).await.unwrap();
        assert!(output.summaries.is_empty());
        assert_eq!(generator.calls(), 0);
    }
}
