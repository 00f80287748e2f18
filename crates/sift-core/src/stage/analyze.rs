use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

use super::{AnalyzeInput, AnalyzeOutput, StageUnit};
use crate::capability::{GenerationRequest, Generator};
use crate::error::StageError;
use crate::model::Analysis;
use crate::tokens::truncate_to_tokens;

const SYSTEM_PROMPT: &str = "You are a market research analyst. Analyze the sources and report \
the key findings, emerging trends and open gaps. Be concise.";

/// Synthesizes the leading documents into a single analysis.
pub struct AnalyzeStage {
    generator: Arc<dyn Generator>,
    documents_considered: usize,
    content_token_budget: usize,
    max_tokens: u32,
}

impl AnalyzeStage {
    pub fn new(
        generator: Arc<dyn Generator>,
        documents_considered: usize,
        content_token_budget: usize,
        max_tokens: u32,
    ) -> Self {
        Self {
            generator,
            documents_considered: documents_considered.max(1),
            content_token_budget,
            max_tokens,
        }
    }

    fn prompt(&self, input: &AnalyzeInput) -> String {
        let mut prompt = format!("Research question: {}\n", input.query);
        for (i, doc) in input
            .documents
            .iter()
            .take(self.documents_considered)
            .enumerate()
        {
            let _ = write!(
                prompt,
                "\n[{}] {}\n{}\n",
                i + 1,
                doc.display_title(),
                truncate_to_tokens(&doc.content, self.content_token_budget)
            );
            if let Some(summary) = input.summaries.get(i) {
                let _ = writeln!(prompt, "Summary: {}", summary);
            }
        }
        prompt
    }
}

#[async_trait]
impl StageUnit for AnalyzeStage {
    type Input = AnalyzeInput;
    type Output = AnalyzeOutput;

    async fn run(&self, input: AnalyzeInput) -> Result<AnalyzeOutput, StageError> {
        if input.documents.is_empty() {
            return Ok(AnalyzeOutput {
                analysis: Analysis::new(format!(
                    "No documents found for query \"{}\"",
                    input.query
                ))
                .with_warning("no valid documents"),
            });
        }

        let request = GenerationRequest::new(SYSTEM_PROMPT, self.prompt(&input))
            .temperature(0.3)
            .max_tokens(self.max_tokens);
        let summary = self.generator.generate(request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(StageError::failed("generator returned an empty analysis"));
        }

        info!(
            documents = input.documents.len().min(self.documents_considered),
            "Analysis complete"
        );
        Ok(AnalyzeOutput {
            analysis: Analysis::new(summary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_documents, ScriptedGenerator};

    fn input(documents: Vec<crate::model::Document>) -> AnalyzeInput {
        AnalyzeInput {
            query: "consumer markets".to_string(),
            summaries: documents.iter().map(|d| format!("About {}", d.title)).collect(),
            documents,
        }
    }

    #[tokio::test]
    async fn test_empty_documents_short_circuit() {
        let generator = Arc::new(ScriptedGenerator::replying("unused"));
        let stage = AnalyzeStage::new(generator.clone(), 3, 500, 500);
        let output = stage.run(input(vec![])).await.unwrap();

        assert_eq!(
            output.analysis.summary,
            "No documents found for query \"consumer markets\""
        );
        assert_eq!(output.analysis.warnings, vec!["no valid documents"]);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_only_leading_documents_are_sent() {
        let generator = ScriptedGenerator::new(|req| {
            assert!(req.user.contains("[1] Retail demand forecasting"));
            assert!(req.user.contains("[2] Consumer sentiment"));
            assert!(!req.user.contains("[3]"));
            assert!(req.user.contains("Summary: About Retail demand"));
            assert_eq!(req.temperature, 0.3);
            Ok("  Demand is shifting online.  ".to_string())
        });
        let stage = AnalyzeStage::new(Arc::new(generator), 2, 500, 500);
        let output = stage.run(input(sample_documents())).await.unwrap();
        assert_eq!(output.analysis.summary, "Demand is shifting online.");
        assert!(output.analysis.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_is_stage_error() {
        let stage = AnalyzeStage::new(Arc::new(ScriptedGenerator::failing()), 3, 500, 500);
        let err = stage.run(input(sample_documents())).await.unwrap_err();
        assert!(matches!(err, StageError::CollaboratorUnavailable { .. }));
    }
}
