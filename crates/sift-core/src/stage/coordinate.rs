use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

use super::{CoordinateOutput, StageUnit};
use crate::capability::{GenerationRequest, Generator};
use crate::error::StageError;
use crate::model::{Report, ResearchState, StageName};

/// Key of the refinement suggestion every report carries.
pub const QUERY_REFINEMENT: &str = "query_refinement";

const REFINEMENT_HINT: &str = "Use more specific keywords based on current results";

const SYSTEM_PROMPT: &str = "You coordinate a research workflow. Given the research question \
and the analysis so far, list the next research steps, one per line.";

/// Bullet lines from a generator response, markers stripped.
pub fn parse_next_steps(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_whitespace())
                .trim_end()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Next steps derived from the state without a generator.
pub fn default_next_steps(state: &ResearchState) -> Vec<String> {
    let count = state.documents().len();
    if count == 0 {
        vec![
            format!(
                "Broaden the query or try alternative keywords for \"{}\"",
                state.query()
            ),
            "Check that the document search service is reachable".to_string(),
        ]
    } else {
        vec![
            format!("Review the {} retrieved documents in detail", count),
            "Validate the key findings against additional sources".to_string(),
            "Narrow the query around the most relevant findings".to_string(),
        ]
    }
}

fn refinements() -> BTreeMap<String, String> {
    BTreeMap::from([(QUERY_REFINEMENT.to_string(), REFINEMENT_HINT.to_string())])
}

/// Stage errors as report lines, in stage order, plus `extra` if given.
fn warning_lines(state: &ResearchState, extra: Option<(StageName, &StageError)>) -> Vec<String> {
    state
        .stage_errors()
        .iter()
        .map(|(stage, err)| (*stage, err))
        .chain(extra)
        .map(|(stage, err)| format!("{}: {}", stage, err))
        .collect()
}

pub(super) fn deterministic_report(
    state: &ResearchState,
    extra: Option<(StageName, &StageError)>,
) -> Report {
    Report {
        next_steps: default_next_steps(state),
        refinements: refinements(),
        warnings: warning_lines(state, extra),
    }
}

/// Validates the finished state and writes the final report.
pub struct CoordinateStage {
    generator: Arc<dyn Generator>,
    max_tokens: u32,
}

impl CoordinateStage {
    pub fn new(generator: Arc<dyn Generator>, max_tokens: u32) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }

    fn prompt(state: &ResearchState) -> String {
        let mut prompt = format!(
            "Research question: {}\nDocuments retrieved: {}\n",
            state.query(),
            state.documents().len()
        );
        if let Some(analysis) = state.analysis() {
            let _ = writeln!(prompt, "Analysis: {}", analysis.summary);
        }
        for doc in state.documents().iter().take(5) {
            let _ = writeln!(prompt, "- {}", doc.display_title());
        }
        prompt
    }
}

#[async_trait]
impl StageUnit for CoordinateStage {
    type Input = ResearchState;
    type Output = CoordinateOutput;

    async fn run(&self, state: ResearchState) -> Result<CoordinateOutput, StageError> {
        let missing = state.missing_fields();
        if !missing.is_empty() {
            return Err(StageError::structural(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let request = GenerationRequest::new(SYSTEM_PROMPT, Self::prompt(&state))
            .max_tokens(self.max_tokens);
        let (next_steps, warning) = match self.generator.generate(request).await {
            Ok(text) => {
                let steps = parse_next_steps(&text);
                if steps.is_empty() {
                    (
                        default_next_steps(&state),
                        Some(StageError::degraded("generator returned no next steps")),
                    )
                } else {
                    (steps, None)
                }
            }
            Err(e) => {
                warn!(error = %e, "Next-step generation failed, using defaults");
                (
                    default_next_steps(&state),
                    Some(StageError::degraded(format!("next steps generated locally: {}", e))),
                )
            }
        };

        let report = Report {
            next_steps,
            refinements: refinements(),
            warnings: warning_lines(&state, warning.as_ref().map(|w| (StageName::Coordinate, w))),
        };
        info!(
            steps = report.next_steps.len(),
            warnings = report.warnings.len(),
            "Report ready"
        );
        Ok(CoordinateOutput { report, warning })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Analysis, Document};
    use crate::testing::ScriptedGenerator;

    fn complete_state() -> ResearchState {
        let mut state = ResearchState::new("battery recycling");
        state.replace_documents(vec![Document::new("Paper", "Lithium recovery rates.", "arxiv")]);
        state.set_analysis(Analysis::new("Recovery is improving."));
        state.set_visualizations(BTreeMap::new());
        state
    }

    #[test]
    fn test_parse_next_steps() {
        let steps = parse_next_steps("- Survey suppliers\n* Compare costs\n\n  -   \n• Interview experts\n");
        assert_eq!(steps, vec!["Survey suppliers", "Compare costs", "Interview experts"]);
    }

    #[tokio::test]
    async fn test_missing_fields_are_structural() {
        let stage = CoordinateStage::new(Arc::new(ScriptedGenerator::replying("- x")), 100);
        let err = stage.run(ResearchState::new("q")).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("documents, analysis, visualizations"));
    }

    #[tokio::test]
    async fn test_report_from_generator() {
        let stage = CoordinateStage::new(
            Arc::new(ScriptedGenerator::replying("- Survey suppliers\n- Compare costs")),
            100,
        );
        let mut state = complete_state();
        state.record_error(StageName::Visualize, StageError::failed("renderer down"));

        let output = stage.run(state).await.unwrap();
        assert_eq!(output.report.next_steps, vec!["Survey suppliers", "Compare costs"]);
        assert_eq!(output.report.refinements[QUERY_REFINEMENT], REFINEMENT_HINT);
        assert_eq!(
            output.report.warnings,
            vec!["visualize: Stage failed: renderer down"]
        );
        assert!(output.warning.is_none());
    }

    #[tokio::test]
    async fn test_generator_failure_uses_default_steps() {
        let stage = CoordinateStage::new(Arc::new(ScriptedGenerator::failing()), 100);
        let output = stage.run(complete_state()).await.unwrap();
        assert_eq!(
            output.report.next_steps[0],
            "Review the 1 retrieved documents in detail"
        );
        assert!(output.warning.is_some());
        assert_eq!(output.report.warnings.len(), 1);
        assert!(output.report.warnings[0].starts_with("coordinate: "));
    }
}
