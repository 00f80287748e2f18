//! Stage units and the typed seams between them and the engine.
//!
//! A unit never sees the whole [`ResearchState`] unless its input type asks
//! for it: the engine extracts a [`StageInput`] snapshot, runs the unit and
//! merges the returned [`StageOutput`] by field replacement.

mod analyze;
mod coordinate;
mod retrieve;
mod search;
mod summarize;
mod visualize;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::StageError;
use crate::model::{Analysis, ChartArtifact, Document, Report, ResearchState, StageName};
use crate::tokens::truncate_chars;

pub use analyze::AnalyzeStage;
pub use coordinate::{default_next_steps, parse_next_steps, CoordinateStage, QUERY_REFINEMENT};
pub use retrieve::RetrieveStage;
pub use search::SearchStage;
pub use summarize::SummarizeStage;
pub use visualize::{chart_data, VisualizeStage};

/// Snapshot of the state fields a unit declares as inputs.
pub trait StageInput: Sized + Send + 'static {
    fn read(state: &ResearchState) -> Self;
}

/// Partial update for the fields a stage owns.
pub trait StageOutput: Sized + Send + 'static {
    const STAGE: StageName;

    /// Write the owned fields into `state`.
    fn apply(self, state: &mut ResearchState);

    /// Safe default used when the unit fails.
    fn fallback(state: &ResearchState, error: &StageError) -> Self;

    /// A non-fatal problem that reduced this output.
    fn take_warning(&mut self) -> Option<StageError> {
        None
    }
}

/// One pipeline stage.
#[async_trait]
pub trait StageUnit: Send + Sync {
    type Input: StageInput;
    type Output: StageOutput;

    async fn run(&self, input: Self::Input) -> Result<Self::Output, StageError>;
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct QueryInput {
    pub query: String,
}

impl StageInput for QueryInput {
    fn read(state: &ResearchState) -> Self {
        Self {
            query: state.query().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveInput {
    pub query: String,
    pub documents: Vec<Document>,
}

impl StageInput for RetrieveInput {
    fn read(state: &ResearchState) -> Self {
        Self {
            query: state.query().to_string(),
            documents: state.documents().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentsInput {
    pub documents: Vec<Document>,
}

impl StageInput for DocumentsInput {
    fn read(state: &ResearchState) -> Self {
        Self {
            documents: state.documents().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeInput {
    pub query: String,
    pub documents: Vec<Document>,
    pub summaries: Vec<String>,
}

impl StageInput for AnalyzeInput {
    fn read(state: &ResearchState) -> Self {
        Self {
            query: state.query().to_string(),
            documents: state.documents().to_vec(),
            summaries: state.summaries().to_vec(),
        }
    }
}

/// Coordinate reads everything.
impl StageInput for ResearchState {
    fn read(state: &ResearchState) -> Self {
        state.clone()
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchOutput {
    pub documents: Vec<Document>,
}

impl StageOutput for SearchOutput {
    const STAGE: StageName = StageName::Search;

    fn apply(self, state: &mut ResearchState) {
        state.replace_documents(self.documents);
    }

    fn fallback(_state: &ResearchState, _error: &StageError) -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrieveOutput {
    pub documents: Vec<Document>,
    pub warning: Option<StageError>,
}

impl StageOutput for RetrieveOutput {
    const STAGE: StageName = StageName::Retrieve;

    fn apply(self, state: &mut ResearchState) {
        state.replace_documents(self.documents);
    }

    /// The seeds, unchanged.
    fn fallback(state: &ResearchState, _error: &StageError) -> Self {
        Self {
            documents: state.documents().to_vec(),
            warning: None,
        }
    }

    fn take_warning(&mut self) -> Option<StageError> {
        self.warning.take()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummarizeOutput {
    pub summaries: Vec<String>,
    pub warning: Option<StageError>,
}

impl StageOutput for SummarizeOutput {
    const STAGE: StageName = StageName::Summarize;

    fn apply(self, state: &mut ResearchState) {
        state.set_summaries(self.summaries);
    }

    /// One extractive excerpt per document.
    fn fallback(state: &ResearchState, _error: &StageError) -> Self {
        Self {
            summaries: state.documents().iter().map(excerpt).collect(),
            warning: None,
        }
    }

    fn take_warning(&mut self) -> Option<StageError> {
        self.warning.take()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeOutput {
    pub analysis: Analysis,
}

impl StageOutput for AnalyzeOutput {
    const STAGE: StageName = StageName::Analyze;

    fn apply(self, state: &mut ResearchState) {
        state.set_analysis(self.analysis);
    }

    fn fallback(_state: &ResearchState, error: &StageError) -> Self {
        Self {
            analysis: Analysis::new(format!("Analysis unavailable: {}", error))
                .with_warning(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisualizeOutput {
    pub visualizations: BTreeMap<String, ChartArtifact>,
}

impl StageOutput for VisualizeOutput {
    const STAGE: StageName = StageName::Visualize;

    fn apply(self, state: &mut ResearchState) {
        state.set_visualizations(self.visualizations);
    }

    fn fallback(_state: &ResearchState, _error: &StageError) -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateOutput {
    pub report: Report,
    pub warning: Option<StageError>,
}

impl StageOutput for CoordinateOutput {
    const STAGE: StageName = StageName::Coordinate;

    fn apply(self, state: &mut ResearchState) {
        state.set_report(self.report);
    }

    /// Deterministic report built from the state alone.
    fn fallback(state: &ResearchState, error: &StageError) -> Self {
        Self {
            report: coordinate::deterministic_report(state, Some((StageName::Coordinate, error))),
            warning: None,
        }
    }

    fn take_warning(&mut self) -> Option<StageError> {
        self.warning.take()
    }
}

const EXCERPT_CHARS: usize = 280;

/// Leading slice of a document's content, or its title when the content is
/// blank.
pub fn excerpt(document: &Document) -> String {
    let content = document.content.trim();
    if content.is_empty() {
        return document.display_title().to_string();
    }
    let cut = truncate_chars(content, EXCERPT_CHARS);
    if cut.len() < content.len() {
        format!("{}...", cut.trim_end())
    } else {
        cut
    }
}
