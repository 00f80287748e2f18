//! Orchestration engine.
//!
//! Runs the six stages in a fixed order over one [`ResearchState`]. A stage
//! that fails (or panics) is recorded in `stage_errors` and replaced by its
//! default output; only a structural violation ends the run early.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::capability::{
    ChartRenderer, ConstantQuality, DocumentSearch, Embedder, Generator, QualityScorer,
    SimilarityIndex,
};
use crate::config::{PipelineConfig, SiftConfig};
use crate::error::{SiftError, SiftResult, StageError};
use crate::fusion::{FusionSettings, RetrievalFusion};
use crate::model::{ResearchState, StageName};
use crate::stage::{
    AnalyzeInput, AnalyzeOutput, AnalyzeStage, CoordinateOutput, CoordinateStage, DocumentsInput,
    QueryInput, RetrieveInput, RetrieveOutput, RetrieveStage, SearchOutput, SearchStage,
    StageInput, StageOutput, StageUnit, SummarizeOutput, SummarizeStage, VisualizeOutput,
    VisualizeStage,
};

type Unit<I, O> = Box<dyn StageUnit<Input = I, Output = O>>;

/// External capabilities the default stages are built from.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<dyn DocumentSearch>,
    pub index: Arc<dyn SimilarityIndex>,
    pub renderer: Arc<dyn ChartRenderer>,
    pub quality: Arc<dyn QualityScorer>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn DocumentSearch>,
        index: Arc<dyn SimilarityIndex>,
        renderer: Arc<dyn ChartRenderer>,
    ) -> Self {
        Self {
            generator,
            embedder,
            search,
            index,
            renderer,
            quality: Arc::new(ConstantQuality::default()),
        }
    }

    pub fn with_quality(mut self, quality: Arc<dyn QualityScorer>) -> Self {
        self.quality = quality;
        self
    }
}

/// Tunables for the default stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub max_results: usize,
    pub fusion: FusionSettings,
    pub budgets: PipelineConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&SiftConfig::default())
    }
}

impl From<&SiftConfig> for PipelineSettings {
    fn from(config: &SiftConfig) -> Self {
        Self {
            max_results: config.search.max_results,
            fusion: config.fusion.clone(),
            budgets: config.pipeline.clone(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Complete,
    /// All stages ran, at least one error was recorded.
    Degraded,
    /// Stopped between stages by the caller.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Degraded => "degraded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ResearchState,
    pub status: RunStatus,
}

pub struct Orchestrator {
    search: Unit<QueryInput, SearchOutput>,
    retrieve: Unit<RetrieveInput, RetrieveOutput>,
    summarize: Unit<DocumentsInput, SummarizeOutput>,
    analyze: Unit<AnalyzeInput, AnalyzeOutput>,
    visualize: Unit<DocumentsInput, VisualizeOutput>,
    coordinate: Unit<ResearchState, CoordinateOutput>,
}

impl Orchestrator {
    /// Build the default pipeline.
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let budgets = &settings.budgets;
        let fusion = RetrievalFusion::new(collaborators.index.clone(), settings.fusion.clone())
            .with_generator(collaborators.generator.clone());

        Self {
            search: Box::new(SearchStage::new(
                collaborators.search.clone(),
                collaborators.embedder.clone(),
                collaborators.quality.clone(),
                settings.max_results,
            )),
            retrieve: Box::new(RetrieveStage::new(Arc::new(fusion))),
            summarize: Box::new(SummarizeStage::new(
                collaborators.generator.clone(),
                budgets.content_token_budget,
                budgets.summary_max_tokens,
            )),
            analyze: Box::new(AnalyzeStage::new(
                collaborators.generator.clone(),
                budgets.analysis_documents,
                budgets.content_token_budget,
                budgets.analysis_max_tokens,
            )),
            visualize: Box::new(VisualizeStage::new(collaborators.renderer.clone())),
            coordinate: Box::new(CoordinateStage::new(
                collaborators.generator,
                budgets.coordinate_max_tokens,
            )),
        }
    }

    pub fn with_search_stage<U>(mut self, unit: U) -> Self
    where
        U: StageUnit<Input = QueryInput, Output = SearchOutput> + 'static,
    {
        self.search = Box::new(unit);
        self
    }

    pub fn with_retrieve_stage<U>(mut self, unit: U) -> Self
    where
        U: StageUnit<Input = RetrieveInput, Output = RetrieveOutput> + 'static,
    {
        self.retrieve = Box::new(unit);
        self
    }

    pub fn with_summarize_stage<U>(mut self, unit: U) -> Self
    where
        U: StageUnit<Input = DocumentsInput, Output = SummarizeOutput> + 'static,
    {
        self.summarize = Box::new(unit);
        self
    }

    pub fn with_analyze_stage<U>(mut self, unit: U) -> Self
    where
        U: StageUnit<Input = AnalyzeInput, Output = AnalyzeOutput> + 'static,
    {
        self.analyze = Box::new(unit);
        self
    }

    pub fn with_visualize_stage<U>(mut self, unit: U) -> Self
    where
        U: StageUnit<Input = DocumentsInput, Output = VisualizeOutput> + 'static,
    {
        self.visualize = Box::new(unit);
        self
    }

    pub fn with_coordinate_stage<U>(mut self, unit: U) -> Self
    where
        U: StageUnit<Input = ResearchState, Output = CoordinateOutput> + 'static,
    {
        self.coordinate = Box::new(unit);
        self
    }

    /// Run the pipeline and return the final state.
    pub async fn run_research(&self, query: &str) -> SiftResult<ResearchState> {
        self.run(query).await.map(|outcome| outcome.state)
    }

    pub async fn run(&self, query: &str) -> SiftResult<RunOutcome> {
        self.run_with_cancel(query, CancellationToken::new()).await
    }

    /// Run the pipeline, checking `cancel` before each stage.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> SiftResult<RunOutcome> {
        let mut state = ResearchState::new(query);
        let span = info_span!("research", run_id = %state.run_id());
        let status = self
            .run_stages(&mut state, &cancel)
            .instrument(span)
            .await?;
        Ok(RunOutcome { state, status })
    }

    async fn run_stages(
        &self,
        state: &mut ResearchState,
        cancel: &CancellationToken,
    ) -> SiftResult<RunStatus> {
        info!(query = state.query(), "Research run started");

        if cancel.is_cancelled() {
            return Ok(cancelled(StageName::Search));
        }
        execute(self.search.as_ref(), state).await?;

        if cancel.is_cancelled() {
            return Ok(cancelled(StageName::Retrieve));
        }
        execute(self.retrieve.as_ref(), state).await?;

        if cancel.is_cancelled() {
            return Ok(cancelled(StageName::Summarize));
        }
        execute(self.summarize.as_ref(), state).await?;

        if cancel.is_cancelled() {
            return Ok(cancelled(StageName::Analyze));
        }
        execute(self.analyze.as_ref(), state).await?;

        if cancel.is_cancelled() {
            return Ok(cancelled(StageName::Visualize));
        }
        execute(self.visualize.as_ref(), state).await?;

        if cancel.is_cancelled() {
            return Ok(cancelled(StageName::Coordinate));
        }
        execute(self.coordinate.as_ref(), state).await?;

        let status = if state.stage_errors().is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Degraded
        };
        info!(
            status = %status,
            documents = state.documents().len(),
            errors = state.stage_errors().len(),
            "Research run finished"
        );
        Ok(status)
    }
}

fn cancelled(next: StageName) -> RunStatus {
    info!(next_stage = %next, "Research run cancelled");
    RunStatus::Cancelled
}

/// Run one unit against the state and merge its output or its default.
async fn execute<I, O>(
    unit: &dyn StageUnit<Input = I, Output = O>,
    state: &mut ResearchState,
) -> SiftResult<()>
where
    I: StageInput,
    O: StageOutput,
{
    let stage = O::STAGE;
    debug!(stage = %stage, "Stage started");

    let result = match AssertUnwindSafe(unit.run(I::read(state)))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(StageError::failed(format!(
            "stage panicked: {}",
            panic_message(payload.as_ref())
        ))),
    };

    match result {
        Ok(mut output) => {
            if let Some(warning) = output.take_warning() {
                warn!(stage = %stage, warning = %warning, "Stage degraded");
                state.record_error(stage, warning);
            }
            output.apply(state);
            debug!(stage = %stage, "Stage finished");
        }
        Err(e) if e.is_fatal() => {
            error!(stage = %stage, query = state.query(), error = %e, "Research run aborted");
            return Err(SiftError::Fatal {
                query: state.query().to_string(),
                stage,
                reason: e.to_string(),
            });
        }
        Err(e) => {
            warn!(stage = %stage, error = %e, "Stage failed, using default output");
            let fallback = O::fallback(state, &e);
            state.record_error(stage, e);
            fallback.apply(state);
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Capability;
    use crate::model::Document;
    use crate::testing::{
        sample_documents, HashEmbedder, InMemoryIndex, ScriptedGenerator, StaticRenderer,
        StaticSearch,
    };
    use async_trait::async_trait;

    fn collaborators(search: StaticSearch, renderer: StaticRenderer) -> Collaborators {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        Collaborators::new(
            Arc::new(ScriptedGenerator::replying(
                "- Compare regional demand\n- Track pricing experiments",
            )),
            embedder.clone(),
            Arc::new(search),
            Arc::new(InMemoryIndex::new(embedder)),
            Arc::new(renderer),
        )
    }

    fn orchestrator(search: StaticSearch) -> Orchestrator {
        Orchestrator::new(
            collaborators(search, StaticRenderer::default()),
            PipelineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_three_results_flow_through_every_stage() {
        let outcome = orchestrator(StaticSearch::new(sample_documents()))
            .run("consumer markets")
            .await
            .unwrap();
        let state = &outcome.state;

        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(state.documents().len(), 3);
        assert_eq!(state.summaries().len(), 3);
        assert!(!state.analysis().unwrap().summary.is_empty());
        assert_eq!(state.visualizations().unwrap().len(), 2);
        let report = state.report().unwrap();
        assert_eq!(
            report.next_steps,
            vec!["Compare regional demand", "Track pricing experiments"]
        );
        assert!(state.stage_errors().is_empty());
    }

    #[tokio::test]
    async fn test_search_outage_is_contained() {
        let outcome = orchestrator(StaticSearch::failing())
            .run("consumer markets")
            .await
            .unwrap();
        let state = &outcome.state;

        assert_eq!(outcome.status, RunStatus::Degraded);
        assert!(state.documents().is_empty());
        assert!(matches!(
            state.stage_errors()[&StageName::Search],
            StageError::CollaboratorUnavailable {
                capability: Capability::DocumentSearch,
                ..
            }
        ));
        assert_eq!(state.stage_errors().len(), 1);
        let report = state.report().unwrap();
        assert!(report.warnings[0].starts_with("search: "));
        assert!(state.analysis().unwrap().summary.contains("No documents found"));
    }

    #[tokio::test]
    async fn test_empty_query_is_not_fatal() {
        let state = orchestrator(StaticSearch::new(sample_documents()))
            .run_research("")
            .await
            .unwrap();

        assert!(state.documents().is_empty());
        assert!(state.has_documents_field());
        assert!(state.analysis().unwrap().summary.contains("No documents found"));
        assert!(matches!(
            state.stage_errors()[&StageName::Search],
            StageError::MalformedInput { .. }
        ));
        assert!(state.visualizations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_stage_gets_exactly_one_error_entry() {
        let orchestrator = Orchestrator::new(
            collaborators(StaticSearch::new(sample_documents()), StaticRenderer::failing()),
            PipelineSettings::default(),
        );
        let state = orchestrator.run_research("consumer markets").await.unwrap();

        assert!(state.missing_fields().is_empty());
        assert!(state.report().is_some());
        assert_eq!(state.stage_errors().len(), 1);
        assert!(state.stage_errors().contains_key(&StageName::Visualize));
        assert!(state.visualizations().unwrap().is_empty());
    }

    struct PanickingSummarizer;

    #[async_trait]
    impl StageUnit for PanickingSummarizer {
        type Input = DocumentsInput;
        type Output = SummarizeOutput;

        async fn run(&self, _input: DocumentsInput) -> Result<SummarizeOutput, StageError> {
            panic!("summarizer blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_stage_is_contained() {
        let outcome = orchestrator(StaticSearch::new(sample_documents()))
            .with_summarize_stage(PanickingSummarizer)
            .run("consumer markets")
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Degraded);
        let err = &outcome.state.stage_errors()[&StageName::Summarize];
        assert!(err.to_string().contains("summarizer blew up"));
        assert_eq!(outcome.state.summaries().len(), 3);
        assert!(outcome.state.report().is_some());
    }

    struct StructurallyBrokenAnalysis;

    #[async_trait]
    impl StageUnit for StructurallyBrokenAnalysis {
        type Input = AnalyzeInput;
        type Output = AnalyzeOutput;

        async fn run(&self, _input: AnalyzeInput) -> Result<AnalyzeOutput, StageError> {
            Err(StageError::structural("analysis schema mismatch"))
        }
    }

    #[tokio::test]
    async fn test_structural_violation_aborts_run() {
        let err = orchestrator(StaticSearch::new(sample_documents()))
            .with_analyze_stage(StructurallyBrokenAnalysis)
            .run_research("consumer markets")
            .await
            .unwrap_err();

        match err {
            SiftError::Fatal { query, stage, reason } => {
                assert_eq!(query, "consumer markets");
                assert_eq!(stage, StageName::Analyze);
                assert!(reason.contains("analysis schema mismatch"));
            }
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    struct CancellingSearch(CancellationToken);

    #[async_trait]
    impl StageUnit for CancellingSearch {
        type Input = QueryInput;
        type Output = SearchOutput;

        async fn run(&self, _input: QueryInput) -> Result<SearchOutput, StageError> {
            self.0.cancel();
            Ok(SearchOutput {
                documents: vec![Document::new("Only", "Single result.", "arxiv")],
            })
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_state() {
        let token = CancellationToken::new();
        let outcome = orchestrator(StaticSearch::new(sample_documents()))
            .with_search_stage(CancellingSearch(token.clone()))
            .run_with_cancel("consumer markets", token)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.state.documents().len(), 1);
        assert!(!outcome.state.has_summaries_field());
        assert!(outcome.state.report().is_none());
    }

    #[tokio::test]
    async fn test_identical_inputs_give_identical_results() {
        let a = orchestrator(StaticSearch::new(sample_documents()))
            .run_research("retail demand")
            .await
            .unwrap();
        let b = orchestrator(StaticSearch::new(sample_documents()))
            .run_research("retail demand")
            .await
            .unwrap();

        assert_eq!(a.documents(), b.documents());
        assert_eq!(a.summaries(), b.summaries());
        assert_eq!(a.report(), b.report());
    }
}
