//! Research route handler.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sift_core::{ResearchSummary, SiftError};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct ResearchRequest {
    pub query: String,
}

/// A run that produced no state.
pub struct ResearchFailure {
    query: String,
    error: SiftError,
}

impl IntoResponse for ResearchFailure {
    fn into_response(self) -> Response {
        let kind = match &self.error {
            SiftError::Fatal { .. } => "fatal",
            SiftError::IndexCorruption(_) => "index_corruption",
            _ => "internal",
        };
        let body = json!({
            "error": kind,
            "message": self.error.to_string(),
            "query": self.query,
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// POST /api/research - Run the pipeline and return the report projection.
///
/// Degraded runs still answer 200; their problems are listed under
/// `stage_errors`.
pub async fn run_research(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchSummary>, ResearchFailure> {
    match state.orchestrator.run_research(&req.query).await {
        Ok(research) => Ok(Json(research.summary())),
        Err(error) => {
            tracing::error!(query = %req.query, error = %error, "Research run aborted");
            Err(ResearchFailure {
                query: req.query,
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{create_router, AppState};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use sift_core::stage::{AnalyzeInput, AnalyzeOutput, StageUnit};
    use sift_core::testing::{
        sample_documents, HashEmbedder, InMemoryIndex, ScriptedGenerator, StaticRenderer,
        StaticSearch,
    };
    use sift_core::{Collaborators, Embedder, Orchestrator, PipelineSettings, StageError};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn orchestrator(search: StaticSearch) -> Orchestrator {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        Orchestrator::new(
            Collaborators::new(
                Arc::new(ScriptedGenerator::replying("- Compare regional demand")),
                embedder.clone(),
                Arc::new(search),
                Arc::new(InMemoryIndex::new(embedder)),
                Arc::new(StaticRenderer::default()),
            ),
            PipelineSettings::default(),
        )
    }

    struct BrokenAnalysis;

    #[async_trait]
    impl StageUnit for BrokenAnalysis {
        type Input = AnalyzeInput;
        type Output = AnalyzeOutput;

        async fn run(&self, _input: AnalyzeInput) -> Result<AnalyzeOutput, StageError> {
            Err(StageError::structural("analysis produced no summary"))
        }
    }

    async fn post(orchestrator: Orchestrator, body: &str) -> (StatusCode, Value) {
        let app = create_router(AppState::new(orchestrator));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/research")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_research_returns_summary() {
        let (status, body) = post(
            orchestrator(StaticSearch::new(sample_documents())),
            r#"{"query": "consumer markets"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "consumer markets");
        assert_eq!(body["documents"].as_array().unwrap().len(), 3);
        assert_eq!(body["summaries"].as_array().unwrap().len(), 3);
        assert!(body["stage_errors"].as_object().unwrap().is_empty());
        assert_eq!(body["report"]["next_steps"][0], "Compare regional demand");
    }

    #[tokio::test]
    async fn test_degraded_run_is_still_ok() {
        let (status, body) = post(
            orchestrator(StaticSearch::failing()),
            r#"{"query": "consumer markets"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["documents"].as_array().unwrap().is_empty());
        assert!(body["stage_errors"].get("search").is_some());
    }

    #[tokio::test]
    async fn test_fatal_run_is_500_with_query() {
        let orchestrator =
            orchestrator(StaticSearch::new(sample_documents())).with_analyze_stage(BrokenAnalysis);
        let (status, body) = post(orchestrator, r#"{"query": "consumer markets"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "fatal");
        assert_eq!(body["query"], "consumer markets");
        assert!(body["message"].as_str().unwrap().contains("analyze"));
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let app = create_router(AppState::new(orchestrator(StaticSearch::failing())));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["endpoints"].get("POST /api/research").is_some());
    }
}
