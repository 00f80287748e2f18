//! The research state threaded through one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{ChartArtifact, Document, StageName};
use crate::dedup::dedup_documents;
use crate::error::StageError;

/// Analyst output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Analysis {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Final coordinator output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Report {
    pub next_steps: Vec<String>,
    pub refinements: BTreeMap<String, String>,
    /// One line per recorded stage error, in stage order.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Mutable record owned by the engine for one run.
///
/// Stage-owned fields are `None` until their stage has been applied; `Some`
/// of an empty collection is a legitimate result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    query: String,
    documents: Option<Vec<Document>>,
    summaries: Option<Vec<String>>,
    analysis: Option<Analysis>,
    visualizations: Option<BTreeMap<String, ChartArtifact>>,
    report: Option<Report>,
    stage_errors: BTreeMap<StageName, StageError>,
}

impl ResearchState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            query: query.into(),
            documents: None,
            summaries: None,
            analysis: None,
            visualizations: None,
            report: None,
            stage_errors: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Current documents; empty when no stage has produced any yet.
    pub fn documents(&self) -> &[Document] {
        self.documents.as_deref().unwrap_or(&[])
    }

    pub fn summaries(&self) -> &[String] {
        self.summaries.as_deref().unwrap_or(&[])
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn visualizations(&self) -> Option<&BTreeMap<String, ChartArtifact>> {
        self.visualizations.as_ref()
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn stage_errors(&self) -> &BTreeMap<StageName, StageError> {
        &self.stage_errors
    }

    pub fn has_documents_field(&self) -> bool {
        self.documents.is_some()
    }

    pub fn has_summaries_field(&self) -> bool {
        self.summaries.is_some()
    }

    /// Names of the fields Coordinate requires that are structurally absent.
    ///
    /// `query` is always present; an empty query is valid input here.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.documents.is_none() {
            missing.push("documents");
        }
        if self.analysis.is_none() {
            missing.push("analysis");
        }
        if self.visualizations.is_none() {
            missing.push("visualizations");
        }
        missing
    }

    /// Replace the document list. Duplicates by normalized content are
    /// dropped, first occurrence wins.
    pub(crate) fn replace_documents(&mut self, documents: Vec<Document>) {
        self.documents = Some(dedup_documents(documents));
    }

    pub(crate) fn set_summaries(&mut self, summaries: Vec<String>) {
        self.summaries = Some(summaries);
    }

    pub(crate) fn set_analysis(&mut self, analysis: Analysis) {
        self.analysis = Some(analysis);
    }

    pub(crate) fn set_visualizations(&mut self, visualizations: BTreeMap<String, ChartArtifact>) {
        self.visualizations = Some(visualizations);
    }

    pub(crate) fn set_report(&mut self, report: Report) {
        self.report = Some(report);
    }

    /// Record a recoverable failure. Returns `false` if the stage already has
    /// an entry, which is kept.
    pub(crate) fn record_error(&mut self, stage: StageName, error: StageError) -> bool {
        if self.stage_errors.contains_key(&stage) {
            return false;
        }
        self.stage_errors.insert(stage, error);
        true
    }

    /// Serializable projection returned to outer callers.
    pub fn summary(&self) -> ResearchSummary {
        ResearchSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            query: self.query.clone(),
            documents: self
                .documents()
                .iter()
                .map(|doc| DocumentSummary {
                    title: doc.display_title().to_string(),
                    content: doc.content.clone(),
                    url: doc.url.clone(),
                    source: doc.source.clone(),
                    authors: doc.authors.iter().cloned().collect(),
                    published: doc.published,
                    relevance_score: doc.relevance_score(),
                    quality_score: doc.quality_score(),
                })
                .collect(),
            summaries: self.summaries().to_vec(),
            analysis: self.analysis.clone().unwrap_or_default(),
            visualizations: self.visualizations.clone().unwrap_or_default(),
            report: self.report.clone(),
            stage_errors: self.stage_errors.clone(),
        }
    }
}

/// Flattened document for serialized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub source: String,
    pub authors: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub relevance_score: f64,
    pub quality_score: f64,
}

/// Report projection of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub query: String,
    pub documents: Vec<DocumentSummary>,
    pub summaries: Vec<String>,
    pub analysis: Analysis,
    pub visualizations: BTreeMap<String, ChartArtifact>,
    pub report: Option<Report>,
    pub stage_errors: BTreeMap<StageName, StageError>,
}
