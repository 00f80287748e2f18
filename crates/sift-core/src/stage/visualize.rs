use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{DocumentsInput, StageUnit, VisualizeOutput};
use crate::capability::ChartRenderer;
use crate::error::StageError;
use crate::model::{ChartData, ChartKind, ChartPoint, Document};
use crate::tokens::truncate_chars;

const LABEL_CHARS: usize = 30;

/// Chart label: the title, cut to 30 characters with an ellipsis.
fn label(document: &Document) -> String {
    let title = document.display_title();
    let cut = truncate_chars(title, LABEL_CHARS);
    if cut.len() < title.len() {
        format!("{}...", cut)
    } else {
        cut
    }
}

/// Chart data for a document list; empty for fewer than two documents.
pub fn chart_data(documents: &[Document]) -> Vec<ChartData> {
    if documents.len() < 2 {
        return Vec::new();
    }
    vec![
        ChartData {
            name: "relevance_scores".to_string(),
            title: "Document Relevance Scores".to_string(),
            kind: ChartKind::Bar,
            x_label: "Document".to_string(),
            y_label: "Relevance".to_string(),
            points: documents
                .iter()
                .enumerate()
                .map(|(i, doc)| ChartPoint {
                    label: label(doc),
                    x: i as f64,
                    y: doc.relevance_score(),
                })
                .collect(),
        },
        ChartData {
            name: "quality_vs_relevance".to_string(),
            title: "Quality vs Relevance".to_string(),
            kind: ChartKind::Scatter,
            x_label: "Relevance".to_string(),
            y_label: "Quality".to_string(),
            points: documents
                .iter()
                .map(|doc| ChartPoint {
                    label: label(doc),
                    x: doc.relevance_score(),
                    y: doc.quality_score(),
                })
                .collect(),
        },
    ]
}

pub struct VisualizeStage {
    renderer: Arc<dyn ChartRenderer>,
}

impl VisualizeStage {
    pub fn new(renderer: Arc<dyn ChartRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl StageUnit for VisualizeStage {
    type Input = DocumentsInput;
    type Output = VisualizeOutput;

    async fn run(&self, input: DocumentsInput) -> Result<VisualizeOutput, StageError> {
        let charts = chart_data(&input.documents);
        if charts.is_empty() {
            debug!(count = input.documents.len(), "Too few documents to chart");
            return Ok(VisualizeOutput::default());
        }
        let visualizations = self.renderer.render(&charts).await?;
        info!(count = visualizations.len(), "Charts rendered");
        Ok(VisualizeOutput { visualizations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_documents, StaticRenderer};

    #[test]
    fn test_labels_are_truncated() {
        let doc = Document::new("A very long title that keeps going on", "c", "s");
        assert_eq!(label(&doc), "A very long title that keeps g...");
        assert_eq!(label(&Document::new("Short", "c", "s")), "Short");
    }

    #[test]
    fn test_chart_data_shapes() {
        let docs: Vec<Document> = sample_documents()
            .into_iter()
            .enumerate()
            .map(|(i, d)| d.with_relevance(0.2 * i as f64))
            .collect();
        let charts = chart_data(&docs);
        assert_eq!(charts.len(), 2);
        assert_eq!(charts[0].kind, ChartKind::Bar);
        assert_eq!(charts[0].points.len(), 3);
        assert!((charts[0].points[2].y - 0.4).abs() < 1e-9);
        assert_eq!(charts[1].points[1].y, 0.7);
        assert!(chart_data(&docs[..1]).is_empty());
    }

    #[tokio::test]
    async fn test_renders_both_charts() {
        let stage = VisualizeStage::new(Arc::new(StaticRenderer::default()));
        let output = stage
            .run(DocumentsInput {
                documents: sample_documents(),
            })
            .await
            .unwrap();
        let names: Vec<&str> = output.visualizations.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["quality_vs_relevance", "relevance_scores"]);
    }

    #[tokio::test]
    async fn test_single_document_skips_renderer() {
        let stage = VisualizeStage::new(Arc::new(StaticRenderer::failing()));
        let output = stage
            .run(DocumentsInput {
                documents: sample_documents().into_iter().take(1).collect(),
            })
            .await
            .unwrap();
        assert!(output.visualizations.is_empty());
    }
}
