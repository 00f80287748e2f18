//! Terminal and file output for research reports.

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use sift_core::{ResearchSummary, RunStatus};
use unicode_width::UnicodeWidthStr;

const MARKDOWN_TEMPLATE: &str = r#"# Research: {{ query }}

_Run {{ run_id }} started {{ started_at }}_

## Analysis

{{ analysis.summary }}
{% for warning in analysis.warnings %}
> {{ warning }}
{% endfor %}
## Documents
{% if documents | length == 0 %}
No documents found.
{% endif %}
{%- for doc in documents %}
### {{ loop.index }}. {{ doc.title }}

- Source: {{ doc.source }}{% if doc.url %} ({{ doc.url }}){% endif %}
{%- if doc.authors | length > 0 %}
- Authors: {{ doc.authors | join(sep=", ") }}
{%- endif %}
- Relevance: {{ doc.relevance_score | round(precision=3) }}, quality: {{ doc.quality_score | round(precision=3) }}

{{ summaries[loop.index0] | default(value=doc.content) }}
{% endfor %}
{%- if visualizations | length > 0 %}
## Charts
{% for name, chart in visualizations %}
![{{ name }}](data:{{ chart.media_type }};base64,{{ chart.bytes }})
{% endfor %}
{%- endif %}
{%- if report %}
## Next steps
{% for step in report.next_steps %}
{{ loop.index }}. {{ step }}
{%- endfor %}
{% for key, hint in report.refinements %}
- **{{ key }}**: {{ hint }}
{%- endfor %}
{% if report.warnings | length > 0 %}
## Warnings
{% for warning in report.warnings %}
- {{ warning }}
{%- endfor %}
{% endif %}
{%- endif %}
"#;

/// Render a summary as Markdown.
pub fn render_markdown(summary: &ResearchSummary) -> Result<String> {
    let context =
        tera::Context::from_serialize(summary).context("Failed to build template context")?;
    tera::Tera::one_off(MARKDOWN_TEMPLATE, &context, false).context("Failed to render report")
}

/// Render a summary as pretty JSON.
pub fn render_json(summary: &ResearchSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("Failed to serialize report")
}

fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Complete => "complete".green(),
        RunStatus::Degraded => "degraded".yellow(),
        RunStatus::Cancelled => "cancelled".red(),
    }
}

/// Render a summary for the terminal.
pub fn render_text(summary: &ResearchSummary, status: RunStatus) -> String {
    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };

    line(format!(
        "{} {}  {}",
        "Research".cyan().bold(),
        summary.query.bold(),
        format!("[{}]", status_label(status)).dimmed()
    ));
    line(String::new());

    line(format!("{}", "Analysis".bold()));
    line(summary.analysis.summary.clone());
    for warning in &summary.analysis.warnings {
        line(format!("  {} {}", "!".yellow(), warning));
    }
    line(String::new());

    line(format!("{} ({})", "Documents".bold(), summary.documents.len()));
    if summary.documents.is_empty() {
        line(format!("{}", "No documents found.".dimmed()));
    } else {
        line(format!("{:<4} {:<52} {:>9} {:>7}", "#", "Title", "Relevance", "Quality"));
        line("─".repeat(75));
        for (i, doc) in summary.documents.iter().enumerate() {
            line(format!(
                "{:<4} {} {:>9.3} {:>7.3}",
                i + 1,
                pad(&truncate(&doc.title, 50), 52),
                doc.relevance_score,
                doc.quality_score
            ));
        }
    }

    if !summary.summaries.is_empty() {
        line(String::new());
        line(format!("{}", "Summaries".bold()));
        for (i, text) in summary.summaries.iter().enumerate() {
            line(format!("  {}. {}", i + 1, text));
        }
    }

    if !summary.visualizations.is_empty() {
        line(String::new());
        let names: Vec<&str> = summary.visualizations.keys().map(String::as_str).collect();
        line(format!("{}: {}", "Charts".bold(), names.join(", ")));
    }

    if let Some(report) = &summary.report {
        line(String::new());
        line(format!("{}", "Next steps".bold()));
        for step in &report.next_steps {
            line(format!("  {} {}", "→".cyan(), step));
        }
        for (key, hint) in &report.refinements {
            line(format!("  {} {}", format!("{}:", key).dimmed(), hint));
        }
        if !report.warnings.is_empty() {
            line(String::new());
            line(format!("{}", "Warnings".yellow().bold()));
            for warning in &report.warnings {
                line(format!("  {}", warning));
            }
        }
    }

    out
}

/// Truncate to `max` display columns, adding an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for c in s.chars() {
        if out.width() + 2 > max {
            break;
        }
        out.push(c);
    }
    out.push('…');
    out
}

/// Right-pad to `width` display columns.
fn pad(s: &str, width: usize) -> String {
    let fill = width.saturating_sub(s.width());
    format!("{}{}", s, " ".repeat(fill))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::testing::{
        sample_documents, HashEmbedder, InMemoryIndex, ScriptedGenerator, StaticRenderer,
        StaticSearch,
    };
    use sift_core::{Collaborators, Embedder, Orchestrator, PipelineSettings};
    use std::sync::Arc;

    async fn summary(search: StaticSearch) -> ResearchSummary {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let orchestrator = Orchestrator::new(
            Collaborators::new(
                Arc::new(ScriptedGenerator::replying("- Compare regional demand")),
                embedder.clone(),
                Arc::new(search),
                Arc::new(InMemoryIndex::new(embedder)),
                Arc::new(StaticRenderer::default()),
            ),
            PipelineSettings::default(),
        );
        orchestrator
            .run_research("consumer markets")
            .await
            .unwrap()
            .summary()
    }

    #[tokio::test]
    async fn test_markdown_lists_documents_and_steps() {
        let summary = summary(StaticSearch::new(sample_documents())).await;
        let md = render_markdown(&summary).unwrap();

        assert!(md.starts_with("# Research: consumer markets"));
        assert!(md.contains("Retail demand forecasting with transformers"));
        assert!(md.contains("1. Compare regional demand"));
        assert!(md.contains("## Charts"));
        assert!(!md.contains("## Warnings"));
    }

    #[tokio::test]
    async fn test_markdown_for_degraded_run() {
        let summary = summary(StaticSearch::failing()).await;
        let md = render_markdown(&summary).unwrap();

        assert!(md.contains("No documents found."));
        assert!(md.contains("## Warnings"));
        assert!(md.contains("- search: "));
    }

    #[tokio::test]
    async fn test_text_and_json() {
        colored::control::set_override(false);
        let summary = summary(StaticSearch::new(sample_documents())).await;

        let text = render_text(&summary, RunStatus::Complete);
        assert!(text.contains("Documents (3)"));
        assert!(text.contains("[complete]"));

        let json: serde_json::Value = serde_json::from_str(&render_json(&summary).unwrap()).unwrap();
        assert_eq!(json["query"], "consumer markets");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
