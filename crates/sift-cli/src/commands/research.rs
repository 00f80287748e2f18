//! Research command.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sift_core::{RunStatus, SiftConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{output, wiring};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

#[derive(Args)]
pub struct ResearchArgs {
    /// Research question
    pub query: String,

    /// Report format
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: ResearchArgs, config: &SiftConfig) -> Result<()> {
    let orchestrator = wiring::orchestrator(config).await?;

    // Ctrl+C stops the run at the next stage boundary.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg} [{elapsed}]")
            .context("Invalid progress template")?,
    );
    spinner.set_message(format!("Researching \"{}\"", args.query));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = orchestrator.run_with_cancel(&args.query, cancel).await;
    spinner.finish_and_clear();

    let outcome = result.with_context(|| format!("Research run for '{}' failed", args.query))?;
    let summary = outcome.state.summary();

    if args.output.is_some() {
        colored::control::set_override(false);
    }
    let rendered = match args.format {
        OutputFormat::Text => output::render_text(&summary, outcome.status),
        OutputFormat::Json => output::render_json(&summary)?,
        OutputFormat::Markdown => output::render_markdown(&summary)?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("{} Report written to {}", "✓".green(), path.display());
        }
        None => print!("{}", rendered),
    }

    match outcome.status {
        RunStatus::Complete => {}
        RunStatus::Degraded => eprintln!(
            "{} Completed with {} stage warning(s)",
            "!".yellow(),
            summary.stage_errors.len()
        ),
        RunStatus::Cancelled => eprintln!("{} Cancelled before all stages ran", "!".red()),
    }

    Ok(())
}
