//! CLI command definitions and handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sift_core::SiftConfig;
use std::path::PathBuf;

pub mod config;
pub mod index;
pub mod research;
pub mod serve;

/// Sift - multi-stage research assistant
#[derive(Parser)]
#[command(name = "sift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to .sift/config.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, env = "SIFT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the research pipeline for a query
    Research(research::ResearchArgs),

    /// Manage the similarity index
    #[command(subcommand)]
    Index(index::IndexCommands),

    /// Start the HTTP server
    Serve(serve::ServeArgs),

    /// Print the effective configuration
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = SiftConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Commands::Research(args) => research::execute(args, &config).await,
            Commands::Index(cmd) => index::execute(cmd, &config).await,
            Commands::Serve(args) => serve::execute(args, &config).await,
            Commands::Config => config::execute(&config),
        }
    }
}
