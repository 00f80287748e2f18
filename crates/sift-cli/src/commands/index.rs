//! Similarity index commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use sift_core::{DocumentSearch, SiftConfig};

use crate::{output, wiring};

#[derive(Subcommand)]
pub enum IndexCommands {
    /// Fetch papers for each query and add them to the index
    Populate(PopulateArgs),

    /// Show the nearest indexed documents for a text
    Query(QueryArgs),

    /// Show index statistics
    Stats,
}

#[derive(Args)]
pub struct PopulateArgs {
    /// Search queries
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Papers to fetch per query
    #[arg(long, default_value = "10")]
    pub max_results: usize,
}

#[derive(Args)]
pub struct QueryArgs {
    /// Query text
    pub text: String,

    /// Number of results to return
    #[arg(short, long, default_value = "5")]
    pub k: usize,
}

pub async fn execute(cmd: IndexCommands, config: &SiftConfig) -> Result<()> {
    let embedder = wiring::embedder(config);
    let index = wiring::index(config, embedder).await?;

    match cmd {
        IndexCommands::Populate(args) => {
            let search = wiring::search(config);
            let mut added = 0;
            for query in &args.queries {
                let documents = search
                    .search(query, args.max_results)
                    .await
                    .with_context(|| format!("Search for '{}' failed", query))?;
                let new = index
                    .add(&documents)
                    .await
                    .with_context(|| format!("Indexing results for '{}' failed", query))?;
                added += new;
                println!(
                    "{} {} fetched, {} new  {}",
                    "✓".green(),
                    documents.len(),
                    new,
                    query.dimmed()
                );
            }
            let total = index.count().await.context("Failed to count documents")?;
            println!();
            println!("{} {} documents added, {} in {}", "Done.".bold(), added, total, index.name());
        }
        IndexCommands::Query(args) => {
            let documents = index
                .query(&args.text, args.k)
                .await
                .context("Index query failed")?;
            if documents.is_empty() {
                println!("{}", "No indexed documents.".dimmed());
            }
            for (i, doc) in documents.iter().enumerate() {
                println!(
                    "{:>2}. {} {}",
                    i + 1,
                    output::truncate(doc.display_title(), 70).cyan(),
                    format!("({:.3})", doc.relevance_score()).dimmed()
                );
                if let Some(url) = &doc.url {
                    println!("    {}", url.dimmed());
                }
            }
        }
        IndexCommands::Stats => {
            let total = index.count().await.context("Failed to count documents")?;
            println!("{}: {}", "Index".bold(), index.name());
            println!("{}: {}", "Documents".bold(), total);
            println!("{}: {}", "Embedding model".bold(), config.embedding.model);
            println!("{}: {}", "Dimension".bold(), config.embedding.dimension);
        }
    }

    Ok(())
}
