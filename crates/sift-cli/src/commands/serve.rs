//! Web server command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use sift_core::SiftConfig;
use sift_web::AppState;

use crate::wiring;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, default_value = "3030")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

pub async fn execute(args: ServeArgs, config: &SiftConfig) -> Result<()> {
    let orchestrator = wiring::orchestrator(config).await?;

    println!();
    println!("  {} {}", "Sift".cyan().bold(), "Web Server".bold());
    println!();
    println!(
        "  {}  POST http://{}:{}/api/research",
        "Research".green(),
        args.host,
        args.port
    );
    println!(
        "  {}    GET  http://{}:{}/health",
        "Health".green(),
        args.host,
        args.port
    );
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    sift_web::run_server(AppState::new(orchestrator), &args.host, args.port).await?;

    Ok(())
}
