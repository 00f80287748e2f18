//! Sift CLI
//!
//! Multi-stage research over academic search, a similarity index and a
//! language model.

use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;
mod wiring;

use commands::Cli;

/// Initialize tracing with optional file logging.
///
/// Console output goes to stderr so `--format json` stays parseable on
/// stdout. The returned guard flushes the file writer on drop.
fn init_tracing(log_file: Option<&std::path::Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sift=info,sift_core=info,sift_web=debug".into());

    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let _ = std::fs::create_dir_all(dir);
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "sift.log".into());

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref());

    cli.execute().await
}
