//! Effective configuration.

use anyhow::{Context, Result};
use colored::Colorize;
use sift_core::SiftConfig;

pub fn execute(config: &SiftConfig) -> Result<()> {
    let text = config.to_toml().context("Failed to serialize configuration")?;
    println!("{}", "# Effective configuration (file + environment)".dimmed());
    println!("{}", text);
    Ok(())
}
