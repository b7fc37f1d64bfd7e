//! Backer Upper - Main entry point
//!
//! Incremental backup of configured source directories.

use anyhow::Result;
use backer_upper::{executor::BackupExecutor, utils, BackupMode};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, value_name = "FILE", conflicts_with = "source")]
    config: Option<PathBuf>,

    /// Directory to back up; `*` segments match any directory at that level
    #[arg(short, long, requires = "target")]
    source: Option<String>,

    /// Directory the archives are written to
    #[arg(short, long, requires = "source")]
    target: Option<PathBuf>,

    /// Exclude paths containing this text (repeatable)
    #[arg(short, long, requires = "source")]
    exclude: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn mode(&self) -> BackupMode {
        match (&self.config, &self.source, &self.target) {
            (Some(config), _, _) => BackupMode::ConfigFile(config.clone()),
            (None, Some(source), Some(target)) => BackupMode::Explicit {
                source: source.clone(),
                target: target.clone(),
                exclude: self.exclude.clone(),
            },
            _ => BackupMode::DefaultConfig,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = args.mode().resolve();

    // Initialize logging
    let log_level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    utils::logger::init(&log_level)?;

    let config = config?;
    tracing::info!("Starting backer-upper v{}", env!("CARGO_PKG_VERSION"));
    for source in &config.sources {
        tracing::info!("Source: {} (excluding {:?})", source.path, source.exclude);
    }

    // Scanning and archiving are blocking file system work
    let executor = BackupExecutor::new(config);
    let result = tokio::task::spawn_blocking(move || executor.execute()).await?;

    for source in &result.source_errors {
        tracing::error!("Source {} skipped: {}", source.source, source.error);
    }
    for root in &result.roots {
        if let Some(error) = &root.error {
            tracing::error!("Root {} failed: {}", root.root, error);
        }
        if let Some(error) = &root.previous_log_error {
            tracing::warn!("Root {} was fully re-archived: {}", root.root, error);
        }
    }

    let failed: Vec<_> = result.failed_files().collect();
    if !failed.is_empty() {
        tracing::warn!("Skipped {} files:", failed.len());
        for (root, path) in &failed {
            tracing::warn!("    {}{}", root, path);
        }
    }

    if !result.is_complete() {
        anyhow::bail!("backup finished with errors");
    }

    Ok(())
}
