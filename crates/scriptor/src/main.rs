//! Scriptor - polyglot script execution runtime
//!
//! Main entry point for the Scriptor CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scriptor_config::ConfigSource;

mod commands;

use commands::{deploy, engines, run, serve, storage};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Scriptor - polyglot script execution runtime
#[derive(Parser)]
#[command(name = "scriptor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(short, long, global = true, env = "SCRIPTOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script resource on an engine
    Run(run::RunArgs),

    /// Run scheduled tasks until interrupted
    Serve(serve::ServeArgs),

    /// List registered engines
    Engines(engines::EnginesArgs),

    /// Copy a local file into the resource store
    Deploy(deploy::DeployArgs),

    /// Storage utility operations
    Storage(storage::StorageArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "scriptor=debug,scriptor_runtime=debug,scriptor_config=debug,info"
    } else {
        "scriptor=info,scriptor_runtime=info,scriptor_config=info,warn"
    };

    let log_dir = scriptor_config::user_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "scriptor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "scriptor=trace,scriptor_runtime=trace,scriptor_config=trace,info",
                )),
        )
        .init();

    let source = match &cli.config {
        Some(path) => ConfigSource::file(path),
        None => ConfigSource::discover(),
    };
    let loaded = scriptor_config::load(&source)?;
    for warning in &loaded.warnings {
        tracing::warn!(%warning, "Config layer skipped");
    }
    for layer in loaded.layers.iter().filter(|layer| layer.loaded) {
        tracing::debug!(
            kind = ?layer.kind,
            path = %layer.path.display(),
            sections = ?layer.sections,
            "Config layer loaded"
        );
    }
    let config = loaded.config;

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Engines(args) => engines::run(args, &ctx).await,
        Commands::Deploy(args) => deploy::run(args, &ctx).await,
        Commands::Storage(args) => storage::run(args, &ctx).await,
    }
}
