//! Serve command - run scheduled tasks until interrupted.

use anyhow::Result;
use clap::Args;
use tracing::info;

use scriptor_runtime::Runtime;

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {}

/// Run the serve command.
pub async fn run(_args: ServeArgs, ctx: &Context) -> Result<()> {
    let runtime = Runtime::from_config(&ctx.config)?;
    let handle = runtime.schedule(&ctx.config)?;

    info!(tasks = handle.status().len(), "Serving; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let status = handle.status();
    handle.shutdown().await;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else if ctx.verbose {
        for task in &status {
            println!(
                "{:<24} runs={} failures={}",
                task.name, task.runs, task.failures
            );
        }
    }
    Ok(())
}
