//! Deploy command - copy a local file into the resource store.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use console::style;

use scriptor_runtime::Runtime;

use super::Context;

/// Arguments for the deploy command.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Local file to read
    pub file: PathBuf,

    /// Resource path to store it under, e.g. /apps/Service.java
    pub path: String,
}

/// Run the deploy command.
pub async fn run(args: DeployArgs, ctx: &Context) -> Result<()> {
    let content = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;

    let runtime = Runtime::from_config(&ctx.config)?;
    let path = runtime.deploy(&args.path, &content).await?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "path": path, "bytes": content.len() })
        );
    } else {
        println!("{} deployed {} ({} bytes)", style("✓").green(), path, content.len());
    }
    Ok(())
}
