//! Engines command - list registered engines.

use anyhow::Result;
use clap::Args;
use console::style;

use scriptor_runtime::Runtime;

use super::Context;

/// Arguments for the engines command.
#[derive(Args, Debug)]
pub struct EnginesArgs {}

/// Run the engines command.
pub async fn run(_args: EnginesArgs, ctx: &Context) -> Result<()> {
    let runtime = Runtime::from_config(&ctx.config)?;
    let engines = runtime.engines();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&engines)?);
        return Ok(());
    }

    println!("{}", style("Engines").bold());
    for engine in &engines {
        println!("  {:<10} {}", style(&engine.engine_type).cyan(), engine.alias);
    }
    Ok(())
}
