//! Storage command - inspect and edit the storage utility.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::style;

use scriptor_runtime::Storage;

use super::Context;

/// Arguments for the storage command.
#[derive(Args, Debug)]
pub struct StorageArgs {
    #[command(subcommand)]
    pub command: StorageCommand,
}

#[derive(Subcommand, Debug)]
pub enum StorageCommand {
    /// Print an entry
    Get {
        path: String,
    },

    /// Store a value, or the contents of --file
    Put {
        path: String,

        /// Literal value
        value: Option<String>,

        /// Read the value from a file
        #[arg(long, conflicts_with = "value")]
        file: Option<PathBuf>,
    },

    /// List entries under a prefix
    List {
        #[arg(default_value = "/")]
        prefix: String,
    },

    /// Delete an entry
    Delete {
        path: String,
    },

    /// Delete every entry
    Clear,
}

/// Run the storage command.
pub async fn run(args: StorageArgs, ctx: &Context) -> Result<()> {
    let storage = Storage::from_config(&ctx.config.storage())?;

    match args.command {
        StorageCommand::Get { path } => match storage.get(&path)? {
            Some(data) => print!("{}", String::from_utf8_lossy(&data)),
            None => bail!("no entry at {path}"),
        },
        StorageCommand::Put { path, value, file } => {
            let data = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(file)) => tokio::fs::read(&file).await?,
                (None, None) => bail!("provide a value or --file"),
            };
            storage.put(&path, &data)?;
            println!("{} stored {} ({} bytes)", style("✓").green(), path, data.len());
        }
        StorageCommand::List { prefix } => {
            let entries = storage.list(&prefix)?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{:<40} {:>10}  {}",
                        entry.path,
                        entry.size,
                        entry.updated_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        StorageCommand::Delete { path } => {
            if storage.delete(&path)? {
                println!("{} deleted {}", style("✓").green(), path);
            } else {
                println!("No entry at {path}");
            }
        }
        StorageCommand::Clear => {
            let removed = storage.clear()?;
            println!("{} removed {} entries", style("✓").green(), removed);
        }
    }
    Ok(())
}
