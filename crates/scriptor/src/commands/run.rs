//! Run command - execute one script resource.

use anyhow::Result;
use clap::Args;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use scriptor_runtime::{DebugHandle, DebugOptions, RequestContext, Runtime};

use super::{Context, parse_key_value};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Engine type or alias (java, groovy, js, js-debug, command, job)
    pub engine: String,

    /// Resource path, e.g. /apps/Service.java
    pub path: String,

    /// Request parameter (repeatable)
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Extra environment variable for the script (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Break on this 1-based line (repeatable, debug engines only)
    #[arg(short = 'b', long = "break", value_name = "LINE")]
    pub breakpoints: Vec<u32>,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let runtime = Runtime::from_config(&ctx.config)?;

    let mut request = RequestContext::new(&args.engine, &args.path);
    for (key, value) in args.params {
        request = request.with_param(key, value);
    }
    for (key, value) in args.env {
        request = request.with_env(key, value);
    }

    let controller = if args.breakpoints.is_empty() {
        None
    } else {
        let (options, handles) = DebugOptions::with_controller(args.breakpoints);
        request = request.with_debug(options);
        Some(tokio::spawn(drive_debugger(handles)))
    };

    let result = runtime.execute(request).await;
    if let Some(controller) = controller {
        controller.abort();
    }
    let output = result?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if !output.warnings.is_empty() {
        eprintln!("{}", style("Warnings").yellow().bold());
        eprintln!("{}", output.warnings.trim_end());
    }
    print!("{}", output.stdout);
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    if ctx.verbose {
        eprintln!(
            "{} exit {} in {:?}",
            style("✓").green(),
            output.exit_code,
            output.elapsed
        );
    }
    Ok(())
}

/// Interactive controller: `c` resumes, `n` steps over, `q` terminates.
async fn drive_debugger(mut handles: mpsc::UnboundedReceiver<DebugHandle>) {
    let Some(mut handle) = handles.recv().await else {
        return;
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = handle.wait_suspended().await {
        eprintln!(
            "{} paused at line {}  [c]ontinue [n]ext [q]uit",
            style("⏸").cyan(),
            style(line).bold()
        );
        let command = match lines.next_line().await {
            Ok(Some(input)) => input,
            _ => "c".to_string(),
        };
        let sent = match command.trim() {
            "n" | "next" => handle.step_over(),
            "q" | "quit" => handle.terminate(),
            _ => handle.resume(),
        };
        if sent.is_err() {
            break;
        }
    }
}
