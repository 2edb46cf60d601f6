//! The `command` engine: runs an OS command described by a JSON resource.
//!
//! ```json
//! {
//!   "description": "List files",
//!   "contentType": "text/plain",
//!   "commands": [
//!     { "os": "linux",   "command": "ls -la" },
//!     { "os": "windows", "command": "cmd /C dir" }
//!   ],
//!   "set":   { "LC_ALL": "C" },
//!   "unset": ["HISTFILE"]
//! }
//! ```
//!
//! `os` matches `std::env::consts::OS` (`linux`, `macos`, `windows`, ...);
//! `unix` matches every unix family target and `any` (or `*`) matches all.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::context::{ExecutionContext, RequestContext};
use crate::error::{Result, RuntimeError};
use crate::executor::{ScriptExecutor, ScriptOutput};
use crate::process::{EnvironmentPatch, Invocation, ProcessRunner, tokenize};
use crate::provider::{EngineDescriptor, ScriptExecutorProvider, resolve_resource};
use crate::resource::ResourceStore;

/// Parsed command resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub commands: Vec<OsCommand>,
    #[serde(flatten)]
    pub environment: EnvironmentPatch,
}

/// A command line for one operating system.
#[derive(Debug, Clone, Deserialize)]
pub struct OsCommand {
    pub os: String,
    pub command: String,
}

impl CommandDefinition {
    pub fn parse(path: &str, content: &[u8]) -> Result<Self> {
        let definition: Self = serde_json::from_slice(content)
            .map_err(|e| RuntimeError::invalid_definition(path, e.to_string()))?;
        if definition.commands.is_empty() {
            return Err(RuntimeError::invalid_definition(path, "no commands defined"));
        }
        Ok(definition)
    }

    /// First command whose `os` matches `os`.
    pub fn command_for(&self, os: &str) -> Option<&OsCommand> {
        self.commands.iter().find(|c| os_matches(&c.os, os))
    }
}

fn os_matches(wanted: &str, os: &str) -> bool {
    let wanted = wanted.trim().to_ascii_lowercase();
    match wanted.as_str() {
        "any" | "*" => true,
        "unix" => cfg!(unix) && os != "windows",
        "mac" | "osx" | "darwin" => os == "macos",
        other => other == os,
    }
}

/// Provider for the `command` engine.
pub struct CommandProvider {
    descriptor: EngineDescriptor,
    store: Arc<dyn ResourceStore>,
    runner: ProcessRunner,
}

impl CommandProvider {
    pub fn new(store: Arc<dyn ResourceStore>, runner: ProcessRunner) -> Self {
        Self {
            descriptor: EngineDescriptor::new("command", "Command"),
            store,
            runner,
        }
    }
}

#[async_trait]
impl ScriptExecutorProvider for CommandProvider {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn create_executor(&self, request: &RequestContext) -> Result<Box<dyn ScriptExecutor>> {
        let path = resolve_resource(self.store.as_ref(), &request.path).await?;
        Ok(Box::new(CommandExecutor {
            path,
            store: Arc::clone(&self.store),
            runner: self.runner,
        }))
    }
}

struct CommandExecutor {
    path: String,
    store: Arc<dyn ResourceStore>,
    runner: ProcessRunner,
}

#[async_trait]
impl ScriptExecutor for CommandExecutor {
    async fn execute(&mut self, ctx: &ExecutionContext) -> Result<ScriptOutput> {
        let resource = self.store.read(&self.path).await?;
        let definition = CommandDefinition::parse(&self.path, &resource.content)?;

        let os = std::env::consts::OS;
        let command = definition.command_for(os).ok_or_else(|| {
            RuntimeError::invalid_definition(&self.path, format!("no command for os '{os}'"))
        })?;
        let argv = tokenize(&command.command)
            .map_err(|e| RuntimeError::invalid_definition(&self.path, e.to_string()))?;

        let env = definition
            .environment
            .clone()
            .layered_over(&ctx.process_env());
        debug!(
            path = %self.path,
            program = %argv[0],
            description = %definition.description,
            "Running command"
        );

        let output = self
            .runner
            .run(&Invocation::new(argv).with_env(env))
            .await?;
        if !output.success() {
            return Err(RuntimeError::NonZeroExit {
                code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(ScriptOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            content_type: definition.content_type,
            elapsed: output.elapsed,
            ..Default::default()
        })
    }
}
