//! The executor contract shared by every engine.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::ExecutionContext;
use crate::error::Result;

/// Output of one script execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code (0 = success).
    pub exit_code: i32,
    /// Compiler warnings disclosed alongside a successful run.
    pub warnings: String,
    /// Declared content type, when the engine knows one.
    pub content_type: Option<String>,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl ScriptOutput {
    /// Output holding only stdout text.
    pub fn text(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

/// A per-request executor bound to one resource.
///
/// Executors are created by a provider for a single request and dropped
/// afterwards; they are never shared across requests.
#[async_trait]
pub trait ScriptExecutor: Send {
    /// Run the bound resource.
    async fn execute(&mut self, ctx: &ExecutionContext) -> Result<ScriptOutput>;
}
