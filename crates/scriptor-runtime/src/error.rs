//! Error types for the script runtime.

use std::time::Duration;

use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::resource::StoreError;
use crate::storage::StorageError;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while dispatching, compiling or running a script.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No provider is registered under the requested type or alias.
    #[error("Unknown engine type: {0}")]
    UnknownEngineType(String),

    /// Two providers claimed the same type or alias at startup.
    #[error("Engine type or alias already registered: {0}")]
    DuplicateEngine(String),

    /// The provider could not build an executor for the request.
    #[error("Executor construction failed for '{path}': {message}")]
    ExecutorConstruction { path: String, message: String },

    /// The compiler reported at least one error.
    #[error("Compilation failed for '{path}':\n{}", .diagnostics.errors)]
    Compilation {
        path: String,
        diagnostics: Diagnostics,
    },

    /// The script compiled (or was interpreted) but failed while running.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A command did not finish within its polling ceiling.
    #[error("Process timed out after {0:?}")]
    ProcessTimeout(Duration),

    /// A command finished with a non-zero exit code.
    #[error("Process exited with code {code}: {stderr}")]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// A command or job resource could not be parsed.
    #[error("Invalid definition in '{path}': {message}")]
    InvalidDefinition { path: String, message: String },

    /// Debug bridge failure.
    #[error("Debug session error: {0}")]
    Debug(String),

    /// A scheduled task name was registered twice.
    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    /// Resource store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Storage utility failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] scriptor_config::ConfigError),
}

impl RuntimeError {
    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an invalid-definition error.
    pub fn invalid_definition(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            path: path.into(),
            message: msg.into(),
        }
    }
}

/// Failure of one scheduled task run.
///
/// Task failures are caught and logged by the scheduler; they never
/// propagate to sibling tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task's own work failed.
    #[error("Task '{task}' failed: {message}")]
    RunFailed { task: String, message: String },

    /// The task panicked.
    #[error("Task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },
}

impl TaskError {
    /// Create a run failure for the named task.
    pub fn failed(task: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        Self::RunFailed {
            task: task.into(),
            message: msg.to_string(),
        }
    }
}
