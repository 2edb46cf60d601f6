//! Polyglot script runtime for Scriptor.
//!
//! Scripts live in a [`ResourceStore`] and are addressed by `(engine, path)`.
//! The [`Runtime`] looks the engine up in its [`EngineRegistry`], asks the
//! provider for a fresh executor, and runs it against an [`ExecutionContext`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Runtime                                                 │
//! │  - EngineRegistry: java, groovy, js, js-debug, command,  │
//! │    job (type or alias lookup)                            │
//! │  - ArtifactCache: single-flight compile per (engine,path)│
//! │  - Storage: size-guarded blobs (memory or SQLite)        │
//! │  - Scheduler: metrics capture + scheduled jobs           │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod compiler;
pub mod context;
pub mod debug;
pub mod diagnostics;
pub mod engines;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod process;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod tasks;

pub use cache::{ArtifactCache, CacheStats};
pub use compiler::{
    CompiledArtifact, Compiler, Executable, OutputParser, ProcessCompiler, SourceUnit,
};
pub use context::{Dispatch, ExecutionContext, RequestContext};
pub use debug::{DebugCommand, DebugHandle, DebugOptions, DebugState, InspectorBridge};
pub use diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Diagnostics};
pub use engines::{
    CommandDefinition, CommandProvider, CompiledProvider, InterpretedProvider, JobDefinition,
    JobProvider,
};
pub use error::{Result, RuntimeError, TaskError};
pub use executor::{ScriptExecutor, ScriptOutput};
pub use metrics::{EngineCounters, MetricsSnapshot, RuntimeMetrics};
pub use process::{EnvironmentPatch, Invocation, ProcessOutput, ProcessRunner};
pub use provider::{EngineDescriptor, ScriptExecutorProvider};
pub use registry::EngineRegistry;
pub use resource::{
    Fingerprint, FsResourceStore, MemoryResourceStore, ResourceStore, ScriptResource, StoreError,
};
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{Schedule, Scheduler, SchedulerHandle, Task, TaskState, TaskStatus};
pub use storage::{
    MAX_STORAGE_FILE_SIZE_IN_BYTES, Storage, StorageBackend, StorageEntry, StorageError,
};
pub use tasks::{JobTask, MetricsCaptureTask};
