//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [runtime]                # resource root, artifact cache directory
//! [engines]                # enabled engines
//! [engines.java]           # compile/launch commands per compiled engine
//! [engines.js]             # interpreter commands
//! [command]                # command engine polling limits
//! [storage]                # storage backend + size guard
//! [scheduler]              # background task cadence
//! [[jobs]]                 # scheduled job resources
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Largest blob the storage utility accepts by default (10 MiB).
pub const DEFAULT_MAX_STORAGE_FILE_SIZE_IN_BYTES: usize = 10 * 1024 * 1024;

/// Default polling interval for command processes.
pub const DEFAULT_WAIT_TIME_MS: u64 = 1000;

/// Default number of polling iterations for command processes.
pub const DEFAULT_LOOP_COUNT: u32 = 30;

/// Application name for data directory resolution.
const APP_NAME: &str = "scriptor";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptorConfig {
    /// Resource root and cache locations.
    pub runtime: Option<RuntimeSection>,

    /// Engine selection and engine commands.
    pub engines: Option<EnginesSection>,

    /// Command engine polling limits.
    pub command: Option<CommandSection>,

    /// Storage utility configuration.
    pub storage: Option<StorageSection>,

    /// Background scheduler configuration.
    pub scheduler: Option<SchedulerSection>,

    /// Job resources to run on a schedule.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobSchedule>,
}

impl ScriptorConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: ScriptorConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale; jobs accumulate.
    pub fn merge(&mut self, other: ScriptorConfig) {
        if other.runtime.is_some() {
            self.runtime = other.runtime;
        }
        if other.engines.is_some() {
            self.engines = other.engines;
        }
        if other.command.is_some() {
            self.command = other.command;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.scheduler.is_some() {
            self.scheduler = other.scheduler;
        }
        self.jobs.extend(other.jobs);
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        let command = self.command();
        if command.wait_time_ms == 0 {
            return Err(ConfigError::invalid("command.wait_time_ms", "must be > 0"));
        }
        if command.loop_count == 0 {
            return Err(ConfigError::invalid("command.loop_count", "must be > 0"));
        }

        let storage = self.storage();
        if storage.max_file_size == 0 {
            return Err(ConfigError::invalid("storage.max_file_size", "must be > 0"));
        }
        if storage.max_file_size > DEFAULT_MAX_STORAGE_FILE_SIZE_IN_BYTES {
            return Err(ConfigError::invalid(
                "storage.max_file_size",
                format!("must be <= {DEFAULT_MAX_STORAGE_FILE_SIZE_IN_BYTES}"),
            ));
        }
        if storage.backend == StorageBackendKind::Sqlite && storage.path.is_none() {
            return Err(ConfigError::invalid(
                "storage.path",
                "required when backend = \"sqlite\"",
            ));
        }

        if self.scheduler().metrics_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "scheduler.metrics_interval_secs",
                "must be > 0",
            ));
        }

        for (i, job) in self.jobs.iter().enumerate() {
            if job.interval_secs == 0 {
                return Err(ConfigError::invalid(
                    format!("jobs[{i}].interval_secs"),
                    "must be > 0",
                ));
            }
        }

        let engines = self.engines();
        for (name, section) in [("java", &engines.java), ("groovy", &engines.groovy)] {
            if section.compile.is_empty() || section.launch.is_empty() {
                return Err(ConfigError::invalid(
                    format!("engines.{name}"),
                    "compile and launch commands must not be empty",
                ));
            }
        }
        if engines.js.interpreter.is_empty() {
            return Err(ConfigError::invalid(
                "engines.js.interpreter",
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Runtime section, or defaults.
    pub fn runtime(&self) -> RuntimeSection {
        self.runtime.clone().unwrap_or_default()
    }

    /// Engines section, or defaults.
    pub fn engines(&self) -> EnginesSection {
        self.engines.clone().unwrap_or_default()
    }

    /// Command section, or defaults.
    pub fn command(&self) -> CommandSection {
        self.command.clone().unwrap_or_default()
    }

    /// Storage section, or defaults.
    pub fn storage(&self) -> StorageSection {
        self.storage.clone().unwrap_or_default()
    }

    /// Scheduler section, or defaults.
    pub fn scheduler(&self) -> SchedulerSection {
        self.scheduler.clone().unwrap_or_default()
    }
}

/// Platform data directory for scriptor (`~/.local/share/scriptor` on Linux).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".scriptor"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Where scripts live and where compiled artifacts are kept.
///
/// ```toml
/// [runtime]
/// resource_root = "./scripts"
/// cache_dir = "/var/cache/scriptor"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Root directory of script resources. Defaults to `./scripts`.
    pub resource_root: Option<PathBuf>,
    /// Directory for compiler work files. Defaults to `<data_dir>/cache`.
    pub cache_dir: Option<PathBuf>,
}

impl RuntimeSection {
    /// Resolved resource root.
    pub fn resource_root(&self) -> PathBuf {
        self.resource_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("scripts"))
    }

    /// Resolved cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("cache"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engines
// ─────────────────────────────────────────────────────────────────────────────

/// Engine registry configuration.
///
/// ```toml
/// [engines]
/// enabled = ["js", "java", "command"]
///
/// [engines.java]
/// compile = ["javac", "-d", "{out_dir}", "{source}"]
/// launch = ["java", "-cp", "{out_dir}", "{main_class}"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesSection {
    /// Engine types to register at startup, in registration order.
    pub enabled: Vec<String>,
    /// Java compile/launch commands.
    #[serde(default = "CompilerSection::java")]
    pub java: CompilerSection,
    /// Groovy compile/launch commands.
    #[serde(default = "CompilerSection::groovy")]
    pub groovy: CompilerSection,
    /// JavaScript interpreter commands.
    pub js: InterpreterSection,
    /// Upper bound for one compiled or interpreted run, in seconds.
    pub run_timeout_secs: u64,
}

impl Default for EnginesSection {
    fn default() -> Self {
        Self {
            enabled: ["js", "js-debug", "groovy", "java", "command", "job"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            java: CompilerSection::java(),
            groovy: CompilerSection::groovy(),
            js: InterpreterSection::default(),
            run_timeout_secs: 300,
        }
    }
}

/// Commands for an engine backed by an external compiler.
///
/// Placeholders: `{source}` (source file), `{out_dir}` (class output
/// directory), `{main_class}` (fully-qualified entry class).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilerSection {
    /// Source file extension written to disk (without the dot).
    pub extension: String,
    /// Compiler argv template.
    pub compile: Vec<String>,
    /// Launch argv template.
    pub launch: Vec<String>,
}

impl CompilerSection {
    /// Defaults for `javac`/`java`.
    pub fn java() -> Self {
        Self {
            extension: "java".to_string(),
            compile: to_argv(&["javac", "-Xlint:all", "-d", "{out_dir}", "{source}"]),
            launch: to_argv(&["java", "-cp", "{out_dir}", "{main_class}"]),
        }
    }

    /// Defaults for `groovyc`/`groovy`.
    pub fn groovy() -> Self {
        Self {
            extension: "groovy".to_string(),
            compile: to_argv(&["groovyc", "-d", "{out_dir}", "{source}"]),
            launch: to_argv(&["groovy", "-cp", "{out_dir}", "-e", "{main_class}.main(args)"]),
        }
    }
}

/// Commands for interpreted engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterpreterSection {
    /// Interpreter argv; the script is piped to stdin.
    pub interpreter: Vec<String>,
    /// Interpreter argv for debug sessions; the script path is appended.
    pub debug: Vec<String>,
}

impl Default for InterpreterSection {
    fn default() -> Self {
        Self {
            interpreter: to_argv(&["node", "-"]),
            debug: to_argv(&["node", "--inspect-brk=127.0.0.1:0"]),
        }
    }
}

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Command engine
// ─────────────────────────────────────────────────────────────────────────────

/// Polling limits for the command engine.
///
/// The ceiling for one command is `wait_time_ms * loop_count`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandSection {
    /// Poll interval in milliseconds.
    pub wait_time_ms: u64,
    /// Maximum number of polls.
    pub loop_count: u32,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            wait_time_ms: DEFAULT_WAIT_TIME_MS,
            loop_count: DEFAULT_LOOP_COUNT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Which backing store the storage utility uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// Process-local map; contents vanish on exit.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Storage utility configuration.
///
/// ```toml
/// [storage]
/// backend = "sqlite"
/// path = "/var/lib/scriptor/storage.db"
/// max_file_size = 1048576
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSection {
    /// Backend kind.
    pub backend: StorageBackendKind,
    /// Database path for the sqlite backend.
    pub path: Option<PathBuf>,
    /// Largest accepted blob in bytes.
    pub max_file_size: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            path: None,
            max_file_size: DEFAULT_MAX_STORAGE_FILE_SIZE_IN_BYTES,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Background scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSection {
    /// Whether `serve` starts the scheduler at all.
    pub enabled: bool,
    /// Seconds between metrics captures.
    pub metrics_interval_secs: u64,
    /// Number of metrics records kept in storage.
    pub metrics_retention: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_interval_secs: 60,
            metrics_retention: 100,
        }
    }
}

/// A job resource run on a fixed interval.
///
/// ```toml
/// [[jobs]]
/// path = "/jobs/nightly.toml"
/// interval_secs = 3600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSchedule {
    /// Resource path of the job definition.
    pub path: String,
    /// Seconds between runs.
    pub interval_secs: u64,
    /// Seconds to wait before the first run.
    #[serde(default)]
    pub initial_delay_secs: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
