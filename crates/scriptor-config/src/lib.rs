//! Configuration system for the Scriptor script runtime.
//!
//! Provides TOML-based configuration with:
//! - Engine selection and per-engine compiler/interpreter commands
//! - Command-engine polling limits
//! - Storage backend and size guard
//! - Scheduler cadence and scheduled jobs
//! - User and project layers, or a single explicit file

pub mod error;
pub mod sources;
pub mod types;

pub use error::{ConfigError, Result};
pub use sources::{
    ConfigLayer, ConfigSource, LayerKind, LoadedConfig, load, load_config, load_config_file,
    user_config_dir,
};
pub use types::*;
