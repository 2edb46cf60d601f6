//! Built-in engines.

pub mod command;
pub mod compiled;
pub mod javascript;
pub mod job;

pub use command::{CommandDefinition, CommandProvider, OsCommand};
pub use compiled::CompiledProvider;
pub use javascript::InterpretedProvider;
pub use job::{JobDefinition, JobProvider, JobStep, MAX_JOB_DEPTH};
