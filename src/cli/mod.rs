//! CLI module for calificar
//!
//! Thin adapter over the engine operations: offline capture analysis,
//! local qualification runs against a file-backed record store, and tier
//! policy inspection.

mod args;
mod commands;
mod logging;

pub use args::{AnalyzeArgs, Cli, Command, OutputFormat, QualifyArgs, TiersArgs};
pub use commands::{run_command, CliError};
pub use logging::LogLevel;
