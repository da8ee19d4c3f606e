//! CLI argument types

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Calificar: Power-Telemetry Qualification Engine
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "calificar")]
#[command(version)]
#[command(about = "Phase-aware energy metrics, spectral stability analysis, and \
                   pricing-tier qualification for GPU power captures")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Analyze a power capture: phases, metrics, spectrum, tier
    Analyze(AnalyzeArgs),

    /// Submit and verify a capture against declared metrics
    Qualify(QualifyArgs),

    /// Show the active tier policy
    Tiers(TiersArgs),
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable report
    #[default]
    Text,
    /// Machine-readable JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Arguments for `calificar analyze`
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct AnalyzeArgs {
    /// Capture file: JSON array of {timestamp_s, watts} samples
    pub capture: PathBuf,

    /// Tokens generated during the capture
    #[arg(short, long)]
    pub tokens: u64,

    /// Engine configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Arguments for `calificar qualify`
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct QualifyArgs {
    /// Capture file: JSON array of {timestamp_s, watts} samples
    pub capture: PathBuf,

    /// Model the qualification applies to
    #[arg(short, long)]
    pub model_id: String,

    /// Tokens generated during the capture
    #[arg(short, long)]
    pub tokens: u64,

    /// Declared average power, watts
    #[arg(long)]
    pub declared_avg_watts: f64,

    /// Declared power coefficient of variation
    #[arg(long)]
    pub declared_cv: f64,

    /// Engine configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the file-backed record store
    #[arg(short, long, default_value = "qualifications")]
    pub store_dir: PathBuf,
}

/// Arguments for `calificar tiers`
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct TiersArgs {
    /// Engine configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
