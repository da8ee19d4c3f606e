//! Calificar CLI
//!
//! Local front end for the qualification engine.
//!
//! # Usage
//!
//! ```bash
//! # Analyze a power capture
//! calificar analyze run.json --tokens 20000
//!
//! # Same report as JSON
//! calificar analyze run.json --tokens 20000 --format json
//!
//! # Submit and verify a capture against declared metrics
//! calificar qualify run.json --model-id qwen3-32b --tokens 20000 \
//!     --declared-avg-watts 145.2 --declared-cv 0.089
//!
//! # Show the tier policy in force
//! calificar tiers --config deployment.yaml
//! ```

use calificar::cli::{run_command, Cli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
