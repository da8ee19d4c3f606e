//! CLI command handlers

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::analysis::{analyze_run, AnalysisError, RunAnalysis};
use crate::config::{ConfigError, EngineConfig};
use crate::qualify::{DeclaredMetrics, QualificationEngine, QualifyError};
use crate::store::JsonFileBackend;
use crate::telemetry::SampleBuffer;

use super::args::{AnalyzeArgs, Cli, Command, OutputFormat, QualifyArgs, TiersArgs};
use super::logging::{log, LogLevel};

/// Errors surfaced to the CLI user
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read capture file: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Qualify(#[from] QualifyError),
}

/// Execute a parsed CLI invocation
pub fn run_command(cli: Cli) -> Result<(), CliError> {
    let level = LogLevel::from_flags(cli.verbose, cli.quiet);
    match cli.command {
        Command::Analyze(args) => run_analyze(&args, level),
        Command::Qualify(args) => run_qualify(&args, level),
        Command::Tiers(args) => run_tiers(&args, level),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn load_capture(path: &Path) -> Result<SampleBuffer, CliError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn run_analyze(args: &AnalyzeArgs, level: LogLevel) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let buffer = load_capture(&args.capture)?;
    log(
        level,
        LogLevel::Verbose,
        &format!("Loaded {} samples spanning {:.2} s", buffer.len(), buffer.duration_seconds()),
    );

    let analysis = analyze_run(&buffer, args.tokens, &config)?;
    match args.format {
        OutputFormat::Json => {
            log(level, LogLevel::Normal, &serde_json::to_string_pretty(&analysis)?);
        }
        OutputFormat::Text => print_analysis(&analysis, level),
    }
    Ok(())
}

fn print_analysis(analysis: &RunAnalysis, level: LogLevel) {
    log(level, LogLevel::Normal, "Phases:");
    for w in &analysis.windows {
        let rate = w
            .ramp_rate_w_per_s
            .map(|r| format!(", {r:+.1} W/s"))
            .unwrap_or_default();
        log(
            level,
            LogLevel::Normal,
            &format!(
                "  {:<8} {:>7.3}s - {:>7.3}s  avg {:>7.1} W  peak {:>7.1} W  {:>9.1} J{rate}",
                w.phase.to_string(),
                w.start_s,
                w.end_s,
                w.stats.avg_watts,
                w.stats.peak_watts,
                w.stats.energy_joules,
            ),
        );
    }

    let m = &analysis.metrics;
    log(level, LogLevel::Normal, "\nRun metrics:");
    log(level, LogLevel::Normal, &format!("  avg power        {:>10.1} W", m.avg_power_watts));
    log(level, LogLevel::Normal, &format!("  peak power       {:>10.1} W", m.peak_power_watts));
    if let Some(cv) = m.power_cv {
        log(level, LogLevel::Normal, &format!("  power CV         {cv:>10.4}"));
    }
    log(level, LogLevel::Normal, &format!("  energy           {:>10.1} J", m.total_energy_joules));
    if let Some(jpt) = m.joules_per_token {
        log(level, LogLevel::Normal, &format!("  joules/token     {jpt:>10.4}"));
    }
    if let Some(wh) = m.wh_per_1k_queries {
        log(level, LogLevel::Normal, &format!("  Wh/1k queries    {wh:>10.2}"));
    }
    for failure in &m.failures {
        log(level, LogLevel::Normal, &format!("  {} unavailable: {}", failure.metric, failure.condition));
    }

    if !analysis.spectral.insufficient_resolution {
        log(level, LogLevel::Normal, "\nDecode spectrum:");
        if let Some(f) = analysis.spectral.dominant_frequency_hz {
            log(level, LogLevel::Normal, &format!("  dominant freq    {f:>10.2} Hz"));
        }
        if let Some(thd) = analysis.spectral.thd_percent {
            log(level, LogLevel::Normal, &format!("  THD              {thd:>10.1} %"));
        }
        if let Some(rms) = analysis.spectral.hf_noise_rms {
            log(level, LogLevel::Normal, &format!("  HF noise RMS     {rms:>10.2} W"));
        }
    } else {
        log(level, LogLevel::Normal, "\nDecode spectrum: insufficient resolution");
    }

    if let Some(decision) = &analysis.decision {
        log(level, LogLevel::Normal, "\nTier decision:");
        log(
            level,
            LogLevel::Normal,
            &format!("  {} ({}% discount)", decision.tier, decision.discount_percentage),
        );
        log(level, LogLevel::Normal, &format!("  {}", decision.reasoning));
    }
}

fn run_qualify(args: &QualifyArgs, level: LogLevel) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let buffer = load_capture(&args.capture)?;

    let backend = JsonFileBackend::new(&args.store_dir);
    let mut engine = QualificationEngine::new(backend, config)?;

    let declared = DeclaredMetrics::new(args.declared_avg_watts, args.declared_cv);
    let mut environment = HashMap::new();
    environment.insert("source".to_string(), "calificar-cli".to_string());

    let submitted = engine.submit(args.model_id.clone(), declared, environment)?;
    log(level, LogLevel::Verbose, &format!("Submitted qualification {}", submitted.id));

    engine.begin_verification(&submitted.id)?;
    let record = engine.complete_verification(&submitted.id, &buffer, args.tokens)?;

    log(level, LogLevel::Normal, &serde_json::to_string_pretty(&record)?);
    if let Some(reasoning) = &record.reasoning {
        log(level, LogLevel::Verbose, reasoning);
    }
    Ok(())
}

fn run_tiers(args: &TiersArgs, level: LogLevel) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    log(level, LogLevel::Normal, "Tier policy (first match wins):");
    for rule in &config.tier.rules {
        log(
            level,
            LogLevel::Normal,
            &format!(
                "  {}: CV < {:.2}, avg < {:.0} W  ->  {}% discount",
                rule.tier, rule.max_cv, rule.max_avg_power_watts, rule.discount_percentage
            ),
        );
    }
    log(
        level,
        LogLevel::Normal,
        &format!("  otherwise: tier_3, {}% discount", config.tier.fallback_discount),
    );
    Ok(())
}
