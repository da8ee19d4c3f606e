//! Run analysis pipeline (MTG-010)
//!
//! The pure composition every caller shares: segment the capture, fold
//! the samples through the statistics builder, attribute energy to the
//! prefill and decode phases, run the spectral analyzer over the steady
//! decode, and classify the result. The verifier and the CLI both call
//! [`analyze_run`]; neither reimplements any stage.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::spectral::{self, SpectralAnalysis};
use crate::stats::{MetricsBuilder, RunMetrics};
use crate::telemetry::{
    segment, Phase, PhaseWindow, PowerSample, SampleBuffer, SegmentError, TelemetryError,
};
use crate::tier::TierDecision;

/// Errors from run analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Complete evaluation of one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAnalysis {
    /// Phase windows covering the capture
    pub windows: Vec<PhaseWindow>,
    /// Whole-run metrics with phase attribution and spectral fields
    pub metrics: RunMetrics,
    /// Decode-phase spectral analysis
    pub spectral: SpectralAnalysis,
    /// Tier decision; `None` when the run-level CV is undefined
    pub decision: Option<TierDecision>,
}

/// Evaluate a completed capture end to end.
pub fn analyze_run(
    buffer: &SampleBuffer,
    tokens_generated: u64,
    config: &EngineConfig,
) -> Result<RunAnalysis, AnalysisError> {
    let windows = segment(buffer, &config.segmenter)?;

    let mut builder = MetricsBuilder::new();
    builder.push_all(buffer.samples())?;
    let mut metrics = builder.finalize(tokens_generated, config.verify.tokens_per_query);

    for window in &windows {
        let duration = window.end_s - window.start_s;
        match window.phase {
            Phase::Prefill => {
                metrics.prefill_energy_joules += window.stats.energy_joules;
                metrics.prefill_duration_seconds += duration;
            }
            Phase::Decode => {
                metrics.decode_energy_joules += window.stats.energy_joules;
                metrics.decode_duration_seconds += duration;
            }
            _ => {}
        }
    }

    // Spectral analysis runs on the longest steady-decode window; stitching
    // disjoint decode windows together would fabricate discontinuities.
    let decode_samples = longest_decode_window(&windows)
        .map(|w| samples_in_window(buffer, w))
        .unwrap_or_default();
    let spectral = spectral::analyze(decode_samples, &config.spectral);
    metrics.dominant_frequency_hz = spectral.dominant_frequency_hz;
    metrics.thd_percent = spectral.thd_percent;
    metrics.hf_noise_rms = spectral.hf_noise_rms;

    let decision =
        metrics.power_cv.map(|cv| config.tier.classify(metrics.avg_power_watts, cv));

    Ok(RunAnalysis { windows, metrics, spectral, decision })
}

fn longest_decode_window(windows: &[PhaseWindow]) -> Option<&PhaseWindow> {
    windows
        .iter()
        .filter(|w| w.phase == Phase::Decode)
        .max_by(|a, b| (a.end_s - a.start_s).total_cmp(&(b.end_s - b.start_s)))
}

fn samples_in_window<'a>(buffer: &'a SampleBuffer, window: &PhaseWindow) -> &'a [PowerSample] {
    let samples = buffer.samples();
    let start = samples.partition_point(|s| s.timestamp_s < window.start_s);
    let end = samples.partition_point(|s| s.timestamp_s <= window.end_s);
    &samples[start..end]
}
