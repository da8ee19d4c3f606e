//! Phase segmentation (MTG-003)
//!
//! Partitions a power capture into temporal phases by thresholding the
//! inter-sample derivative dP/dt. Production inference traces show a
//! consistent shape: idle floor, steep ramp, prefill plateau, noisy steady
//! decode, fall back to idle. Fixed time windows do not transfer across
//! models, so boundaries are detected, not assumed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stats::WindowStats;

use super::{PowerSample, SampleBuffer};

/// Temporal phase of an inference run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Power floor between runs
    Idle,
    /// Steep power rise into the run
    Ramp,
    /// Sustained maximum right after the ramp
    Prefill,
    /// Steady token-generation plateau
    Decode,
    /// Power fall-off at run end
    Fall,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Ramp => "ramp",
            Phase::Prefill => "prefill",
            Phase::Decode => "decode",
            Phase::Fall => "fall",
        };
        write!(f, "{name}")
    }
}

/// Derivative thresholds for phase detection.
///
/// All values are deployment configuration; defaults follow observed H200
/// inference traces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Power below this level is idle
    pub idle_watts: f64,
    /// dP/dt above this is a ramp
    pub ramp_dpdt_w_per_s: f64,
    /// dP/dt below this is a fall
    pub fall_dpdt_w_per_s: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self { idle_watts: 60.0, ramp_dpdt_w_per_s: 100.0, fall_dpdt_w_per_s: -100.0 }
    }
}

/// One contiguous phase of a run.
///
/// Windows for a run are contiguous and non-overlapping and cover the
/// buffer span exactly once; boundary samples are shared between
/// neighbouring windows, boundary intervals are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseWindow {
    /// Phase label
    pub phase: Phase,
    /// Window start, seconds
    pub start_s: f64,
    /// Window end, seconds
    pub end_s: f64,
    /// Per-window power statistics
    pub stats: WindowStats,
    /// Mean dP/dt across the window; populated for ramp and fall only
    pub ramp_rate_w_per_s: Option<f64>,
}

/// Errors from phase segmentation
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("segmentation needs at least {need} samples, got {got}; retry with a longer capture window")]
    InsufficientSamples { got: usize, need: usize },
}

/// Fewest samples for which an inter-sample derivative sequence exists
pub const MIN_SAMPLES: usize = 3;

/// Segment a capture into phase windows.
///
/// Each inter-sample interval is labelled from its derivative (ramp and
/// fall take precedence over the idle power test), contiguous same-label
/// intervals merge, and the first sustained maximum after a ramp is
/// relabelled prefill when it stands more than one standard deviation
/// above the steady decode that follows it.
pub fn segment(
    buffer: &SampleBuffer,
    config: &SegmenterConfig,
) -> Result<Vec<PhaseWindow>, SegmentError> {
    let samples = buffer.samples();
    if samples.len() < MIN_SAMPLES {
        return Err(SegmentError::InsufficientSamples { got: samples.len(), need: MIN_SAMPLES });
    }

    let labels = label_intervals(samples, config);
    let mut runs = merge_runs(&labels);
    relabel_prefill(samples, &mut runs);

    let windows = runs
        .into_iter()
        .map(|run| {
            let slice = &samples[run.first_sample..=run.last_sample];
            let start = slice[0];
            let end = slice[slice.len() - 1];
            let ramp_rate = match run.phase {
                Phase::Ramp | Phase::Fall => {
                    Some((end.watts - start.watts) / (end.timestamp_s - start.timestamp_s))
                }
                _ => None,
            };
            PhaseWindow {
                phase: run.phase,
                start_s: start.timestamp_s,
                end_s: end.timestamp_s,
                stats: WindowStats::from_samples(slice),
                ramp_rate_w_per_s: ramp_rate,
            }
        })
        .collect();
    Ok(windows)
}

/// A maximal run of identically-labelled intervals, in sample indices
struct LabelRun {
    phase: Phase,
    /// Index of the first sample of the first interval
    first_sample: usize,
    /// Index of the second sample of the last interval
    last_sample: usize,
}

fn label_intervals(samples: &[PowerSample], config: &SegmenterConfig) -> Vec<Phase> {
    samples
        .windows(2)
        .map(|pair| {
            let dt = pair[1].timestamp_s - pair[0].timestamp_s;
            let dpdt = (pair[1].watts - pair[0].watts) / dt;
            let midpoint = f64::midpoint(pair[0].watts, pair[1].watts);
            if dpdt > config.ramp_dpdt_w_per_s {
                Phase::Ramp
            } else if dpdt < config.fall_dpdt_w_per_s {
                Phase::Fall
            } else if midpoint < config.idle_watts {
                Phase::Idle
            } else {
                Phase::Decode
            }
        })
        .collect()
}

fn merge_runs(labels: &[Phase]) -> Vec<LabelRun> {
    let mut runs: Vec<LabelRun> = Vec::new();
    for (i, &phase) in labels.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.phase == phase => run.last_sample = i + 1,
            _ => runs.push(LabelRun { phase, first_sample: i, last_sample: i + 1 }),
        }
    }
    runs
}

/// Relabel the first decode run after the first ramp as prefill when it
/// stands out against the steady decode that follows it.
fn relabel_prefill(samples: &[PowerSample], runs: &mut [LabelRun]) {
    let Some(ramp_pos) = runs.iter().position(|r| r.phase == Phase::Ramp) else {
        return;
    };
    let Some(candidate_pos) =
        runs.iter().skip(ramp_pos + 1).position(|r| r.phase == Phase::Decode)
    else {
        return;
    };
    let candidate_pos = ramp_pos + 1 + candidate_pos;

    // Steady state = every later decode run
    let steady: Vec<PowerSample> = runs
        .iter()
        .skip(candidate_pos + 1)
        .filter(|r| r.phase == Phase::Decode)
        .flat_map(|r| samples[r.first_sample..=r.last_sample].iter().copied())
        .collect();
    if steady.is_empty() {
        return;
    }

    let steady_stats = WindowStats::from_samples(&steady);
    let candidate = &runs[candidate_pos];
    let candidate_stats =
        WindowStats::from_samples(&samples[candidate.first_sample..=candidate.last_sample]);

    if candidate_stats.avg_watts > steady_stats.avg_watts + steady_stats.stddev_watts {
        runs[candidate_pos].phase = Phase::Prefill;
    }
}
