//! Statistics Engine (MTG-004)
//!
//! Per-window and whole-run power aggregates: mean, population standard
//! deviation, coefficient of variation, peak, trapezoidal energy integral,
//! and the normalized efficiency metrics (J/token, tokens/J, Wh per 1000
//! queries) used for cross-model comparison.
//!
//! Undefined metrics never abort an evaluation. A metric whose
//! precondition fails (zero mean, zero tokens) is reported as a named
//! [`MetricFailure`] on the run while every well-defined metric is still
//! returned.

use serde::{Deserialize, Serialize};

use crate::telemetry::{PowerSample, TelemetryError};

/// Errors for individual statistics
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("mean power {mean_watts:.3} W is not positive; coefficient of variation is undefined")]
    DegenerateSignal { mean_watts: f64 },

    #[error("{metric} is undefined: division by zero ({denominator} = 0)")]
    DivisionByZero { metric: &'static str, denominator: &'static str },
}

/// Result alias for statistics operations
pub type Result<T> = std::result::Result<T, StatsError>;

/// Coefficient of variation, stddev/mean.
///
/// Fails when the mean is not strictly positive.
pub fn coefficient_of_variation(mean_watts: f64, stddev_watts: f64) -> Result<f64> {
    if mean_watts <= 0.0 {
        return Err(StatsError::DegenerateSignal { mean_watts });
    }
    Ok(stddev_watts / mean_watts)
}

/// Energy in joules by trapezoidal integration of watts over time.
///
/// Robust to irregular sampling intervals; 0.0 with fewer than 2 samples.
#[must_use]
pub fn trapezoid_energy(samples: &[PowerSample]) -> f64 {
    samples
        .windows(2)
        .map(|pair| {
            let dt = pair[1].timestamp_s - pair[0].timestamp_s;
            f64::midpoint(pair[0].watts, pair[1].watts) * dt
        })
        .sum()
}

/// Joules per generated token. Fails when no tokens were generated.
pub fn joules_per_token(energy_joules: f64, tokens_generated: u64) -> Result<f64> {
    if tokens_generated == 0 {
        return Err(StatsError::DivisionByZero {
            metric: "joules_per_token",
            denominator: "tokens_generated",
        });
    }
    Ok(energy_joules / tokens_generated as f64)
}

/// Power statistics over one window of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Mean power in watts
    pub avg_watts: f64,
    /// Maximum power in watts
    pub peak_watts: f64,
    /// Population standard deviation in watts
    pub stddev_watts: f64,
    /// Coefficient of variation; `None` when the mean is not positive
    pub cv: Option<f64>,
    /// Trapezoidal energy integral in joules
    pub energy_joules: f64,
    /// Samples in the window
    pub sample_count: usize,
}

impl WindowStats {
    /// Compute statistics over a sample slice.
    ///
    /// An empty slice yields all-zero stats with `cv = None`.
    #[must_use]
    pub fn from_samples(samples: &[PowerSample]) -> Self {
        if samples.is_empty() {
            return Self {
                avg_watts: 0.0,
                peak_watts: 0.0,
                stddev_watts: 0.0,
                cv: None,
                energy_joules: 0.0,
                sample_count: 0,
            };
        }
        let n = samples.len() as f64;
        let avg = samples.iter().map(|s| s.watts).sum::<f64>() / n;
        let peak = samples.iter().map(|s| s.watts).fold(f64::MIN, f64::max);
        let variance = samples.iter().map(|s| (s.watts - avg).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();
        Self {
            avg_watts: avg,
            peak_watts: peak,
            stddev_watts: stddev,
            cv: coefficient_of_variation(avg, stddev).ok(),
            energy_joules: trapezoid_energy(samples),
            sample_count: samples.len(),
        }
    }
}

/// A named metric that could not be computed for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFailure {
    /// Metric field name, e.g. `"power_cv"`
    pub metric: String,
    /// The condition that made it undefined
    pub condition: String,
}

/// Whole-run metrics.
///
/// Optional fields are metrics that can be individually undefined
/// (degenerate signal, zero tokens) or advisory (spectral); each `None`
/// among the statistical fields is explained by an entry in `failures`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Mean power over the run, watts
    pub avg_power_watts: f64,
    /// Peak power over the run, watts
    pub peak_power_watts: f64,
    /// Coefficient of variation of power (stability proxy)
    pub power_cv: Option<f64>,
    /// Total energy, joules (trapezoidal integral)
    pub total_energy_joules: f64,
    /// Energy per generated token
    pub joules_per_token: Option<f64>,
    /// Tokens per joule (efficiency)
    pub tokens_per_joule: Option<f64>,
    /// Scalability metric: Wh per 1000 queries at the configured
    /// tokens-per-query
    pub wh_per_1k_queries: Option<f64>,
    /// Run duration, seconds
    pub duration_seconds: f64,
    /// Tokens generated during the run
    pub tokens_generated: u64,
    /// Number of power samples behind these metrics
    pub samples_tested: usize,
    /// Energy attributed to prefill windows, joules
    pub prefill_energy_joules: f64,
    /// Energy attributed to steady-decode windows, joules
    pub decode_energy_joules: f64,
    /// Time spent in prefill windows, seconds
    pub prefill_duration_seconds: f64,
    /// Time spent in steady-decode windows, seconds
    pub decode_duration_seconds: f64,
    /// Collaborator-reported thermal throttling during the capture
    pub thermal_throttled: bool,
    /// Collaborator-reported power-limit throttling during the capture
    pub power_throttled: bool,
    /// Dominant spectral frequency of the decode phase, Hz
    pub dominant_frequency_hz: Option<f64>,
    /// Total harmonic distortion of the decode phase, percent (uncapped)
    pub thd_percent: Option<f64>,
    /// RMS of decode-phase power above the high-frequency cutoff
    pub hf_noise_rms: Option<f64>,
    /// Metrics that could not be computed, with the triggering condition
    pub failures: Vec<MetricFailure>,
}

impl RunMetrics {
    /// The recorded failure for a metric field, if any
    #[must_use]
    pub fn failure_for(&self, metric: &str) -> Option<&MetricFailure> {
        self.failures.iter().find(|f| f.metric == metric)
    }
}

/// Streaming accumulator for run-level power statistics.
///
/// The one mutable stage of the pipeline: samples arrive one at a time
/// from a capture in progress, partial aggregates accumulate, and
/// [`finalize`](MetricsBuilder::finalize) produces an immutable
/// [`RunMetrics`]. Ordering is enforced with the same rules as
/// [`SampleBuffer`](crate::telemetry::SampleBuffer): duplicates keep the
/// first reading, regressions are errors.
#[derive(Debug, Clone, Default)]
pub struct MetricsBuilder {
    count: usize,
    sum_watts: f64,
    sum_sq_watts: f64,
    peak_watts: f64,
    energy_joules: f64,
    first: Option<PowerSample>,
    last: Option<PowerSample>,
}

impl MetricsBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one sample
    pub fn push(&mut self, sample: PowerSample) -> std::result::Result<(), TelemetryError> {
        if !sample.timestamp_s.is_finite() {
            return Err(TelemetryError::NonFiniteSample {
                timestamp_s: sample.timestamp_s,
                field: "timestamp_s",
            });
        }
        if !sample.watts.is_finite() {
            return Err(TelemetryError::NonFiniteSample {
                timestamp_s: sample.timestamp_s,
                field: "watts",
            });
        }
        if sample.watts < 0.0 {
            return Err(TelemetryError::NegativePower {
                timestamp_s: sample.timestamp_s,
                watts: sample.watts,
            });
        }
        if let Some(last) = self.last {
            if sample.timestamp_s == last.timestamp_s {
                return Ok(());
            }
            if sample.timestamp_s < last.timestamp_s {
                return Err(TelemetryError::UnorderedTimestamps {
                    timestamp_s: sample.timestamp_s,
                    last_s: last.timestamp_s,
                });
            }
            self.energy_joules +=
                f64::midpoint(last.watts, sample.watts) * (sample.timestamp_s - last.timestamp_s);
        } else {
            self.first = Some(sample);
        }
        self.count += 1;
        self.sum_watts += sample.watts;
        self.sum_sq_watts += sample.watts * sample.watts;
        self.peak_watts = self.peak_watts.max(sample.watts);
        self.last = Some(sample);
        Ok(())
    }

    /// Accumulate every sample of a completed buffer
    pub fn push_all(&mut self, samples: &[PowerSample]) -> std::result::Result<(), TelemetryError> {
        for &s in samples {
            self.push(s)?;
        }
        Ok(())
    }

    /// Samples accumulated so far
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.count
    }

    /// Finalize into run metrics.
    ///
    /// Metrics whose preconditions fail are reported in
    /// [`RunMetrics::failures`] instead of aborting; phase attribution,
    /// throttle flags, and spectral results are filled in by the caller
    /// (see [`crate::analysis::analyze_run`]).
    #[must_use]
    pub fn finalize(self, tokens_generated: u64, tokens_per_query: u32) -> RunMetrics {
        let n = self.count as f64;
        let avg = if self.count > 0 { self.sum_watts / n } else { 0.0 };
        let variance = if self.count > 0 { (self.sum_sq_watts / n - avg * avg).max(0.0) } else { 0.0 };
        let stddev = variance.sqrt();
        let duration = match (self.first, self.last) {
            (Some(first), Some(last)) => last.timestamp_s - first.timestamp_s,
            _ => 0.0,
        };

        let mut failures = Vec::new();
        let power_cv = match coefficient_of_variation(avg, stddev) {
            Ok(cv) => Some(cv),
            Err(e) => {
                failures.push(MetricFailure { metric: "power_cv".into(), condition: e.to_string() });
                None
            }
        };
        let jpt = match joules_per_token(self.energy_joules, tokens_generated) {
            Ok(v) => Some(v),
            Err(e) => {
                failures
                    .push(MetricFailure { metric: "joules_per_token".into(), condition: e.to_string() });
                None
            }
        };
        let tokens_per_joule = match jpt {
            Some(v) if v > 0.0 => Some(1.0 / v),
            Some(_) => {
                failures.push(MetricFailure {
                    metric: "tokens_per_joule".into(),
                    condition: "joules_per_token is zero".into(),
                });
                None
            }
            None => None,
        };
        let wh_per_1k = jpt.map(|v| v * f64::from(tokens_per_query) * 1000.0 / 3600.0);

        RunMetrics {
            avg_power_watts: avg,
            peak_power_watts: if self.count > 0 { self.peak_watts } else { 0.0 },
            power_cv,
            total_energy_joules: self.energy_joules,
            joules_per_token: jpt,
            tokens_per_joule,
            wh_per_1k_queries: wh_per_1k,
            duration_seconds: duration,
            tokens_generated,
            samples_tested: self.count,
            prefill_energy_joules: 0.0,
            decode_energy_joules: 0.0,
            prefill_duration_seconds: 0.0,
            decode_duration_seconds: 0.0,
            thermal_throttled: false,
            power_throttled: false,
            dominant_frequency_hz: None,
            thd_percent: None,
            hf_noise_rms: None,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn samples(pairs: &[(f64, f64)]) -> Vec<PowerSample> {
        pairs.iter().map(|&(t, w)| PowerSample::new(t, w)).collect()
    }

    #[test]
    fn test_trapezoid_uniform_grid_matches_closed_form() {
        // Constant 100 W for 2 s = 200 J regardless of sampling rate
        let s = samples(&[(0.0, 100.0), (0.5, 100.0), (1.0, 100.0), (2.0, 100.0)]);
        assert!((trapezoid_energy(&s) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_trapezoid_irregular_intervals() {
        // Linear ramp 0 -> 100 W over 1 s = 50 J; irregular sample spacing
        // must not change the integral of a linear signal.
        let s = samples(&[(0.0, 0.0), (0.1, 10.0), (0.35, 35.0), (0.9, 90.0), (1.0, 100.0)]);
        assert!((trapezoid_energy(&s) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_cv_degenerate_mean() {
        let err = coefficient_of_variation(0.0, 1.0).unwrap_err();
        assert!(matches!(err, StatsError::DegenerateSignal { .. }));
        assert!(err.to_string().contains("coefficient of variation"));
    }

    #[test]
    fn test_cv_not_translation_invariant() {
        // Same stddev, shifted mean: cv must change
        let cv_low = coefficient_of_variation(100.0, 10.0).unwrap();
        let cv_high = coefficient_of_variation(200.0, 10.0).unwrap();
        assert!(cv_low > cv_high);
        assert!((cv_low - 0.10).abs() < 1e-12);
        assert!((cv_high - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_joules_per_token_zero_tokens() {
        let err = joules_per_token(1000.0, 0).unwrap_err();
        assert!(matches!(err, StatsError::DivisionByZero { .. }));
        assert!(err.to_string().contains("tokens_generated"));
    }

    #[test]
    fn test_window_stats_basic() {
        let s = samples(&[(0.0, 140.0), (1.0, 150.0), (2.0, 160.0)]);
        let stats = WindowStats::from_samples(&s);
        assert_relative_eq!(stats.avg_watts, 150.0);
        assert_relative_eq!(stats.peak_watts, 160.0);
        // population stddev of {140, 150, 160}
        assert_relative_eq!(stats.stddev_watts, (200.0f64 / 3.0).sqrt(), epsilon = 1e-9);
        assert_relative_eq!(stats.energy_joules, 300.0);
        assert_eq!(stats.sample_count, 3);
    }

    #[test]
    fn test_builder_matches_batch_stats() {
        let s = samples(&[(0.0, 120.0), (0.5, 135.0), (1.25, 150.0), (2.0, 140.0)]);
        let batch = WindowStats::from_samples(&s);
        let mut builder = MetricsBuilder::new();
        builder.push_all(&s).unwrap();
        let run = builder.finalize(1000, 100);
        assert!((run.avg_power_watts - batch.avg_watts).abs() < 1e-9);
        assert!((run.peak_power_watts - batch.peak_watts).abs() < 1e-9);
        assert!((run.total_energy_joules - batch.energy_joules).abs() < 1e-9);
        assert!((run.power_cv.unwrap() - batch.cv.unwrap()).abs() < 1e-9);
        assert_eq!(run.samples_tested, 4);
    }

    #[test]
    fn test_builder_drops_duplicate_timestamps() {
        let mut builder = MetricsBuilder::new();
        builder.push(PowerSample::new(0.0, 100.0)).unwrap();
        builder.push(PowerSample::new(0.0, 500.0)).unwrap();
        builder.push(PowerSample::new(1.0, 100.0)).unwrap();
        let run = builder.finalize(10, 100);
        assert_eq!(run.samples_tested, 2);
        assert!((run.total_energy_joules - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_builder_rejects_regression() {
        let mut builder = MetricsBuilder::new();
        builder.push(PowerSample::new(1.0, 100.0)).unwrap();
        assert!(builder.push(PowerSample::new(0.5, 100.0)).is_err());
    }

    #[test]
    fn test_efficiency_metrics_scenario() {
        // 142.7 W held for ~18.22 s gives ~2600 J; 20 000 tokens
        // -> 0.13 J/token, ~7.69 tokens/J.
        let duration = 2600.0 / 142.7;
        let mut builder = MetricsBuilder::new();
        let n = 200;
        for i in 0..=n {
            let t = duration * i as f64 / n as f64;
            builder.push(PowerSample::new(t, 142.7)).unwrap();
        }
        let run = builder.finalize(20_000, 100);
        assert_relative_eq!(run.joules_per_token.unwrap(), 0.13, epsilon = 1e-3);
        assert_relative_eq!(run.tokens_per_joule.unwrap(), 1.0 / 0.13, epsilon = 0.05);
        // Wh per 1k queries at 100 tokens/query: 0.13 * 100 * 1000 / 3600
        assert_relative_eq!(run.wh_per_1k_queries.unwrap(), 3.611, epsilon = 0.05);
    }

    #[test]
    fn test_zero_tokens_reports_failure_keeps_other_metrics() {
        let mut builder = MetricsBuilder::new();
        builder.push(PowerSample::new(0.0, 100.0)).unwrap();
        builder.push(PowerSample::new(1.0, 100.0)).unwrap();
        let run = builder.finalize(0, 100);
        assert!(run.joules_per_token.is_none());
        assert!(run.failure_for("joules_per_token").is_some());
        assert!((run.avg_power_watts - 100.0).abs() < 1e-9);
        assert!(run.power_cv.is_some());
    }

    #[test]
    fn test_all_zero_signal_reports_cv_failure() {
        let mut builder = MetricsBuilder::new();
        builder.push(PowerSample::new(0.0, 0.0)).unwrap();
        builder.push(PowerSample::new(1.0, 0.0)).unwrap();
        let run = builder.finalize(10, 100);
        assert!(run.power_cv.is_none());
        let failure = run.failure_for("power_cv").unwrap();
        assert!(failure.condition.contains("not positive"));
    }

    #[test]
    fn test_run_metrics_serde_bit_identical() {
        let mut builder = MetricsBuilder::new();
        for i in 0..50 {
            let t = i as f64 * 0.025;
            builder.push(PowerSample::new(t, 142.7 + (t * 3.1).sin() * 12.7)).unwrap();
        }
        let run = builder.finalize(20_000, 100);
        let json = serde_json::to_string(&run).unwrap();
        let parsed: RunMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.avg_power_watts.to_bits(), run.avg_power_watts.to_bits());
        assert_eq!(parsed.total_energy_joules.to_bits(), run.total_energy_joules.to_bits());
        assert_eq!(
            parsed.power_cv.unwrap().to_bits(),
            run.power_cv.unwrap().to_bits()
        );
        assert_eq!(
            parsed.joules_per_token.unwrap().to_bits(),
            run.joules_per_token.unwrap().to_bits()
        );
        assert_eq!(parsed, run);
    }
}
