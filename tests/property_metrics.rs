//! Property tests for the measurement pipeline
//!
//! Ensures the statistics, segmentation, and tiering stages satisfy their
//! invariants over arbitrary valid captures:
//! - CV is non-negative and scales with the mean (not translation-invariant)
//! - trapezoidal energy matches closed forms and splits additively
//! - segmentation windows tile the capture span exactly
//! - tier classification is deterministic and total
//! - serialized metrics round-trip bit-identically

use calificar::config::EngineConfig;
use calificar::stats::{trapezoid_energy, MetricsBuilder, RunMetrics, WindowStats};
use calificar::telemetry::{segment, PowerSample, SampleBuffer, SegmenterConfig};
use calificar::tier::TierPolicy;
use proptest::collection::vec;
use proptest::prelude::*;

// =============================================================================
// Strategy Helpers
// =============================================================================

/// Generate a time-ordered sample series from positive inter-sample gaps
fn sample_series(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<PowerSample>> {
    vec((0.001f64..0.5, 0.0f64..1000.0), len).prop_map(|pairs| {
        let mut t = 0.0;
        pairs
            .into_iter()
            .map(|(dt, watts)| {
                t += dt;
                PowerSample::new(t, watts)
            })
            .collect()
    })
}

/// Series with strictly positive power, so CV is always defined
fn positive_series(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<PowerSample>> {
    vec((0.001f64..0.5, 1.0f64..1000.0), len).prop_map(|pairs| {
        let mut t = 0.0;
        pairs
            .into_iter()
            .map(|(dt, watts)| {
                t += dt;
                PowerSample::new(t, watts)
            })
            .collect()
    })
}

// =============================================================================
// Statistics Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_cv_is_non_negative(samples in positive_series(2..80)) {
        let stats = WindowStats::from_samples(&samples);
        let cv = stats.cv.expect("positive signal has defined CV");
        prop_assert!(cv >= 0.0);
        prop_assert!(cv.is_finite());
    }

    #[test]
    fn prop_cv_shrinks_under_positive_offset(
        samples in positive_series(3..60),
        offset in 10.0f64..500.0,
    ) {
        // CV is not translation-invariant: adding a constant offset
        // raises the mean, keeps the stddev, and so shrinks the CV
        // whenever the signal has any variance.
        let stats = WindowStats::from_samples(&samples);
        let shifted: Vec<PowerSample> = samples
            .iter()
            .map(|s| PowerSample::new(s.timestamp_s, s.watts + offset))
            .collect();
        let shifted_stats = WindowStats::from_samples(&shifted);

        prop_assert!((shifted_stats.stddev_watts - stats.stddev_watts).abs() < 1e-6);
        if stats.stddev_watts > 1e-9 {
            prop_assert!(shifted_stats.cv.unwrap() < stats.cv.unwrap());
        }
    }

    #[test]
    fn prop_constant_signal_energy_closed_form(
        watts in 1.0f64..1000.0,
        gaps in vec(0.001f64..0.5, 2..50),
    ) {
        // Energy of a constant signal is watts * span for any grid.
        let mut t = 0.0;
        let samples: Vec<PowerSample> = gaps
            .iter()
            .map(|dt| {
                t += dt;
                PowerSample::new(t, watts)
            })
            .collect();
        let span = samples[samples.len() - 1].timestamp_s - samples[0].timestamp_s;
        let energy = trapezoid_energy(&samples);
        prop_assert!((energy - watts * span).abs() < 1e-6 * watts.max(1.0));
    }

    #[test]
    fn prop_energy_splits_additively(samples in sample_series(4..80), split_frac in 0.2f64..0.8) {
        // Integrating two halves that share a boundary sample equals
        // integrating the whole.
        let split = ((samples.len() as f64 * split_frac) as usize).clamp(1, samples.len() - 2);
        let whole = trapezoid_energy(&samples);
        let left = trapezoid_energy(&samples[..=split]);
        let right = trapezoid_energy(&samples[split..]);
        prop_assert!((left + right - whole).abs() < 1e-6 * whole.abs().max(1.0));
    }

    #[test]
    fn prop_builder_matches_batch(samples in sample_series(2..80)) {
        let batch = WindowStats::from_samples(&samples);
        let mut builder = MetricsBuilder::new();
        builder.push_all(&samples).unwrap();
        let run = builder.finalize(100, 100);

        prop_assert!((run.avg_power_watts - batch.avg_watts).abs() < 1e-6);
        prop_assert!((run.peak_power_watts - batch.peak_watts).abs() < 1e-9);
        prop_assert!((run.total_energy_joules - batch.energy_joules).abs() < 1e-6);
        prop_assert_eq!(run.samples_tested, samples.len());
    }
}

// =============================================================================
// Buffer Ordering Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_reversed_series_is_rejected(samples in sample_series(2..40)) {
        let reversed: Vec<PowerSample> = samples.into_iter().rev().collect();
        prop_assert!(SampleBuffer::from_samples(reversed).is_err());
    }

    #[test]
    fn prop_ordered_series_is_accepted(samples in sample_series(1..60)) {
        let len = samples.len();
        let buffer = SampleBuffer::from_samples(samples).unwrap();
        prop_assert_eq!(buffer.len(), len);
    }
}

// =============================================================================
// Segmentation Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_windows_tile_the_span(samples in sample_series(3..120)) {
        let first = samples[0].timestamp_s;
        let last = samples[samples.len() - 1].timestamp_s;
        let buffer = SampleBuffer::from_samples(samples).unwrap();
        let windows = segment(&buffer, &SegmenterConfig::default()).unwrap();

        prop_assert!(!windows.is_empty());
        prop_assert!((windows[0].start_s - first).abs() < 1e-9);
        prop_assert!((windows[windows.len() - 1].end_s - last).abs() < 1e-9);
        for w in &windows {
            prop_assert!(w.start_s < w.end_s);
        }
        for pair in windows.windows(2) {
            prop_assert!((pair[0].end_s - pair[1].start_s).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_window_energy_sums_to_total(samples in sample_series(3..120)) {
        let total = trapezoid_energy(&samples);
        let buffer = SampleBuffer::from_samples(samples).unwrap();
        let windows = segment(&buffer, &SegmenterConfig::default()).unwrap();
        let summed: f64 = windows.iter().map(|w| w.stats.energy_joules).sum();
        prop_assert!((summed - total).abs() < 1e-6 * total.abs().max(1.0));
    }
}

// =============================================================================
// Tier Classification Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_classification_is_idempotent(avg in 0.0f64..500.0, cv in 0.0f64..0.6) {
        let policy = TierPolicy::default();
        let first = policy.classify(avg, cv);
        let second = policy.classify(avg, cv);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_classification_matches_ordered_rules(avg in 0.0f64..500.0, cv in 0.0f64..0.6) {
        let decision = TierPolicy::default().classify(avg, cv);
        let expected = if cv < 0.10 && avg < 150.0 {
            (calificar::Tier::Tier1, 20.0)
        } else if cv < 0.15 && avg < 200.0 {
            (calificar::Tier::Tier2, 10.0)
        } else {
            (calificar::Tier::Tier3, 0.0)
        };
        prop_assert_eq!((decision.tier, decision.discount_percentage), expected);
    }
}

// =============================================================================
// Serialization Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_run_metrics_roundtrip_bit_identical(samples in positive_series(2..60)) {
        let mut builder = MetricsBuilder::new();
        builder.push_all(&samples).unwrap();
        let run = builder.finalize(1234, 100);

        let json = serde_json::to_string(&run).unwrap();
        let parsed: RunMetrics = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(parsed.avg_power_watts.to_bits(), run.avg_power_watts.to_bits());
        prop_assert_eq!(parsed.peak_power_watts.to_bits(), run.peak_power_watts.to_bits());
        prop_assert_eq!(
            parsed.total_energy_joules.to_bits(),
            run.total_energy_joules.to_bits()
        );
        prop_assert_eq!(&parsed, &run);
    }
}

// =============================================================================
// Pipeline Robustness
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_analyze_run_never_panics_on_valid_buffers(samples in sample_series(3..100)) {
        let buffer = SampleBuffer::from_samples(samples).unwrap();
        let analysis = calificar::analyze_run(&buffer, 1000, &EngineConfig::default()).unwrap();
        prop_assert_eq!(analysis.metrics.samples_tested, buffer.len());
        prop_assert!(analysis.metrics.total_energy_joules >= 0.0);
    }
}
