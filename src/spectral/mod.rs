//! Spectral Analyzer (MTG-005)
//!
//! Power spectral density of the steady-decode phase. Irregular captures
//! are resampled to a uniform rate by linear interpolation, the
//! mean-subtracted signal goes through a forward FFT, and three advisory
//! metrics come out: dominant oscillation frequency, total harmonic
//! distortion, and high-frequency noise RMS.
//!
//! Spectral analysis never blocks qualification: a decode window too short
//! to resolve (fewer than [`SpectralConfig::min_samples`] samples) yields a
//! degraded result flagged `insufficient_resolution` instead of an error.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::telemetry::PowerSample;

/// Spectral analysis parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Uniform rate the decode signal is resampled to, Hz
    pub resample_hz: f64,
    /// Bins above this frequency count as high-frequency noise, Hz
    pub hf_cutoff_hz: f64,
    /// Highest harmonic multiple included in THD
    pub max_harmonic: usize,
    /// Fewest decode samples for a meaningful spectrum
    pub min_samples: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { resample_hz: 40.0, hf_cutoff_hz: 10.0, max_harmonic: 5, min_samples: 8 }
    }
}

/// Spectral metrics for a decode-phase signal.
///
/// All metric fields are `None` when the window is too short
/// (`insufficient_resolution`) or the mean-subtracted signal is flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralAnalysis {
    /// True when the decode window had too few samples to analyze
    pub insufficient_resolution: bool,
    /// Decode samples that went into the analysis
    pub sample_count: usize,
    /// Frequency-bin width, Hz
    pub resolution_hz: Option<f64>,
    /// Frequency bin with maximum PSD, excluding DC
    pub dominant_frequency_hz: Option<f64>,
    /// Harmonic-to-fundamental power ratio, percent. Ratio-based and
    /// uncapped: values above 100% are legitimate when harmonics carry
    /// more combined power than the fundamental.
    pub thd_percent: Option<f64>,
    /// RMS of signal content above the high-frequency cutoff, watts
    pub hf_noise_rms: Option<f64>,
}

impl SpectralAnalysis {
    fn degraded(sample_count: usize) -> Self {
        Self {
            insufficient_resolution: true,
            sample_count,
            resolution_hz: None,
            dominant_frequency_hz: None,
            thd_percent: None,
            hf_noise_rms: None,
        }
    }
}

/// Analyze a decode-phase sample sequence.
pub fn analyze(samples: &[PowerSample], config: &SpectralConfig) -> SpectralAnalysis {
    if samples.len() < config.min_samples {
        return SpectralAnalysis::degraded(samples.len());
    }

    let signal = resample_uniform(samples, config.resample_hz);
    if signal.len() < config.min_samples {
        return SpectralAnalysis::degraded(samples.len());
    }

    let n = signal.len();
    let mean = signal.iter().sum::<f64>() / n as f64;
    let variance = signal.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    let mut analysis = SpectralAnalysis {
        insufficient_resolution: false,
        sample_count: samples.len(),
        resolution_hz: Some(config.resample_hz / n as f64),
        dominant_frequency_hz: None,
        thd_percent: None,
        hf_noise_rms: None,
    };
    // Flat signal: every non-DC bin is numerically zero, so a dominant
    // frequency would be noise-picking.
    if variance < 1e-12 {
        return analysis;
    }

    let psd = power_spectral_density(&signal, mean);
    let half = n / 2;

    let dominant_bin = (1..=half)
        .max_by(|&a, &b| psd[a].total_cmp(&psd[b]))
        .expect("spectrum has at least min_samples / 2 bins");
    let fundamental = psd[dominant_bin];
    analysis.dominant_frequency_hz = Some(dominant_bin as f64 * config.resample_hz / n as f64);

    let mut harmonic_power = 0.0;
    for m in 2..=config.max_harmonic {
        let bin = dominant_bin * m;
        if bin > half {
            break;
        }
        harmonic_power += psd[bin];
    }
    analysis.thd_percent = Some(harmonic_power / fundamental * 100.0);

    // One-sided PSD sum over bins above the cutoff; interior bins carry
    // their mirrored half, the Nyquist bin (n even) does not.
    let mut hf_power = 0.0;
    for (bin, &p) in psd.iter().enumerate().take(half + 1).skip(1) {
        let freq = bin as f64 * config.resample_hz / n as f64;
        if freq <= config.hf_cutoff_hz {
            continue;
        }
        let mirrored = bin < half || n % 2 == 1;
        hf_power += if mirrored { 2.0 * p } else { p };
    }
    analysis.hf_noise_rms = Some((hf_power / n as f64).sqrt());

    analysis
}

/// Resample to a uniform rate by linear interpolation between the
/// bracketing readings.
fn resample_uniform(samples: &[PowerSample], rate_hz: f64) -> Vec<f64> {
    let t0 = samples[0].timestamp_s;
    let span = samples[samples.len() - 1].timestamp_s - t0;
    let count = (span * rate_hz).floor() as usize + 1;
    let dt = 1.0 / rate_hz;

    let mut out = Vec::with_capacity(count);
    let mut right = 1;
    for k in 0..count {
        let t = t0 + k as f64 * dt;
        while right < samples.len() - 1 && samples[right].timestamp_s < t {
            right += 1;
        }
        let a = samples[right - 1];
        let b = samples[right];
        let frac = ((t - a.timestamp_s) / (b.timestamp_s - a.timestamp_s)).clamp(0.0, 1.0);
        out.push(a.watts + (b.watts - a.watts) * frac);
    }
    out
}

/// `|X[k]|^2 / n` over bins `0..=n/2` of the mean-subtracted signal
fn power_spectral_density(signal: &[f64], mean: f64) -> Vec<f64> {
    let n = signal.len();
    let mut spectrum: Vec<Complex<f64>> =
        signal.iter().map(|&x| Complex::new(x - mean, 0.0)).collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut spectrum);

    spectrum.iter().take(n / 2 + 1).map(|x| x.norm_sqr() / n as f64).collect()
}
