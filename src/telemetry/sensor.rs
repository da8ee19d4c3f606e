//! Power sensor seam (MTG-002)
//!
//! Hardware-agnostic interface for the power-sampling collaborator. The
//! engine never talks to a driver; an adapter implements [`PowerSensor`]
//! and a [`CaptureSession`] drains it into a [`SampleBuffer`] at a
//! configured interval. The crate ships only [`MockPowerSensor`], a
//! deterministic waveform generator used by tests and the CLI demo.

use serde::{Deserialize, Serialize};

use super::{Result, SampleBuffer};

/// Static description of a power-measurement device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    /// Device name (e.g., "H200", "rack PDU 7")
    pub name: String,
    /// Device kind (e.g., "gpu", "rack")
    pub kind: String,
    /// Maximum sustained power in watts, when the device reports one
    pub max_power_watts: Option<f64>,
}

/// Interface to a power-measurement device.
///
/// Implementations are supplied by the hardware collaborator; each capture
/// receives an explicit sensor handle rather than assuming a process-wide
/// sampling session.
pub trait PowerSensor {
    /// Instantaneous power draw in watts
    fn read_watts(&mut self) -> f64;

    /// Device temperature in Celsius, when available
    fn temperature_celsius(&mut self) -> Option<f64> {
        None
    }

    /// Device description
    fn info(&self) -> SensorInfo;
}

/// Capture parameters. The sampling interval is deployment configuration;
/// nothing downstream assumes a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds between consecutive samples
    pub interval_s: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        // 25 ms, the H200 power-counter refresh the original deployment used
        Self { interval_s: 0.025 }
    }
}

/// Drains a sensor into a sample buffer on a synthetic clock.
///
/// Timestamps are `i * interval_s`; the session never sleeps, so captures
/// against a mock sensor are fully deterministic.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    config: CaptureConfig,
}

impl CaptureSession {
    /// Create a session with the given capture configuration
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Take `count` readings from the sensor
    pub fn capture(&self, sensor: &mut dyn PowerSensor, count: usize) -> Result<SampleBuffer> {
        let mut buffer = SampleBuffer::with_capacity(count);
        for i in 0..count {
            let t = i as f64 * self.config.interval_s;
            buffer.push(t, sensor.read_watts())?;
        }
        Ok(buffer)
    }
}

/// Deterministic sensor that replays an inference-shaped power trace:
/// idle, ramp, prefill plateau, noisy steady decode, fall.
///
/// The waveform follows the temporal model observed on production traces;
/// the "noise" is a fixed small sinusoid so captures are reproducible.
#[derive(Debug, Clone)]
pub struct MockPowerSensor {
    idle_watts: f64,
    peak_watts: f64,
    steady_watts: f64,
    reads: u64,
    interval_s: f64,
}

impl MockPowerSensor {
    /// Create a mock trace generator.
    ///
    /// `interval_s` must match the capture interval so phase boundaries
    /// land at the intended times.
    #[must_use]
    pub fn new(idle_watts: f64, peak_watts: f64, steady_watts: f64, interval_s: f64) -> Self {
        Self { idle_watts, peak_watts, steady_watts, reads: 0, interval_s }
    }

    /// Mock H200-class trace: 45 W idle, 820 W prefill peak, 680 W decode
    #[must_use]
    pub fn h200(interval_s: f64) -> Self {
        Self::new(45.0, 820.0, 680.0, interval_s)
    }

    fn watts_at(&self, t: f64) -> f64 {
        if t < 0.5 {
            self.idle_watts
        } else if t < 1.0 {
            // linear ramp to peak over 0.5 s
            let frac = (t - 0.5) / 0.5;
            self.idle_watts + (self.peak_watts - self.idle_watts) * frac
        } else if t < 2.0 {
            self.peak_watts
        } else if t < 8.0 {
            // steady decode with a shallow 1 Hz ripple; slope stays well
            // under the segmentation thresholds
            self.steady_watts + 0.015 * self.steady_watts * (t * std::f64::consts::TAU).sin()
        } else if t < 9.0 {
            let frac = (t - 8.0) / 1.0;
            (self.steady_watts * (1.0 - frac) + self.idle_watts * frac).max(self.idle_watts)
        } else {
            self.idle_watts
        }
    }
}

impl PowerSensor for MockPowerSensor {
    fn read_watts(&mut self) -> f64 {
        let t = self.reads as f64 * self.interval_s;
        self.reads += 1;
        self.watts_at(t)
    }

    fn temperature_celsius(&mut self) -> Option<f64> {
        Some(63.0)
    }

    fn info(&self) -> SensorInfo {
        SensorInfo {
            name: "mock".to_string(),
            kind: "gpu".to_string(),
            max_power_watts: Some(self.peak_watts),
        }
    }
}
