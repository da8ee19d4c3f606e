//! Power Telemetry Module (MTG-001)
//!
//! Validated sample buffers for GPU power captures, the hardware sensor
//! seam, and derivative-threshold phase segmentation.
//!
//! A [`SampleBuffer`] is the immutable input to every downstream stage:
//! append-only while capturing, then handed to the engine as a completed,
//! time-ordered series. Validation happens at the boundary so the
//! statistics and spectral stages never re-check ordering.

pub mod segment;
pub mod sensor;

pub use segment::{segment, Phase, PhaseWindow, SegmentError, SegmenterConfig};
pub use sensor::{CaptureConfig, CaptureSession, MockPowerSensor, PowerSensor, SensorInfo};

use serde::{Deserialize, Serialize};

/// A single power reading: seconds since capture start, instantaneous watts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Timestamp in seconds, relative to capture start
    pub timestamp_s: f64,
    /// Instantaneous power draw in watts
    pub watts: f64,
}

impl PowerSample {
    /// Create a new sample
    #[must_use]
    pub fn new(timestamp_s: f64, watts: f64) -> Self {
        Self { timestamp_s, watts }
    }
}

/// Errors from sample buffer construction
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("timestamp {timestamp_s} s is older than the last buffered sample at {last_s} s; samples must be time-ordered")]
    UnorderedTimestamps { timestamp_s: f64, last_s: f64 },

    #[error("sample at {timestamp_s} s has non-finite {field}")]
    NonFiniteSample { timestamp_s: f64, field: &'static str },

    #[error("sample at {timestamp_s} s has negative power {watts} W")]
    NegativePower { timestamp_s: f64, watts: f64 },
}

/// Result alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Append-only, time-ordered series of power samples for one capture.
///
/// Invariants enforced at append time:
/// - timestamps strictly increase (a duplicate timestamp keeps the first
///   sample and silently drops the newcomer, so inter-sample derivatives
///   are always defined)
/// - watts and timestamps are finite
/// - watts are non-negative
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SampleBuffer {
    samples: Vec<PowerSample>,
}

impl SampleBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self { samples: Vec::new() }
    }

    /// Create an empty buffer with room for `capacity` samples
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { samples: Vec::with_capacity(capacity) }
    }

    /// Append a reading, enforcing ordering and validity.
    ///
    /// A sample with the same timestamp as the current tail is dropped
    /// (first reading wins); an older timestamp is an error.
    pub fn push(&mut self, timestamp_s: f64, watts: f64) -> Result<()> {
        if !timestamp_s.is_finite() {
            return Err(TelemetryError::NonFiniteSample { timestamp_s, field: "timestamp_s" });
        }
        if !watts.is_finite() {
            return Err(TelemetryError::NonFiniteSample { timestamp_s, field: "watts" });
        }
        if watts < 0.0 {
            return Err(TelemetryError::NegativePower { timestamp_s, watts });
        }
        if let Some(last) = self.samples.last() {
            if timestamp_s == last.timestamp_s {
                return Ok(());
            }
            if timestamp_s < last.timestamp_s {
                return Err(TelemetryError::UnorderedTimestamps {
                    timestamp_s,
                    last_s: last.timestamp_s,
                });
            }
        }
        self.samples.push(PowerSample::new(timestamp_s, watts));
        Ok(())
    }

    /// Build a buffer from a pre-collected series, validating every sample
    pub fn from_samples(samples: impl IntoIterator<Item = PowerSample>) -> Result<Self> {
        let mut buffer = Self::new();
        for s in samples {
            buffer.push(s.timestamp_s, s.watts)?;
        }
        Ok(buffer)
    }

    /// Number of buffered samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Buffered samples, oldest first
    #[must_use]
    pub fn samples(&self) -> &[PowerSample] {
        &self.samples
    }

    /// Capture span in seconds (0.0 with fewer than 2 samples)
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp_s - first.timestamp_s,
            _ => 0.0,
        }
    }
}

impl<'de> Deserialize<'de> for SampleBuffer {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let samples = Vec::<PowerSample>::deserialize(deserializer)?;
        SampleBuffer::from_samples(samples).map_err(serde::de::Error::custom)
    }
}
