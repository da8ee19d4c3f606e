//! Calificar: Power-Telemetry Qualification Engine
//!
//! Turns raw GPU power captures into phase-segmented statistics, spectral
//! stability metrics, pricing-tier decisions, and an auditable qualification
//! record lifecycle.
//!
//! # Pipeline
//!
//! ```text
//! SampleBuffer -> segment() -> MetricsBuilder -> { TierPolicy, spectral }
//!              -> QualificationEngine -> RecordBackend + EventSink
//! ```
//!
//! The measurement pipeline is pure: every stage consumes immutable inputs
//! and produces value records, so independent evaluations can run in
//! parallel. The one shared mutable resource is the record store, owned by
//! [`qualify::QualificationEngine`], which serializes verification per
//! model and emits exactly one event per terminal transition.
//!
//! # Example
//!
//! ```
//! use calificar::config::EngineConfig;
//! use calificar::telemetry::SampleBuffer;
//! use calificar::analysis::analyze_run;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut buffer = SampleBuffer::new();
//! for i in 0..200 {
//!     let t = i as f64 * 0.025;
//!     buffer.push(t, 140.0 + 3.0 * (t * 8.0).sin())?;
//! }
//!
//! let analysis = analyze_run(&buffer, 20_000, &EngineConfig::default())?;
//! assert!(analysis.metrics.avg_power_watts > 0.0);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod qualify;
pub mod spectral;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod tier;

pub use analysis::{analyze_run, RunAnalysis};
pub use config::EngineConfig;
pub use qualify::{
    DeclaredMetrics, QualificationEngine, QualificationRecord, QualificationStatus, QualifyError,
};
pub use stats::RunMetrics;
pub use telemetry::{Phase, PowerSample, SampleBuffer};
pub use tier::{Tier, TierDecision, TierPolicy};
