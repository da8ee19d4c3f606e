//! Qualification Module (MTG-007)
//!
//! Records, declared-vs-measured tolerance checks, and the verification
//! state machine behind Model-to-Grid pricing discounts.
//!
//! A developer submits declared efficiency metrics for a model; an
//! independent re-measurement drives the record through
//! `pending -> in_progress -> {qualified, not_qualified}`, and a granted
//! discount expires after its validity window. The tier is always derived
//! from measured truth: a declared/measured mismatch beyond tolerance is
//! recorded as `within_tolerance = false` but never changes the verdict.
//!
//! # Example
//!
//! ```
//! use calificar::config::EngineConfig;
//! use calificar::qualify::{DeclaredMetrics, QualificationEngine, QualificationStatus};
//! use calificar::store::InMemoryBackend;
//! use calificar::telemetry::SampleBuffer;
//! use std::collections::HashMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine =
//!     QualificationEngine::new(InMemoryBackend::new(), EngineConfig::default())?;
//!
//! let declared = DeclaredMetrics::new(145.2, 0.089);
//! let record = engine.submit("qwen3-32b", declared, HashMap::new())?;
//! assert_eq!(record.status, QualificationStatus::Pending);
//!
//! engine.begin_verification(&record.id)?;
//! let mut buffer = SampleBuffer::new();
//! for i in 0..400 {
//!     let t = i as f64 * 0.025;
//!     buffer.push(t, 142.7 + 3.0 * (t * 5.0).sin())?;
//! }
//! let verified = engine.complete_verification(&record.id, &buffer, 20_000)?;
//! assert_eq!(verified.status, QualificationStatus::Qualified);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod events;

pub use engine::{ActivePricing, Page, QualificationEngine, ReadSession, RecordSummary};
pub use events::{EventSink, NullSink, QualificationEvent, VecSink};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisError;
use crate::stats::{RunMetrics, StatsError};
use crate::store::StoreError;
use crate::tier::Tier;

/// Lifecycle status of a qualification record.
///
/// External wording matches the documented API statuses
/// (`qualification_pending`, `verification_in_progress`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualificationStatus {
    /// Submitted, waiting for independent re-measurement
    #[serde(rename = "qualification_pending")]
    Pending,
    /// Re-measurement underway
    #[serde(rename = "verification_in_progress")]
    InProgress,
    /// Discount granted
    #[serde(rename = "qualified")]
    Qualified,
    /// Measured metrics landed in the standard-pricing tier
    #[serde(rename = "not_qualified")]
    NotQualified,
    /// Grant lapsed or was superseded
    #[serde(rename = "expired")]
    Expired,
}

impl QualificationStatus {
    /// Monotonic rank for per-session read ordering: a status may only
    /// move forward through these ranks.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Qualified | Self::NotQualified => 2,
            Self::Expired => 3,
        }
    }

    /// True for qualified/not_qualified/expired
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() >= 2
    }
}

/// Metrics a developer declares at submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredMetrics {
    /// Declared mean power, watts
    pub avg_power_watts: f64,
    /// Declared power coefficient of variation
    pub power_cv: f64,
    /// Declared energy per token, if measured by the developer
    pub joules_per_token: Option<f64>,
    /// Declared tokens per joule, if measured by the developer
    pub tokens_per_joule: Option<f64>,
    /// Number of runs behind the declared figures
    pub declared_runs: Option<u32>,
}

impl DeclaredMetrics {
    /// Declare the two metrics qualification requires
    #[must_use]
    pub fn new(avg_power_watts: f64, power_cv: f64) -> Self {
        Self {
            avg_power_watts,
            power_cv,
            joules_per_token: None,
            tokens_per_joule: None,
            declared_runs: None,
        }
    }

    /// Check the declaration is usable for verification
    pub fn validate(&self) -> Result<()> {
        if !self.avg_power_watts.is_finite() || self.avg_power_watts <= 0.0 {
            return Err(QualifyError::Validation {
                field: "avg_power_watts",
                condition: format!("must be finite and positive, got {}", self.avg_power_watts),
            });
        }
        if !self.power_cv.is_finite() || self.power_cv < 0.0 {
            return Err(QualifyError::Validation {
                field: "power_cv",
                condition: format!("must be finite and non-negative, got {}", self.power_cv),
            });
        }
        Ok(())
    }
}

/// Declared-vs-measured comparison for the tolerance check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceReport {
    /// (measured - declared) / declared * 100 for average power
    pub avg_power_delta_percent: f64,
    /// Same for CV; `None` when the declared CV is zero
    pub cv_delta_percent: Option<f64>,
    /// The tolerance the deltas were checked against, percent
    pub tolerance_percent: f64,
    /// True when every defined delta is within tolerance
    pub within_tolerance: bool,
}

impl ToleranceReport {
    /// Compare measured metrics against a declaration.
    ///
    /// A zero declared CV leaves `cv_delta_percent` undefined; it counts
    /// as within tolerance only when the measured CV is also zero.
    #[must_use]
    pub fn compare(
        declared: &DeclaredMetrics,
        measured_avg_watts: f64,
        measured_cv: f64,
        tolerance_percent: f64,
    ) -> Self {
        let avg_delta =
            (measured_avg_watts - declared.avg_power_watts) / declared.avg_power_watts * 100.0;
        let cv_delta = if declared.power_cv == 0.0 {
            None
        } else {
            Some((measured_cv - declared.power_cv) / declared.power_cv * 100.0)
        };
        let cv_within = match cv_delta {
            Some(delta) => delta.abs() <= tolerance_percent,
            None => measured_cv == 0.0,
        };
        Self {
            avg_power_delta_percent: avg_delta,
            cv_delta_percent: cv_delta,
            tolerance_percent,
            within_tolerance: avg_delta.abs() <= tolerance_percent && cv_within,
        }
    }
}

/// Verification policy for one deployment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Fewest samples an independent re-measurement must supply
    pub min_samples: usize,
    /// Declared-vs-measured tolerance, percent
    pub tolerance_percent: f64,
    /// How long a granted discount stays valid, days
    pub validity_days: i64,
    /// Tokens per query assumed by the Wh-per-1000-queries metric
    pub tokens_per_query: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { min_samples: 20, tolerance_percent: 10.0, validity_days: 365, tokens_per_query: 100 }
    }
}

impl VerifyConfig {
    /// Validity window as a chrono duration
    #[must_use]
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.validity_days)
    }
}

/// One qualification request and its outcome.
///
/// Records are owned by the store, never deleted, and superseded rather
/// than rewritten on requalification; callers receive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationRecord {
    /// Opaque identifier generated at submission
    pub id: String,
    /// Model the qualification applies to
    pub model_id: String,
    /// Metrics declared by the developer
    pub declared: DeclaredMetrics,
    /// Independently measured metrics; set when verification completes
    pub measured: Option<RunMetrics>,
    /// Lifecycle status
    pub status: QualificationStatus,
    /// Granted tier (tier_3 until a verification grants better)
    pub tier: Tier,
    /// Granted discount, percent
    pub discount_percentage: f64,
    /// Declared-vs-measured tolerance outcome
    pub tolerance: Option<ToleranceReport>,
    /// Tier decision reasoning
    pub reasoning: Option<String>,
    /// Free-form description of the submission environment (GPU, driver)
    pub test_environment: HashMap<String, String>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// Verification completion time
    pub verified_at: Option<DateTime<Utc>>,
    /// Grant expiry; set only on qualified records
    pub valid_until: Option<DateTime<Utc>>,
}

impl QualificationRecord {
    /// Shorthand for the tolerance verdict
    #[must_use]
    pub fn within_tolerance(&self) -> Option<bool> {
        self.tolerance.as_ref().map(|t| t.within_tolerance)
    }
}

/// Errors from qualification operations
#[derive(Debug, thiserror::Error)]
pub enum QualifyError {
    #[error("validation failed for {field}: {condition}")]
    Validation { field: &'static str, condition: String },

    #[error("qualification record not found: {0}")]
    NotFound(String),

    #[error("record {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition { id: String, from: QualificationStatus, to: QualificationStatus },

    #[error("a verification is already in progress for model {model_id}")]
    VerificationInProgress { model_id: String },

    #[error("verification needs at least {need} samples, got {got}; record stays in progress and the measurement can be retried")]
    VerificationDataInsufficient { got: usize, need: usize },

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for qualification operations
pub type Result<T> = std::result::Result<T, QualifyError>;
