//! Qualification engine
//!
//! Drives the record lifecycle over a pluggable [`RecordBackend`]:
//! submission, independent verification, supersession, lazy expiry,
//! pricing lookup, and event emission. The engine is the single owner of
//! record mutation; everything upstream of it is a pure pipeline.
//!
//! Concurrency contract: at most one in-flight verification per model
//! (a per-model lease, taken by [`begin_verification`] and released by a
//! terminal transition or [`abandon_verification`]); reads never block and
//! are monotonic per [`ReadSession`].
//!
//! [`begin_verification`]: QualificationEngine::begin_verification
//! [`abandon_verification`]: QualificationEngine::abandon_verification

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::analyze_run;
use crate::config::EngineConfig;
use crate::stats::StatsError;
use crate::store::RecordBackend;
use crate::telemetry::SampleBuffer;
use crate::tier::Tier;

use super::events::{EventSink, NullSink, QualificationEvent};
use super::{
    DeclaredMetrics, QualificationRecord, QualificationStatus, QualifyError, Result,
    ToleranceReport,
};

/// Active pricing for a model: the live grant, or standard pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePricing {
    /// Tier currently in force
    pub tier: Tier,
    /// Discount currently in force, percent
    pub discount_percentage: f64,
    /// Record backing the grant; `None` on the standard-pricing default
    pub qualification_id: Option<String>,
}

impl ActivePricing {
    fn standard() -> Self {
        Self { tier: Tier::Tier3, discount_percentage: 0.0, qualification_id: None }
    }
}

/// Listing row for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    /// Record id
    pub id: String,
    /// Model the record belongs to
    pub model_id: String,
    /// Current status
    pub status: QualificationStatus,
    /// Granted tier
    pub tier: Tier,
    /// Granted discount, percent
    pub discount_percentage: f64,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

impl From<&QualificationRecord> for RecordSummary {
    fn from(record: &QualificationRecord) -> Self {
        Self {
            id: record.id.clone(),
            model_id: record.model_id.clone(),
            status: record.status,
            tier: record.tier,
            discount_percentage: record.discount_percentage,
            submitted_at: record.submitted_at,
        }
    }
}

/// One page of a record listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Rows on this page, submission order
    pub items: Vec<RecordSummary>,
    /// Matching records across all pages
    pub total: usize,
    /// Requested page size
    pub limit: usize,
    /// Requested offset
    pub offset: usize,
}

/// Per-caller monotonic read view.
///
/// A status returned through a session never moves backwards: if the
/// session has already seen a later lifecycle rank for a record, the
/// later snapshot is returned again instead of the regression.
#[derive(Debug, Clone, Default)]
pub struct ReadSession {
    seen: HashMap<String, QualificationRecord>,
}

impl ReadSession {
    /// Start a fresh session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, record: QualificationRecord) -> QualificationRecord {
        match self.seen.get(&record.id) {
            Some(prior) if prior.status.rank() > record.status.rank() => prior.clone(),
            _ => {
                self.seen.insert(record.id.clone(), record.clone());
                record
            }
        }
    }
}

/// Qualification engine over a pluggable record backend
pub struct QualificationEngine<B: RecordBackend> {
    backend: B,
    config: EngineConfig,
    /// model_id -> record ids, submission order
    by_model: HashMap<String, Vec<String>>,
    /// model_ids with an in-flight verification
    leases: HashSet<String>,
    sink: Box<dyn EventSink>,
}

impl<B: RecordBackend> QualificationEngine<B> {
    /// Open an engine over a backend, rebuilding the model index (and
    /// leases for records left in progress) from stored records.
    pub fn new(backend: B, config: EngineConfig) -> Result<Self> {
        let mut by_model: HashMap<String, Vec<String>> = HashMap::new();
        let mut leases = HashSet::new();
        for record in backend.list()? {
            by_model.entry(record.model_id.clone()).or_default().push(record.id.clone());
            if record.status == QualificationStatus::InProgress {
                leases.insert(record.model_id.clone());
            }
        }
        Ok(Self { backend, config, by_model, leases, sink: Box::new(NullSink) })
    }

    /// Register the sink terminal-transition events are emitted to
    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sink = sink;
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a model for qualification.
    ///
    /// Creates a pending record. Rate limiting is enforced by the calling
    /// adapter, not here; see [`QualifyError::RateLimited`].
    pub fn submit(
        &mut self,
        model_id: impl Into<String>,
        declared: DeclaredMetrics,
        test_environment: HashMap<String, String>,
    ) -> Result<QualificationRecord> {
        declared.validate()?;
        let model_id = model_id.into();
        if model_id.is_empty() {
            return Err(QualifyError::Validation {
                field: "model_id",
                condition: "must not be empty".to_string(),
            });
        }

        let record = QualificationRecord {
            id: generate_id(),
            model_id: model_id.clone(),
            declared,
            measured: None,
            status: QualificationStatus::Pending,
            tier: Tier::Tier3,
            discount_percentage: 0.0,
            tolerance: None,
            reasoning: None,
            test_environment,
            submitted_at: Utc::now(),
            verified_at: None,
            valid_until: None,
        };
        self.backend.save(&record)?;
        self.by_model.entry(model_id).or_default().push(record.id.clone());
        Ok(record)
    }

    /// Request requalification with updated declared metrics.
    ///
    /// Creates a new pending record; the prior record (active or not) is
    /// left untouched and stays queryable for audit. The active grant is
    /// superseded only when the new record reaches `qualified`.
    pub fn requalify(
        &mut self,
        model_id: impl Into<String>,
        declared: DeclaredMetrics,
        test_environment: HashMap<String, String>,
    ) -> Result<QualificationRecord> {
        self.submit(model_id, declared, test_environment)
    }

    /// Look up a record by id, applying lazy expiry
    pub fn get_status(&mut self, id: &str) -> Result<QualificationRecord> {
        let record = self.load(id)?;
        self.refresh(record)
    }

    /// Look up a record through a monotonic read session
    pub fn get_status_session(
        &mut self,
        session: &mut ReadSession,
        id: &str,
    ) -> Result<QualificationRecord> {
        let record = self.get_status(id)?;
        Ok(session.observe(record))
    }

    /// List a model's records in submission order, optionally filtered by
    /// status, one page at a time
    pub fn list(
        &mut self,
        model_id: &str,
        status_filter: Option<QualificationStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Page> {
        let ids = self.by_model.get(model_id).cloned().unwrap_or_default();
        let mut matching = Vec::new();
        for id in &ids {
            let record = self.load(id)?;
            let record = self.refresh(record)?;
            if status_filter.is_none_or(|status| record.status == status) {
                matching.push(record);
            }
        }
        let total = matching.len();
        let items =
            matching.iter().skip(offset).take(limit).map(RecordSummary::from).collect();
        Ok(Page { items, total, limit, offset })
    }

    /// Pricing currently in force for a model: the single unexpired
    /// qualified record, or the standard-pricing default
    pub fn get_active_pricing(&mut self, model_id: &str) -> Result<ActivePricing> {
        let ids = self.by_model.get(model_id).cloned().unwrap_or_default();
        for id in &ids {
            let record = self.load(id)?;
            let record = self.refresh(record)?;
            if record.status == QualificationStatus::Qualified {
                return Ok(ActivePricing {
                    tier: record.tier,
                    discount_percentage: record.discount_percentage,
                    qualification_id: Some(record.id),
                });
            }
        }
        Ok(ActivePricing::standard())
    }

    /// Start independent re-measurement for a pending record.
    ///
    /// Takes the model's verification lease; a second begin for the same
    /// model fails until the first verification reaches a terminal state
    /// or is abandoned.
    pub fn begin_verification(&mut self, id: &str) -> Result<QualificationRecord> {
        let mut record = self.load(id)?;
        if record.status != QualificationStatus::Pending {
            return Err(QualifyError::InvalidTransition {
                id: record.id,
                from: record.status,
                to: QualificationStatus::InProgress,
            });
        }
        if self.leases.contains(&record.model_id) {
            return Err(QualifyError::VerificationInProgress { model_id: record.model_id });
        }
        record.status = QualificationStatus::InProgress;
        self.backend.save(&record)?;
        self.leases.insert(record.model_id.clone());
        Ok(record)
    }

    /// Complete verification from an independently measured capture.
    ///
    /// The whole measurement pipeline runs before any record mutation, so
    /// a failed evaluation leaves the record in progress and retryable.
    /// The tier is derived from measured metrics only; the declared
    /// comparison is recorded informationally on the tolerance report.
    pub fn complete_verification(
        &mut self,
        id: &str,
        buffer: &SampleBuffer,
        tokens_generated: u64,
    ) -> Result<QualificationRecord> {
        let mut record = self.load(id)?;
        if record.status != QualificationStatus::InProgress {
            return Err(QualifyError::InvalidTransition {
                id: record.id,
                from: record.status,
                to: QualificationStatus::Qualified,
            });
        }
        let min_samples = self.config.verify.min_samples;
        if buffer.len() < min_samples {
            return Err(QualifyError::VerificationDataInsufficient {
                got: buffer.len(),
                need: min_samples,
            });
        }

        // Evaluate everything before touching stored state.
        let analysis = analyze_run(buffer, tokens_generated, &self.config)?;
        let metrics = analysis.metrics;
        let cv = metrics
            .power_cv
            .ok_or(StatsError::DegenerateSignal { mean_watts: metrics.avg_power_watts })?;
        let decision = self.config.tier.classify(metrics.avg_power_watts, cv);
        let tolerance = ToleranceReport::compare(
            &record.declared,
            metrics.avg_power_watts,
            cv,
            self.config.verify.tolerance_percent,
        );
        let now = Utc::now();
        let new_status = if decision.qualified {
            QualificationStatus::Qualified
        } else {
            QualificationStatus::NotQualified
        };

        // Commit: supersede the previous grant first, then this record,
        // emitting events in transition order.
        if new_status == QualificationStatus::Qualified {
            self.supersede_active(&record.model_id, &record.id)?;
        }

        record.measured = Some(metrics);
        record.status = new_status;
        record.tier = decision.tier;
        record.discount_percentage = decision.discount_percentage;
        record.tolerance = Some(tolerance);
        record.reasoning = Some(decision.reasoning);
        record.verified_at = Some(now);
        record.valid_until = (new_status == QualificationStatus::Qualified)
            .then(|| now + self.config.verify.validity());

        self.backend.save(&record)?;
        self.leases.remove(&record.model_id);
        self.emit_terminal(&record);
        Ok(record)
    }

    /// Abandon an in-flight verification, rolling the record back to
    /// pending and releasing the model's lease. No event is emitted; the
    /// transition is not terminal.
    pub fn abandon_verification(&mut self, id: &str) -> Result<QualificationRecord> {
        let mut record = self.load(id)?;
        if record.status != QualificationStatus::InProgress {
            return Err(QualifyError::InvalidTransition {
                id: record.id,
                from: record.status,
                to: QualificationStatus::Pending,
            });
        }
        record.status = QualificationStatus::Pending;
        self.backend.save(&record)?;
        self.leases.remove(&record.model_id);
        Ok(record)
    }

    fn load(&self, id: &str) -> Result<QualificationRecord> {
        self.backend.load(id).map_err(|_| QualifyError::NotFound(id.to_string()))
    }

    /// Lazy expiry: flip a qualified record whose validity lapsed.
    /// Runs on every read path, so no background timer is needed.
    fn refresh(&mut self, mut record: QualificationRecord) -> Result<QualificationRecord> {
        let lapsed = record.status == QualificationStatus::Qualified
            && record.valid_until.is_some_and(|until| Utc::now() > until);
        if lapsed {
            record.status = QualificationStatus::Expired;
            self.backend.save(&record)?;
            self.emit_expired(&record);
        }
        Ok(record)
    }

    /// Expire any currently-qualified record for a model other than
    /// `keep_id`, preserving the one-active-grant invariant.
    fn supersede_active(&mut self, model_id: &str, keep_id: &str) -> Result<()> {
        let ids = self.by_model.get(model_id).cloned().unwrap_or_default();
        for id in ids {
            if id == keep_id {
                continue;
            }
            let mut other = self.load(&id)?;
            if other.status == QualificationStatus::Qualified {
                other.status = QualificationStatus::Expired;
                self.backend.save(&other)?;
                self.emit_expired(&other);
            }
        }
        Ok(())
    }

    fn emit_terminal(&mut self, record: &QualificationRecord) {
        let event_type = match record.status {
            QualificationStatus::Qualified => "qualified",
            QualificationStatus::NotQualified => "not_qualified",
            _ => return,
        };
        self.sink.emit(QualificationEvent {
            event_type: event_type.to_string(),
            qualification_id: record.id.clone(),
            model_id: record.model_id.clone(),
            new_status: record.status,
            tier: Some(record.tier),
            discount_percentage: Some(record.discount_percentage),
        });
    }

    fn emit_expired(&mut self, record: &QualificationRecord) {
        self.sink.emit(QualificationEvent {
            event_type: "expired".to_string(),
            qualification_id: record.id.clone(),
            model_id: record.model_id.clone(),
            new_status: QualificationStatus::Expired,
            tier: None,
            discount_percentage: None,
        });
    }
}

/// Opaque record id: `q-` plus 16 hex digits
fn generate_id() -> String {
    format!("q-{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualify::events::VecSink;
    use crate::store::InMemoryBackend;
    use crate::telemetry::SampleBuffer;

    fn engine() -> QualificationEngine<InMemoryBackend> {
        QualificationEngine::new(InMemoryBackend::new(), EngineConfig::default()).unwrap()
    }

    /// Steady capture around `watts` with ~3% ripple
    fn capture(watts: f64, count: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new();
        for i in 0..count {
            let t = i as f64 * 0.025;
            buffer.push(t, watts + 0.03 * watts * (t * 5.0).sin()).unwrap();
        }
        buffer
    }

    fn submit(engine: &mut QualificationEngine<InMemoryBackend>, model: &str) -> String {
        // Declared figures close to what `capture(142.7, ..)` measures
        // (cv of the 3% ripple is ~0.0213), so the tolerance check passes.
        engine.submit(model, DeclaredMetrics::new(145.2, 0.021), HashMap::new()).unwrap().id
    }

    #[test]
    fn test_submit_creates_pending_record() {
        let mut engine = engine();
        let record = engine
            .submit("qwen3-32b", DeclaredMetrics::new(145.2, 0.089), HashMap::new())
            .unwrap();
        assert_eq!(record.status, QualificationStatus::Pending);
        assert_eq!(record.tier, Tier::Tier3);
        assert!(record.id.starts_with("q-"));
        assert!(record.measured.is_none());
    }

    #[test]
    fn test_submit_validates_declared() {
        let mut engine = engine();
        let err = engine
            .submit("m", DeclaredMetrics::new(-1.0, 0.1), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, QualifyError::Validation { field: "avg_power_watts", .. }));
    }

    #[test]
    fn test_get_status_unknown_id() {
        let mut engine = engine();
        assert!(matches!(engine.get_status("q-nope"), Err(QualifyError::NotFound(_))));
    }

    #[test]
    fn test_full_verification_qualifies() {
        let mut engine = engine();
        let sink = VecSink::new();
        engine.set_event_sink(Box::new(sink.clone()));

        let id = submit(&mut engine, "qwen3-32b");
        engine.begin_verification(&id).unwrap();
        let record = engine.complete_verification(&id, &capture(142.7, 400), 20_000).unwrap();

        assert_eq!(record.status, QualificationStatus::Qualified);
        assert_eq!(record.tier, Tier::Tier1);
        assert!(record.valid_until.is_some());
        assert!(record.within_tolerance().unwrap());
        let measured = record.measured.unwrap();
        assert!((measured.avg_power_watts - 142.7).abs() < 2.0);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "qualified");
        assert_eq!(events[0].tier, Some(Tier::Tier1));
    }

    #[test]
    fn test_high_variance_is_not_qualified() {
        let mut engine = engine();
        let id = submit(&mut engine, "m");
        engine.begin_verification(&id).unwrap();
        // 285 W steady: too much power for any discount rule
        let record = engine.complete_verification(&id, &capture(285.4, 400), 20_000).unwrap();
        assert_eq!(record.status, QualificationStatus::NotQualified);
        assert_eq!(record.tier, Tier::Tier3);
        assert!(record.valid_until.is_none());
    }

    #[test]
    fn test_insufficient_samples_keeps_record_retryable() {
        let mut engine = engine();
        let id = submit(&mut engine, "m");
        engine.begin_verification(&id).unwrap();

        let err = engine.complete_verification(&id, &capture(142.7, 5), 1000).unwrap_err();
        assert!(matches!(
            err,
            QualifyError::VerificationDataInsufficient { got: 5, need: 20 }
        ));
        assert_eq!(engine.get_status(&id).unwrap().status, QualificationStatus::InProgress);

        // Retry with enough data succeeds.
        let record = engine.complete_verification(&id, &capture(142.7, 400), 20_000).unwrap();
        assert_eq!(record.status, QualificationStatus::Qualified);
    }

    #[test]
    fn test_lease_serializes_verifications_per_model() {
        let mut engine = engine();
        let first = submit(&mut engine, "m");
        let second = submit(&mut engine, "m");

        engine.begin_verification(&first).unwrap();
        let err = engine.begin_verification(&second).unwrap_err();
        assert!(matches!(err, QualifyError::VerificationInProgress { .. }));

        // A different model is unaffected.
        let other = submit(&mut engine, "other");
        engine.begin_verification(&other).unwrap();
    }

    #[test]
    fn test_abandon_rolls_back_to_pending() {
        let mut engine = engine();
        let id = submit(&mut engine, "m");
        engine.begin_verification(&id).unwrap();
        let record = engine.abandon_verification(&id).unwrap();
        assert_eq!(record.status, QualificationStatus::Pending);

        // Lease released: verification can start again.
        engine.begin_verification(&id).unwrap();
    }

    #[test]
    fn test_begin_requires_pending() {
        let mut engine = engine();
        let id = submit(&mut engine, "m");
        engine.begin_verification(&id).unwrap();
        engine.complete_verification(&id, &capture(142.7, 400), 20_000).unwrap();

        let err = engine.begin_verification(&id).unwrap_err();
        assert!(matches!(err, QualifyError::InvalidTransition { .. }));
    }

    #[test]
    fn test_active_pricing_defaults_to_standard() {
        let mut engine = engine();
        let pricing = engine.get_active_pricing("unknown-model").unwrap();
        assert_eq!(pricing.tier, Tier::Tier3);
        assert!((pricing.discount_percentage - 0.0).abs() < f64::EPSILON);
        assert!(pricing.qualification_id.is_none());
    }

    #[test]
    fn test_requalification_supersedes_on_qualification_only() {
        let mut engine = engine();
        let sink = VecSink::new();
        engine.set_event_sink(Box::new(sink.clone()));

        let first = submit(&mut engine, "m");
        engine.begin_verification(&first).unwrap();
        engine.complete_verification(&first, &capture(142.7, 400), 20_000).unwrap();

        // Requalify: old record keeps its status and pricing until the
        // new record qualifies.
        let second = engine
            .requalify("m", DeclaredMetrics::new(180.0, 0.12), HashMap::new())
            .unwrap()
            .id;
        assert_eq!(engine.get_status(&first).unwrap().status, QualificationStatus::Qualified);
        let pricing = engine.get_active_pricing("m").unwrap();
        assert_eq!(pricing.tier, Tier::Tier1);
        assert_eq!(pricing.qualification_id.as_deref(), Some(first.as_str()));

        engine.begin_verification(&second).unwrap();
        engine.complete_verification(&second, &capture(180.0, 400), 20_000).unwrap();

        // Now the grant moved: tier 2 from the new record, old expired.
        let pricing = engine.get_active_pricing("m").unwrap();
        assert_eq!(pricing.tier, Tier::Tier2);
        assert_eq!(pricing.qualification_id.as_deref(), Some(second.as_str()));
        assert_eq!(engine.get_status(&first).unwrap().status, QualificationStatus::Expired);

        // Events in transition order: first qualified, then the old
        // grant's expiry, then the new qualification.
        let kinds: Vec<String> = sink.events().iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(kinds, vec!["qualified", "expired", "qualified"]);
    }

    #[test]
    fn test_lazy_expiry_on_read() {
        let mut config = EngineConfig::default();
        config.verify.validity_days = 0;
        let mut engine = QualificationEngine::new(InMemoryBackend::new(), config).unwrap();
        let sink = VecSink::new();
        engine.set_event_sink(Box::new(sink.clone()));

        let id = submit(&mut engine, "m");
        engine.begin_verification(&id).unwrap();
        engine.complete_verification(&id, &capture(142.7, 400), 20_000).unwrap();

        // validity 0 days: already past valid_until on the next read
        let record = engine.get_status(&id).unwrap();
        assert_eq!(record.status, QualificationStatus::Expired);
        assert_eq!(engine.get_active_pricing("m").unwrap().tier, Tier::Tier3);

        // The expiry event fired exactly once despite repeated reads.
        engine.get_status(&id).unwrap();
        let kinds: Vec<String> = sink.events().iter().map(|e| e.event_type.clone()).collect();
        assert_eq!(kinds, vec!["qualified", "expired"]);
    }

    #[test]
    fn test_list_filters_and_paginates() {
        let mut engine = engine();
        for _ in 0..3 {
            submit(&mut engine, "m");
        }
        let id = submit(&mut engine, "m");
        engine.begin_verification(&id).unwrap();

        let all = engine.list("m", None, 10, 0).unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.items.len(), 4);

        let pending = engine
            .list("m", Some(QualificationStatus::Pending), 10, 0)
            .unwrap();
        assert_eq!(pending.total, 3);

        let page = engine.list("m", None, 2, 2).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.offset, 2);
    }

    #[test]
    fn test_read_session_is_monotonic() {
        let mut engine = engine();
        let mut session = ReadSession::new();
        let id = submit(&mut engine, "m");

        let seen = engine.get_status_session(&mut session, &id).unwrap();
        assert_eq!(seen.status, QualificationStatus::Pending);

        engine.begin_verification(&id).unwrap();
        let seen = engine.get_status_session(&mut session, &id).unwrap();
        assert_eq!(seen.status, QualificationStatus::InProgress);

        engine.complete_verification(&id, &capture(142.7, 400), 20_000).unwrap();
        let seen = engine.get_status_session(&mut session, &id).unwrap();
        assert!(seen.status.is_terminal());
    }

    #[test]
    fn test_engine_rebuilds_index_and_leases() {
        let mut backend = InMemoryBackend::new();
        {
            let mut engine =
                QualificationEngine::new(InMemoryBackend::new(), EngineConfig::default()).unwrap();
            let id = submit(&mut engine, "m");
            engine.begin_verification(&id).unwrap();
            // Mirror the in-progress record into a fresh backend.
            let record = engine.get_status(&id).unwrap();
            backend.save(&record).unwrap();
        }
        let mut reopened =
            QualificationEngine::new(backend, EngineConfig::default()).unwrap();
        // The in-progress record re-established the model lease.
        let another = submit(&mut reopened, "m");
        let err = reopened.begin_verification(&another).unwrap_err();
        assert!(matches!(err, QualifyError::VerificationInProgress { .. }));
    }
}
