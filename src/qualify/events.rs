//! Qualification event side-channel
//!
//! The engine emits one event per terminal state transition, in transition
//! order, to a registered [`EventSink`]. Delivery beyond the sink
//! (webhooks, queues) belongs to external collaborators; the engine's
//! contract is exactly-once emission per transition.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

use super::QualificationStatus;

/// A terminal-transition notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationEvent {
    /// Transition kind: `"qualified"`, `"not_qualified"`, or `"expired"`
    pub event_type: String,
    /// Record the transition happened on
    pub qualification_id: String,
    /// Model the record belongs to
    pub model_id: String,
    /// Status after the transition
    pub new_status: QualificationStatus,
    /// Granted tier, when the transition grants one
    pub tier: Option<Tier>,
    /// Granted discount, when the transition grants one
    pub discount_percentage: Option<f64>,
}

/// Receiver for qualification events
pub trait EventSink {
    /// Handle one event. Called exactly once per terminal transition.
    fn emit(&mut self, event: QualificationEvent);
}

/// Sink that drops every event; the default when none is registered
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: QualificationEvent) {}
}

/// Sink that records events in order; used by tests and local tooling.
///
/// Clones share the same event log, so a caller can keep a handle after
/// registering a clone with the engine.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    events: Arc<Mutex<Vec<QualificationEvent>>>,
}

impl VecSink {
    /// Create an empty recording sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the emitted events, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<QualificationEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, event: QualificationEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_records_in_order() {
        let mut sink = VecSink::new();
        for (i, event_type) in ["not_qualified", "qualified", "expired"].iter().enumerate() {
            sink.emit(QualificationEvent {
                event_type: (*event_type).to_string(),
                qualification_id: format!("q-{i}"),
                model_id: "m".to_string(),
                new_status: QualificationStatus::Expired,
                tier: None,
                discount_percentage: None,
            });
        }
        let events = sink.events();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["not_qualified", "qualified", "expired"]);
    }

    #[test]
    fn test_event_serde_shape() {
        let event = QualificationEvent {
            event_type: "qualified".to_string(),
            qualification_id: "q-00af".to_string(),
            model_id: "qwen3-32b".to_string(),
            new_status: QualificationStatus::Qualified,
            tier: Some(Tier::Tier1),
            discount_percentage: Some(20.0),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"tier_1\""));
        assert!(json.contains("\"qualified\""));
        let parsed: QualificationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
