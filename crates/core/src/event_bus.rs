//! Event bus: trait for emitting domain events from any module.
//!
//! Services accept an `Arc<dyn EventSink>`; the binary wires a
//! [`TracingSink`] so every lead, campaign and message event ends up in the
//! structured log.

use crate::types::{AppEvent, EventType};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AppEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AppEvent) {}
}

/// Writes each event as a structured `tracing` record.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AppEvent) {
        tracing::info!(
            target: "leadflow::events",
            event_id = %event.event_id,
            event_type = ?event.event_type,
            subject_id = %event.subject_id,
            lead_id = ?event.lead_id,
            campaign_id = ?event.campaign_id,
            "event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AppEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AppEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating `AppEvent` with minimal boilerplate.
pub fn make_event(
    event_type: EventType,
    subject_id: impl ToString,
    lead_id: Option<Uuid>,
    campaign_id: Option<Uuid>,
) -> AppEvent {
    AppEvent {
        event_id: Uuid::new_v4(),
        event_type,
        subject_id: subject_id.to_string(),
        lead_id,
        campaign_id,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
