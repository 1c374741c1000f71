//! Structured domain event records.
//!
//! The service layer emits named records as data; formatting and shipping
//! belong to whichever sink the process wires in. Event names are stable
//! identifiers (e.g. "hold_created"), never formatted strings.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// A single emitted domain event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Stable event name (e.g. "order_finalized_paid").
    pub name: &'static str,
    /// When the event occurred (business time).
    pub occurred_at: DateTime<Utc>,
    /// Event payload as structured data.
    pub fields: serde_json::Value,
}

impl EventRecord {
    pub fn new(name: &'static str, occurred_at: DateTime<Utc>, fields: serde_json::Value) -> Self {
        Self {
            name,
            occurred_at,
            fields,
        }
    }
}

/// Sink for domain event records.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// Sink that forwards records to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: EventRecord) {
        tracing::info!(
            target: "surgecart::events",
            event = record.name,
            occurred_at = %record.occurred_at,
            fields = %record.fields,
        );
    }
}

/// Sink that retains every record, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<EventRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().expect("sink lock poisoned").clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.records
            .lock()
            .expect("sink lock poisoned")
            .iter()
            .map(|r| r.name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.records
            .lock()
            .expect("sink lock poisoned")
            .iter()
            .filter(|r| r.name == name)
            .count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, record: EventRecord) {
        self.records.lock().expect("sink lock poisoned").push(record);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _record: EventRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_counts_by_name() {
        let sink = CollectingSink::new();
        sink.emit(EventRecord::new("hold_created", Utc::now(), serde_json::json!({})));
        sink.emit(EventRecord::new("hold_created", Utc::now(), serde_json::json!({})));
        sink.emit(EventRecord::new("hold_expired", Utc::now(), serde_json::json!({})));
        assert_eq!(sink.count("hold_created"), 2);
        assert_eq!(sink.count("hold_expired"), 1);
        assert_eq!(sink.names().len(), 3);
    }
}
