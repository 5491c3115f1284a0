//! Event system for engine runs
//!
//! Provides typed event emission for runtime events

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Runtime event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    RunStarted {
        total_nodes: usize,
    },
    NodeStarted {
        node_id: String,
        layer: u32,
    },
    NodeCompleted {
        node_id: String,
        success: bool,
        duration_ms: u64,
    },
    /// The node was not run because an input could not be resolved
    NodeSkipped {
        node_id: String,
        reason: String,
    },
    PerformanceWarning {
        node_id: String,
        actual_ms: u64,
        estimated_ms: u64,
    },
    RunCompleted {
        success: bool,
        executed_nodes: usize,
        failed_nodes: usize,
        duration_ms: u64,
    },
}

/// Event envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEventEnvelope {
    pub sequence: u64,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}

impl EngineEventEnvelope {
    pub fn new(run_id: Uuid, event: EngineEvent) -> Self {
        Self {
            sequence: next_sequence(),
            run_id,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Event sink trait for emitting events
pub trait EventSink: Send + Sync {
    /// Emit an event
    fn emit(&self, envelope: &EngineEventEnvelope);
}

/// A simple logging event sink
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &EngineEventEnvelope) {
        tracing::debug!("Event: {:?}", envelope);
    }
}

/// A buffering event sink that collects events
#[derive(Default)]
pub struct BufferingEventSink {
    events: Arc<RwLock<Vec<EngineEventEnvelope>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<EngineEventEnvelope> {
        self.events.read().clone()
    }

    /// Just the event payloads, in emission order
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.read().iter().map(|e| e.event.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &EngineEventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Get the next event sequence number
pub fn next_sequence() -> u64 {
    EVENT_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffering_sink_keeps_order() {
        let sink = BufferingEventSink::new();
        let run_id = Uuid::new_v4();
        sink.emit(&EngineEventEnvelope::new(run_id, EngineEvent::RunStarted { total_nodes: 1 }));
        sink.emit(&EngineEventEnvelope::new(
            run_id,
            EngineEvent::NodeStarted {
                node_id: "M^1-001".to_string(),
                layer: 1,
            },
        ));

        let envelopes = sink.get_events();
        assert_eq!(envelopes.len(), 2);
        assert!(envelopes[0].sequence < envelopes[1].sequence);
        assert_eq!(sink.events()[0], EngineEvent::RunStarted { total_nodes: 1 });

        sink.clear();
        assert!(sink.get_events().is_empty());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(EngineEvent::NodeSkipped {
            node_id: "D^100-001".to_string(),
            reason: "missing".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "NodeSkipped");
        assert_eq!(json["node_id"], "D^100-001");
    }
}
