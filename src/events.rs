//! Structured lifecycle events for node preparation, completion, error, and
//! state completion, emitted as the invoker drives an execution state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),
}

/// One lifecycle event emitted by a [`crate::invoker::Invoker`] as it drives
/// an execution state forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    NodePrepared { state_id: String, prepared_id: String, source_path: String },
    NodeCompleted { state_id: String, prepared_id: String },
    NodeErrored { state_id: String, prepared_id: String, message: String },
    StateComplete { state_id: String },
}

/// Receives [`EngineEvent`]s as execution proceeds. Implementations must be
/// safe to call from the invoker façade's single-writer context; they are
/// not expected to block it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent) -> Result<(), EventError>;
}

/// Discards every event. The default when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Collects every event in order, in memory. Useful for tests and for small
/// embedded hosts that want to inspect history after the fact.
#[derive(Default)]
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }
}

impl EventSink for VecEventSink {
    fn emit(&self, event: EngineEvent) -> Result<(), EventError> {
        self.events.lock().expect("event sink mutex poisoned").push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_drops_everything() {
        let sink = NullEventSink;
        sink.emit(EngineEvent::StateComplete { state_id: "s".into() }).unwrap();
    }

    #[test]
    fn vec_sink_records_events_in_order() {
        let sink = VecEventSink::new();
        sink.emit(EngineEvent::NodePrepared {
            state_id: "s".into(),
            prepared_id: "p1".into(),
            source_path: "a".into(),
        })
        .unwrap();
        sink.emit(EngineEvent::NodeCompleted {
            state_id: "s".into(),
            prepared_id: "p1".into(),
        })
        .unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 2);
        matches!(events[0], EngineEvent::NodePrepared { .. });
    }

    #[test]
    fn event_serializes_with_its_tag() {
        let event = EngineEvent::NodeErrored {
            state_id: "s".into(),
            prepared_id: "p".into(),
            message: "boom".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"nodeErrored\""));
    }
}
