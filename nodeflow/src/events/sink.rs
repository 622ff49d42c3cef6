//! Event sinks.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives pipeline and node events.
///
/// Events are emitted from whichever thread runs the node, including rayon
/// workers and the thread calling [`Pipeline::cancel`](crate::pipeline::Pipeline::cancel).
/// Implementations must be cheap and must not panic.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Records one event.
    ///
    /// `event_type` is one of the names in
    /// [`event_types`](crate::events::event_types); `data` is its JSON payload.
    fn emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event. The default sink of a pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`.
///
/// The node or pipeline name from the payload is lifted into its own field.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::info()
    }
}

impl LoggingEventSink {
    /// Logs at `level`. Anything more verbose than `DEBUG` is logged at `DEBUG`,
    /// anything less verbose than `INFO` at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Logs at `INFO`.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn subject(data: Option<&Value>) -> &str {
        data.and_then(|d| d.get("node").or_else(|| d.get("pipeline")))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event_type: &str, data: Option<Value>) {
        let subject = Self::subject(data.as_ref());
        let payload = data.as_ref().map(ToString::to_string).unwrap_or_default();
        if self.level >= Level::DEBUG {
            debug!(event = event_type, subject, payload = %payload, "Nodeflow event");
        } else {
            info!(event = event_type, subject, payload = %payload, "Nodeflow event");
        }
    }
}

/// One event captured by a [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// The event name.
    pub event_type: String,
    /// The payload, if any.
    pub data: Option<Value>,
}

/// Keeps every event in memory, in emission order.
///
/// Meant for tests and for callers that inspect a run after the fact.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Forgets every event.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the event names in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Returns the events whose name starts with `prefix`.
    ///
    /// `"node."` selects every node event, `"node.failed"` only failures.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns how many events named exactly `event_type` were emitted.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}
