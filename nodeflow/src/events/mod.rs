//! Event sinks for pipeline observability.
//!
//! A [`Pipeline`](crate::pipeline::Pipeline) reports its lifecycle to an
//! [`EventSink`]: `pipeline.started`, `node.started`, `node.completed`,
//! `node.failed`, `node.cancelled`, `pipeline.completed` and
//! `pipeline.cancelled`. Payloads are JSON objects.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

#[cfg(test)]
pub(crate) use sink::MockEventSink;

/// Event type names emitted by pipelines.
pub mod event_types {
    /// A pipeline run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// Every node of a run finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run was cancelled.
    pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
    /// A node started its prepare phase.
    pub const NODE_STARTED: &str = "node.started";
    /// A node finished successfully.
    pub const NODE_COMPLETED: &str = "node.completed";
    /// A node finished with an error.
    pub const NODE_FAILED: &str = "node.failed";
    /// A node was stopped by cancellation.
    pub const NODE_CANCELLED: &str = "node.cancelled";
}
