//! # Nodeflow
//!
//! A task pipeline orchestrator.
//!
//! Nodeflow runs a collection of independent, named work units ("nodes")
//! with support for:
//!
//! - **Three-phase lifecycle**: every node runs Prepare, Run and Validate in order
//! - **Execution policies**: strict order, randomized order, or parallel threads
//! - **Synced nodes**: nodes that run one at a time after every parallel node finished
//! - **Result aggregation**: one success-or-error result per node, keyed by
//!   [`NodeId`](pipeline::NodeId)
//! - **Cooperative cancellation**: cancel from any thread, in any phase
//!
//! ## Quick Start
//!
//! ```rust
//! use nodeflow::prelude::*;
//!
//! let pipeline = Pipeline::default();
//! let convert = pipeline.add_node(FnNode::new("convert", |_ctx| Ok(())));
//! let publish = pipeline.add_synced_node(FnNode::new("publish", |_ctx| {
//!     Err(NodeError::new("destination unavailable", 3))
//! }));
//!
//! let results = pipeline.run();
//! assert!(results[&convert].is_ok());
//! assert_eq!(results[&publish].as_ref().unwrap_err().code, 3);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod flow;
pub mod node;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod sync;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{StopSource, StopToken};
    pub use crate::core::{NodeError, NodeResult, NodeState, CANCELLED_ERROR_CODE};
    pub use crate::errors::NodeflowError;
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::flow::{
        ConcurrentFlows, ConcurrentOutcome, ExecutionPolicy, Flow, FlowHandle, FlowOutcome,
        StepControl,
    };
    pub use crate::node::{FnNode, Node, NodeContext, Phase, PipelineNode};
    pub use crate::pipeline::{ExecutionMode, NodeId, Pipeline, PipelineConfig};
    pub use crate::sync::Monitor;
}
