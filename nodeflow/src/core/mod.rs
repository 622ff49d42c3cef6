//! Core domain model types for nodeflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Node result and error types
//! - Node and flow lifecycle states

mod result;
mod status;

pub use result::{NodeError, NodeResult, CANCELLED_ERROR_CODE};
pub(crate) use status::AtomicFlowState;
pub use status::{FlowState, NodeState};
