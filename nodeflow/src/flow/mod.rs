//! Flow sequencing and fan-out.
//!
//! This module provides:
//! - [`Flow`], a named sequence of steps with cancel-from-anywhere
//! - [`ConcurrentFlows`], a container running child flows under an
//!   [`ExecutionPolicy`]

mod concurrent;
mod sequence;

pub use concurrent::{ConcurrentFlows, ConcurrentOutcome, ExecutionPolicy, FlowKey};
pub use sequence::{Flow, FlowHandle, FlowOutcome, StepControl};
