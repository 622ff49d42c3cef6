//! Testing utilities for nodeflow pipelines.
//!
//! This module provides:
//! - Mock nodes with configurable failures, sleeps and call recording
//! - Assertions over node results and result maps

mod assertions;
mod mocks;

pub use assertions::{
    assert_node_cancelled, assert_node_failed_with, assert_node_succeeded, assert_results_cover,
};
pub use mocks::{FailingNode, PhaseCalls, RecordingNode, SleepNode, SuccessNode};
