//! Node result types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code reserved for results synthesized by the orchestrator when a
/// node was cancelled before it could produce its own result.
///
/// Node implementations must not use this code.
pub const CANCELLED_ERROR_CODE: i32 = i32::MIN;

/// The outcome of a node phase, or of a whole node execution.
pub type NodeResult = Result<(), NodeError>;

/// A structured node failure: a human-readable message and a numeric code.
///
/// Codes are opaque to the orchestrator. Nodes pick distinct codes per
/// failure origin so callers can tell phases apart without matching on
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct NodeError {
    /// The error message.
    pub message: String,
    /// The error code.
    pub code: i32,
}

impl NodeError {
    /// Creates a new node error.
    #[must_use]
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Creates the synthetic error recorded for a node that never ran to
    /// completion because the pipeline was cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new("Node was cancelled", CANCELLED_ERROR_CODE)
    }

    /// Returns true if this is the synthetic cancellation error.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == CANCELLED_ERROR_CODE
    }
}
