//! Pipeline building and execution.
//!
//! This module provides:
//! - [`Pipeline`], the orchestrator running parallel and synced nodes
//! - [`PipelineConfig`] with its [`ExecutionMode`]
//! - [`NodeId`], the key of the result map

mod config;
mod orchestrator;

pub use config::{ExecutionMode, PipelineConfig};
pub use orchestrator::Pipeline;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a node registered with a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
