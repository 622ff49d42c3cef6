//! Lifecycle state enums for nodes and flows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The lifecycle state of a pipeline node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Node has not been executed yet.
    #[default]
    NotStarted,
    /// Node is executing one of its phases.
    Running,
    /// Node ran to the end of its lifecycle, successfully or not.
    Completed,
    /// Node execution was cut short by cancellation.
    Cancelled,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl NodeState {
    /// Returns true if the state represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// The lifecycle state of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FlowState {
    /// Flow has not been executed yet.
    #[default]
    Idle = 0,
    /// Flow is executing its steps.
    Running = 1,
    /// Flow ran all of its steps.
    Completed = 2,
    /// Flow was cancelled.
    Cancelled = 3,
}

impl FlowState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    /// Returns true if the state represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A [`FlowState`] that can be shared and transitioned across threads.
#[derive(Debug, Default)]
pub(crate) struct AtomicFlowState(AtomicU8);

impl AtomicFlowState {
    pub(crate) fn load(&self) -> FlowState {
        FlowState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves from `from` to `to`; returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: FlowState, to: FlowState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
