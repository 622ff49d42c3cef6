//! Execution context handed to node phases.

use super::Phase;
use crate::cancellation::StopToken;
use crate::flow::FlowHandle;
use crate::progress::ProgressReporter;
use std::sync::Arc;

/// What a node phase can see of its surroundings: its name and phase, the
/// cancellation state, and a progress sink.
#[derive(Clone)]
pub struct NodeContext {
    node_name: String,
    phase: Phase,
    stop_token: StopToken,
    flow: Option<FlowHandle>,
    progress: Option<Arc<ProgressReporter>>,
}

impl NodeContext {
    pub(crate) fn new(
        node_name: impl Into<String>,
        phase: Phase,
        stop_token: StopToken,
        flow: FlowHandle,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            phase,
            stop_token,
            flow: Some(flow),
            progress: Some(progress),
        }
    }

    /// Creates a context that is never cancelled and discards progress.
    ///
    /// Useful for driving a [`Node`](super::Node) directly in tests.
    #[must_use]
    pub fn detached(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            phase: Phase::Prepare,
            stop_token: StopToken::detached(),
            flow: None,
            progress: None,
        }
    }

    /// Returns the node name.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Returns the phase being executed.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the stop token of the owning pipeline.
    #[must_use]
    pub fn stop_token(&self) -> &StopToken {
        &self.stop_token
    }

    /// Returns true if the node has been asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.stop_token.is_stop_requested()
            || self.flow.as_ref().is_some_and(FlowHandle::has_cancel_been_requested)
    }

    /// Reports progress within the current phase, as a fraction in `[0, 1]`.
    pub fn report_progress(&self, fraction: f32) {
        if let Some(progress) = &self.progress {
            progress.report_partial(fraction);
        }
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_name", &self.node_name)
            .field("phase", &self.phase)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
