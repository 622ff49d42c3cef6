//! The Prepare/Run/Validate execution wrapper around a [`Node`].

use super::{Node, NodeContext, Phase};
use crate::cancellation::StopToken;
use crate::core::{NodeError, NodeResult, NodeState};
use crate::flow::{Flow, FlowHandle, FlowOutcome, StepControl};
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::sync::Monitor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A registered unit of work with a uniform three-phase lifecycle.
///
/// `execute` runs prepare, run and validate as the steps of a private flow;
/// the first failing phase ends the node and its error is the result.
/// [`PipelineNode::cancel`] may be called from any thread at any time.
pub struct PipelineNode {
    name: String,
    node: Arc<Mutex<Box<dyn Node>>>,
    state: Mutex<NodeState>,
    stop_token: StopToken,
    progress: Option<ProgressCallback>,
    /// The private flow while `execute` runs.
    flow: Monitor<Option<FlowHandle>>,
}

impl PipelineNode {
    /// Wraps `node`.
    pub fn new(node: impl Node + 'static) -> Self {
        Self::from_boxed(Box::new(node))
    }

    /// Wraps an already boxed node.
    #[must_use]
    pub fn from_boxed(node: Box<dyn Node>) -> Self {
        Self {
            name: node.name().to_string(),
            node: Arc::new(Mutex::new(node)),
            state: Mutex::new(NodeState::NotStarted),
            stop_token: StopToken::detached(),
            progress: None,
            flow: Monitor::new(None),
        }
    }

    /// Sets a progress callback receiving the node's overall completion.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Attaches a stop token checked before every phase.
    #[must_use]
    pub fn with_stop_token(mut self, token: StopToken) -> Self {
        self.stop_token = token;
        self
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Asks a running node to stop.
    ///
    /// The phase in flight is not interrupted; it observes the request through
    /// [`NodeContext::is_cancelled`]. No further phase starts. This is a no-op
    /// for nodes that are not running.
    pub fn cancel(&self) {
        let flow = self.flow.lock().clone();
        if let Some(flow) = flow {
            if flow.is_running() && flow.cancel_flow() {
                debug!(node = %self.name, "Node cancel requested");
            }
        }
    }

    /// Runs prepare, run and validate in order and returns exactly one result.
    ///
    /// # Panics
    ///
    /// Panics if the node has already been executed.
    pub(crate) fn execute(&self) -> NodeResult {
        {
            let mut state = self.state.lock();
            assert!(
                *state == NodeState::NotStarted,
                "node '{}' executed twice",
                self.name
            );
            *state = NodeState::Running;
        }

        let result: Arc<Mutex<NodeResult>> = Arc::new(Mutex::new(Err(NodeError::cancelled())));
        let interrupted = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(ProgressReporter::new(Phase::ALL.len(), self.progress.clone()));

        let mut flow = Flow::new(format!("node.{}", self.name));
        for phase in Phase::ALL {
            let name = self.name.clone();
            let node = self.node.clone();
            let result = result.clone();
            let interrupted = interrupted.clone();
            let progress = progress.clone();
            let stop_token = self.stop_token.clone();

            flow.add_step(phase.to_string(), move |handle| {
                if handle.has_cancel_been_requested() || stop_token.is_stop_requested() {
                    debug!(node = %name, phase = %phase, "Cancellation observed, skipping phase");
                    interrupted.store(true, Ordering::SeqCst);
                    return StepControl::Cancel;
                }

                debug!(node = %name, phase = %phase, "Running phase");
                let ctx = NodeContext::new(
                    &name,
                    phase,
                    stop_token,
                    handle.clone(),
                    progress.clone(),
                );
                let outcome = phase.invoke(&mut **node.lock(), &ctx);
                if outcome.is_err() && ctx.is_cancelled() {
                    interrupted.store(true, Ordering::SeqCst);
                }
                let control = match &outcome {
                    Ok(()) => {
                        progress.complete_unit();
                        StepControl::Continue
                    }
                    Err(e) => {
                        warn!(
                            node = %name,
                            phase = %phase,
                            code = e.code,
                            error = %e.message,
                            "Phase failed"
                        );
                        StepControl::Cancel
                    }
                };
                *result.lock() = outcome;
                control
            });
        }

        *self.flow.lock() = Some(flow.handle());
        let outcome = flow.execute();
        *self.flow.lock() = None;

        *self.state.lock() = if interrupted.load(Ordering::SeqCst) {
            NodeState::Cancelled
        } else {
            NodeState::Completed
        };
        debug!(node = %self.name, outcome = ?outcome, state = %self.state(), "Node finished");

        let final_result = result.lock().clone();
        if outcome == FlowOutcome::Completed {
            debug_assert!(final_result.is_ok());
        }
        final_result
    }
}

impl std::fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineNode")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
