//! Single-flow state machine: a named sequence of steps.

use super::concurrent::{ConcurrentCancelHandle, ConcurrentFlows, ConcurrentOutcome};
use crate::core::{AtomicFlowState, FlowState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// What a step asks the flow to do once its callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepControl {
    /// Move on to the next step.
    Continue,
    /// Cancel the flow; no further step runs.
    Cancel,
}

/// How a flow execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOutcome {
    /// Every step ran.
    Completed,
    /// The flow was cancelled before its last step finished.
    Cancelled,
}

impl FlowOutcome {
    /// Returns true if the flow ran every step.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

type WaitCallback = Box<dyn FnOnce(&FlowHandle) -> StepControl + Send>;
type ConcurrentCallback = Box<dyn FnOnce(&mut ConcurrentFlows) + Send>;
pub(crate) type SignalCallback = Box<dyn FnOnce() + Send>;

enum StepAction {
    Wait(WaitCallback),
    Concurrent(ConcurrentCallback),
}

struct FlowStep {
    name: String,
    action: StepAction,
}

#[derive(Default)]
struct FlowSignals {
    completed: Vec<SignalCallback>,
    noop_completed: Vec<SignalCallback>,
    cancelled: Vec<SignalCallback>,
}

struct FlowShared {
    name: String,
    state: AtomicFlowState,
    signals: Mutex<FlowSignals>,
    /// The fan-out container of the step currently executing, if any.
    active_fanout: Mutex<Option<ConcurrentCancelHandle>>,
}

impl FlowShared {
    fn fire(&self, select: fn(&mut FlowSignals) -> &mut Vec<SignalCallback>) {
        let callbacks = {
            let mut signals = self.signals.lock();
            let callbacks = std::mem::take(select(&mut signals));
            // Only one terminal signal ever fires; drop the others.
            *signals = FlowSignals::default();
            callbacks
        };
        for callback in callbacks {
            callback();
        }
    }
}

/// A named sequence of steps executed in order on the calling thread.
///
/// Steps are queued with [`Flow::add_step`] and [`Flow::add_concurrent_step`]
/// and run by [`Flow::execute`]. Exactly one of the terminal signals
/// (completed, no-op completed, cancelled) fires per flow.
pub struct Flow {
    steps: Vec<FlowStep>,
    executed: bool,
    shared: Arc<FlowShared>,
}

impl Flow {
    /// Creates an empty flow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            executed: false,
            shared: Arc::new(FlowShared {
                name: name.into(),
                state: AtomicFlowState::default(),
                signals: Mutex::new(FlowSignals::default()),
                active_fanout: Mutex::new(None),
            }),
        }
    }

    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.shared.state.load()
    }

    /// Returns the number of queued steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns true once [`Flow::execute`] has been called.
    #[must_use]
    pub fn has_executed(&self) -> bool {
        self.executed
    }

    /// Returns a thread-safe handle for observing and cancelling this flow.
    #[must_use]
    pub fn handle(&self) -> FlowHandle {
        FlowHandle {
            shared: self.shared.clone(),
        }
    }

    /// Queues a step whose callback runs when the flow reaches it.
    pub fn add_step<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: FnOnce(&FlowHandle) -> StepControl + Send + 'static,
    {
        self.steps.push(FlowStep {
            name: name.into(),
            action: StepAction::Wait(Box::new(callback)),
        });
        self
    }

    /// Queues a fan-out step.
    ///
    /// When the flow reaches it, `populate` receives a fresh
    /// [`ConcurrentFlows`] container to fill; the container is then executed.
    /// The flow continues once every child flow finished and cancels itself
    /// if the container was cancelled.
    pub fn add_concurrent_step<F>(&mut self, name: impl Into<String>, populate: F) -> &mut Self
    where
        F: FnOnce(&mut ConcurrentFlows) + Send + 'static,
    {
        self.steps.push(FlowStep {
            name: name.into(),
            action: StepAction::Concurrent(Box::new(populate)),
        });
        self
    }

    /// Registers a callback fired when every step ran.
    pub fn on_completed<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.signals.lock().completed.push(Box::new(callback));
        self
    }

    /// Registers a callback fired when a flow without steps is executed.
    pub fn on_noop_completed<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.signals.lock().noop_completed.push(Box::new(callback));
        self
    }

    /// Registers a callback fired when the flow is cancelled.
    ///
    /// The callback runs on the thread that cancelled the flow.
    pub fn on_cancelled<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.signals.lock().cancelled.push(Box::new(callback));
        self
    }

    /// Runs every queued step in order.
    ///
    /// A flow cancelled before execution returns [`FlowOutcome::Cancelled`]
    /// without running any step.
    ///
    /// # Panics
    ///
    /// Panics if the flow has already been executed.
    pub fn execute(&mut self) -> FlowOutcome {
        assert!(!self.executed, "flow '{}' executed twice", self.name());
        self.executed = true;

        let handle = self.handle();
        if !self.shared.state.transition(FlowState::Idle, FlowState::Running) {
            debug!(flow = %self.name(), "Flow cancelled before execution");
            return FlowOutcome::Cancelled;
        }

        let steps = std::mem::take(&mut self.steps);
        if steps.is_empty() {
            return self.finish(|s| &mut s.noop_completed);
        }

        for step in steps {
            if handle.has_cancel_been_requested() {
                return FlowOutcome::Cancelled;
            }
            trace!(flow = %self.name(), step = %step.name, "Entering step");

            let control = match step.action {
                StepAction::Wait(callback) => callback(&handle),
                StepAction::Concurrent(populate) => self.run_concurrent_step(&step.name, populate),
            };

            if control == StepControl::Cancel {
                handle.cancel_flow();
                return FlowOutcome::Cancelled;
            }
        }

        self.finish(|s| &mut s.completed)
    }

    fn finish(&self, select: fn(&mut FlowSignals) -> &mut Vec<SignalCallback>) -> FlowOutcome {
        if self.shared.state.transition(FlowState::Running, FlowState::Completed) {
            debug!(flow = %self.name(), "Flow completed");
            self.shared.fire(select);
            FlowOutcome::Completed
        } else {
            FlowOutcome::Cancelled
        }
    }

    fn run_concurrent_step(&self, step: &str, populate: ConcurrentCallback) -> StepControl {
        let mut container = ConcurrentFlows::new(format!("{}.{}", self.name(), step));
        populate(&mut container);

        let cancel = container.cancel_handle();
        *self.shared.active_fanout.lock() = Some(cancel.clone());
        // A cancel that landed before the container was published must still reach it.
        if self.shared.state.load() == FlowState::Cancelled {
            cancel.cancel_all();
        }

        let outcome = container.execute();
        *self.shared.active_fanout.lock() = None;

        match outcome {
            ConcurrentOutcome::AllCompleted => StepControl::Continue,
            ConcurrentOutcome::AllCancelled => StepControl::Cancel,
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("steps", &self.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

/// A cloneable, thread-safe handle to a [`Flow`].
#[derive(Clone)]
pub struct FlowHandle {
    shared: Arc<FlowShared>,
}

impl FlowHandle {
    /// Returns the flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.shared.state.load()
    }

    /// Returns true while the flow is executing its steps.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == FlowState::Running
    }

    /// Returns true once the flow has been cancelled.
    #[must_use]
    pub fn has_cancel_been_requested(&self) -> bool {
        self.state() == FlowState::Cancelled
    }

    /// Cancels the flow.
    ///
    /// Cancelling an idle flow latches it so that it never runs a step.
    /// Cancelling a finished flow is a no-op. Returns true if this call
    /// performed the cancellation.
    pub fn cancel_flow(&self) -> bool {
        let cancelled = [FlowState::Running, FlowState::Idle]
            .into_iter()
            .any(|from| self.shared.state.transition(from, FlowState::Cancelled));
        if !cancelled {
            return false;
        }

        debug!(flow = %self.name(), "Flow cancelled");
        let fanout = self.shared.active_fanout.lock().clone();
        if let Some(fanout) = fanout {
            fanout.cancel_all();
        }
        self.shared.fire(|s| &mut s.cancelled);
        true
    }
}

impl std::fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
