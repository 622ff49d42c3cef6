//! Mock nodes for testing.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{NodeError, NodeResult};
use crate::node::{Node, NodeContext, Phase};

/// A node whose phases all succeed.
#[derive(Debug, Clone)]
pub struct SuccessNode {
    name: String,
}

impl SuccessNode {
    /// Creates a new success node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Node for SuccessNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }

    fn run(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }

    fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }
}

/// A node that fails in one chosen phase.
///
/// The error message names the failing phase, e.g. `"run failed"`.
#[derive(Debug, Clone)]
pub struct FailingNode {
    name: String,
    phase: Phase,
    code: i32,
}

impl FailingNode {
    /// Creates a node failing in `phase` with `code`.
    #[must_use]
    pub fn new(name: impl Into<String>, phase: Phase, code: i32) -> Self {
        Self {
            name: name.into(),
            phase,
            code,
        }
    }

    fn outcome(&self, phase: Phase) -> NodeResult {
        if phase == self.phase {
            Err(NodeError::new(format!("{phase} failed"), self.code))
        } else {
            Ok(())
        }
    }
}

impl Node for FailingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.outcome(Phase::Prepare)
    }

    fn run(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.outcome(Phase::Run)
    }

    fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.outcome(Phase::Validate)
    }
}

/// A node whose run phase sleeps, polling for cancellation.
#[derive(Debug, Clone)]
pub struct SleepNode {
    name: String,
    duration: Duration,
}

impl SleepNode {
    /// Error code returned when the sleep was interrupted by cancellation.
    pub const INTERRUPTED_CODE: i32 = -99;

    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Creates a node sleeping `duration` in its run phase.
    #[must_use]
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

impl Node for SleepNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }

    fn run(&mut self, ctx: &NodeContext) -> NodeResult {
        let deadline = Instant::now() + self.duration;
        loop {
            if ctx.is_cancelled() {
                return Err(NodeError::new("sleep interrupted", Self::INTERRUPTED_CODE));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(Self::POLL_INTERVAL.min(deadline - now));
        }
    }

    fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }
}

/// Per-phase call counters and start instants shared with a [`RecordingNode`].
#[derive(Debug, Default)]
pub struct PhaseCalls {
    calls: Mutex<Vec<(Phase, Instant)>>,
}

impl PhaseCalls {
    fn record(&self, phase: Phase) {
        self.calls.lock().push((phase, Instant::now()));
    }

    /// Returns how many times each phase ran, as `(prepare, run, validate)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        let calls = self.calls.lock();
        let count = |p: Phase| calls.iter().filter(|(phase, _)| *phase == p).count();
        (count(Phase::Prepare), count(Phase::Run), count(Phase::Validate))
    }

    /// Returns when the node first started, if it ever did.
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        self.calls.lock().first().map(|(_, at)| *at)
    }

    /// Returns when `phase` started, if it ran.
    #[must_use]
    pub fn phase_started_at(&self, phase: Phase) -> Option<Instant> {
        self.calls
            .lock()
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, at)| *at)
    }
}

/// A node that records every phase invocation.
///
/// Optionally fails in one phase or sleeps in its run phase.
#[derive(Debug)]
pub struct RecordingNode {
    name: String,
    calls: Arc<PhaseCalls>,
    failure: Option<(Phase, i32)>,
    run_duration: Duration,
}

impl RecordingNode {
    /// Creates a new recording node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(PhaseCalls::default()),
            failure: None,
            run_duration: Duration::ZERO,
        }
    }

    /// Makes `phase` fail with `code`.
    #[must_use]
    pub fn failing_in(mut self, phase: Phase, code: i32) -> Self {
        self.failure = Some((phase, code));
        self
    }

    /// Makes the run phase sleep for `duration`.
    #[must_use]
    pub fn sleeping(mut self, duration: Duration) -> Self {
        self.run_duration = duration;
        self
    }

    /// Returns the shared call record.
    #[must_use]
    pub fn calls(&self) -> Arc<PhaseCalls> {
        self.calls.clone()
    }

    fn enter(&self, phase: Phase) -> NodeResult {
        self.calls.record(phase);
        match self.failure {
            Some((failing, code)) if failing == phase => {
                Err(NodeError::new(format!("{phase} failed"), code))
            }
            _ => Ok(()),
        }
    }
}

impl Node for RecordingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.enter(Phase::Prepare)
    }

    fn run(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.enter(Phase::Run)?;
        if !self.run_duration.is_zero() {
            std::thread::sleep(self.run_duration);
        }
        Ok(())
    }

    fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.enter(Phase::Validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_node_message_names_phase() {
        let mut node = FailingNode::new("f", Phase::Run, -1);
        let ctx = NodeContext::detached("f");

        assert!(node.prepare(&ctx).is_ok());
        let err = node.run(&ctx).unwrap_err();
        assert_eq!(err.message, "run failed");
        assert_eq!(err.code, -1);
    }

    #[test]
    fn test_recording_node_counts() {
        let mut node = RecordingNode::new("r");
        let calls = node.calls();
        let ctx = NodeContext::detached("r");

        node.prepare(&ctx).unwrap();
        node.run(&ctx).unwrap();

        assert_eq!(calls.counts(), (1, 1, 0));
        assert!(calls.started_at().is_some());
        assert!(calls.phase_started_at(Phase::Validate).is_none());
    }

    #[test]
    fn test_sleep_node_completes_without_cancel() {
        let mut node = SleepNode::new("s", Duration::from_millis(10));
        assert!(node.run(&NodeContext::detached("s")).is_ok());
    }
}
