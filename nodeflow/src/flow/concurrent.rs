//! Concurrent flow container: runs a set of child flows under one policy.

use super::sequence::{Flow, FlowHandle, SignalCallback};
use crate::core::FlowState;
use crate::sync::Monitor;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// How a [`ConcurrentFlows`] container schedules its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// One at a time, in registration order.
    #[default]
    SequentialFixedOrder,
    /// One at a time, in an order shuffled once per execution.
    SequentialRandomOrder,
    /// All children at once on worker threads.
    ParallelThreads,
}

impl ExecutionPolicy {
    /// Returns true if children run one at a time.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        !matches!(self, Self::ParallelThreads)
    }
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SequentialFixedOrder => write!(f, "sequential_fixed_order"),
            Self::SequentialRandomOrder => write!(f, "sequential_random_order"),
            Self::ParallelThreads => write!(f, "parallel_threads"),
        }
    }
}

/// Caller-chosen key of a child flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKey {
    /// Integer key.
    Index(u64),
    /// String key.
    Name(String),
    /// UUID key.
    Id(Uuid),
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => write!(f, "{n}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<u64> for FlowKey {
    fn from(value: u64) -> Self {
        Self::Index(value)
    }
}

impl From<usize> for FlowKey {
    fn from(value: usize) -> Self {
        Self::Index(value as u64)
    }
}

impl From<&str> for FlowKey {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for FlowKey {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<Uuid> for FlowKey {
    fn from(value: Uuid) -> Self {
        Self::Id(value)
    }
}

/// How a container execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentOutcome {
    /// Every child completed or was cancelled on its own.
    AllCompleted,
    /// The container itself was cancelled.
    AllCancelled,
}

#[derive(Debug, Default)]
struct EntryStatus {
    started: AtomicBool,
    running: AtomicBool,
    cancelled: AtomicBool,
}

impl EntryStatus {
    fn is_complete_or_cancelled(&self) -> bool {
        (self.started.load(Ordering::SeqCst) && !self.running.load(Ordering::SeqCst))
            || self.cancelled.load(Ordering::SeqCst)
    }
}

struct ConcurrentFlowEntry {
    key: FlowKey,
    flow: Flow,
    status: Arc<EntryStatus>,
}

impl ConcurrentFlowEntry {
    fn run(&mut self) {
        self.status.started.store(true, Ordering::SeqCst);
        self.status.running.store(true, Ordering::SeqCst);
        trace!(key = %self.key, flow = %self.flow.name(), "Starting child flow");
        self.flow.execute();
        self.status.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ContainerSignals {
    completed: Vec<SignalCallback>,
    cancelled: Vec<SignalCallback>,
}

struct ConcurrentShared {
    name: String,
    parallel: AtomicBool,
    execution_started: AtomicBool,
    /// Latch guarding `cancel_all`; once set no further child starts.
    cancel_begun: AtomicBool,
    /// Latch guarding the owner's completion/cancellation signal.
    finished: AtomicBool,
    statuses: Monitor<Vec<Arc<EntryStatus>>>,
    children: Monitor<Vec<FlowHandle>>,
    signals: Mutex<ContainerSignals>,
}

impl ConcurrentShared {
    fn is_cancelling(&self) -> bool {
        self.cancel_begun.load(Ordering::SeqCst)
    }

    fn all_complete_or_cancelled(&self) -> bool {
        self.statuses.lock().iter().all(|s| s.is_complete_or_cancelled())
    }

    fn handle_concurrent_flow_done(&self, key: &FlowKey, succeeded: bool) {
        trace!(container = %self.name, key = %key, succeeded, "Child flow done");
        // Worker threads only release their hold here; the owning thread
        // decides when the set is finished.
        if self.parallel.load(Ordering::SeqCst) || self.is_cancelling() {
            return;
        }
        if self.all_complete_or_cancelled() {
            self.finish(ConcurrentOutcome::AllCompleted);
        }
    }

    fn cancel_all(&self) {
        if self
            .cancel_begun
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!(container = %self.name, "Cancelling all concurrent flows");

        for status in self.statuses.lock().iter() {
            if !status.started.load(Ordering::SeqCst) {
                status.cancelled.store(true, Ordering::SeqCst);
            }
        }

        let children = self.children.lock().clone();
        for child in children.iter().filter(|c| !c.state().is_terminal()) {
            child.cancel_flow();
        }

        self.finish(ConcurrentOutcome::AllCancelled);
    }

    fn finish(&self, outcome: ConcurrentOutcome) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        debug!(container = %self.name, outcome = ?outcome, "Concurrent flows finished");

        let callbacks = {
            let mut signals = self.signals.lock();
            let signals = std::mem::take(&mut *signals);
            match outcome {
                ConcurrentOutcome::AllCompleted => signals.completed,
                ConcurrentOutcome::AllCancelled => signals.cancelled,
            }
        };
        for callback in callbacks {
            callback();
        }
    }
}

/// Crate-internal handle used by the owning flow step to cancel its fan-out.
#[derive(Clone)]
pub(crate) struct ConcurrentCancelHandle {
    shared: Arc<ConcurrentShared>,
}

impl ConcurrentCancelHandle {
    pub(crate) fn cancel_all(&self) {
        self.shared.cancel_all();
    }
}

/// Runs a set of named child flows together under one [`ExecutionPolicy`].
///
/// Children are registered with [`ConcurrentFlows::add_or_get_flow`] and run
/// by [`ConcurrentFlows::execute`]. The owner is notified exactly once, either
/// when every child reached a terminal state or when the container was
/// cancelled. A child whose payload fails still counts as completed here.
pub struct ConcurrentFlows {
    entries: Vec<ConcurrentFlowEntry>,
    index: HashMap<FlowKey, usize>,
    policy: ExecutionPolicy,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
    unnamed_count: usize,
    shared: Arc<ConcurrentShared>,
}

impl ConcurrentFlows {
    /// Creates an empty container.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            policy: ExecutionPolicy::default(),
            thread_pool: None,
            unnamed_count: 0,
            shared: Arc::new(ConcurrentShared {
                name: name.into(),
                parallel: AtomicBool::new(false),
                execution_started: AtomicBool::new(false),
                cancel_begun: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                statuses: Monitor::new(Vec::new()),
                children: Monitor::new(Vec::new()),
                signals: Mutex::new(ContainerSignals::default()),
            }),
        }
    }

    /// Sets the execution policy, consuming and returning the container.
    #[must_use]
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.set_execution(policy);
        self
    }

    /// Sets the execution policy.
    ///
    /// # Panics
    ///
    /// Panics if the container has already started executing.
    pub fn set_execution(&mut self, policy: ExecutionPolicy) -> &mut Self {
        self.assert_not_started("set_execution");
        self.policy = policy;
        self
    }

    /// Runs parallel children on `pool` instead of the global rayon pool.
    pub fn set_thread_pool(&mut self, pool: Arc<rayon::ThreadPool>) -> &mut Self {
        self.thread_pool = Some(pool);
        self
    }

    /// Returns the container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the execution policy.
    #[must_use]
    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// Returns the number of child flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no child flow is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the child flow names in registration order.
    #[must_use]
    pub fn flow_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.flow.name()).collect()
    }

    /// Returns true once the container has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelling()
    }

    /// Registers a callback fired once every child reached a terminal state.
    pub fn on_completed<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.signals.lock().completed.push(Box::new(callback));
        self
    }

    /// Registers a callback fired when the container is cancelled.
    pub fn on_cancelled<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.signals.lock().cancelled.push(Box::new(callback));
        self
    }

    /// Returns the child flow registered under `key`, creating it if needed.
    ///
    /// A new child is named `name`, or `<container>.unnamed-<n>` when no name
    /// is given.
    ///
    /// # Panics
    ///
    /// Panics if the container has already started executing.
    pub fn add_or_get_flow(&mut self, key: impl Into<FlowKey>, name: Option<&str>) -> &mut Flow {
        self.assert_not_started("add_or_get_flow");
        let key = key.into();
        if let Some(&idx) = self.index.get(&key) {
            return &mut self.entries[idx].flow;
        }

        let name = name.map_or_else(
            || {
                self.unnamed_count += 1;
                format!("{}.unnamed-{}", self.shared.name, self.unnamed_count)
            },
            str::to_string,
        );

        let status = Arc::new(EntryStatus::default());
        let mut flow = Flow::new(name);
        self.wire_signals(&mut flow, &key, &status);

        self.shared.statuses.lock().push(status.clone());
        self.shared.children.lock().push(flow.handle());
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(ConcurrentFlowEntry { key, flow, status });

        let idx = self.entries.len() - 1;
        &mut self.entries[idx].flow
    }

    fn wire_signals(&self, flow: &mut Flow, key: &FlowKey, status: &Arc<EntryStatus>) {
        let done = |succeeded: bool| {
            let shared: Weak<ConcurrentShared> = Arc::downgrade(&self.shared);
            let status = status.clone();
            let key = key.clone();
            move || {
                if !succeeded {
                    status.cancelled.store(true, Ordering::SeqCst);
                }
                status.running.store(false, Ordering::SeqCst);
                if let Some(shared) = shared.upgrade() {
                    shared.handle_concurrent_flow_done(&key, succeeded);
                }
            }
        };
        flow.on_completed(done(true))
            .on_noop_completed(done(true))
            .on_cancelled(done(false));
    }

    pub(crate) fn cancel_handle(&self) -> ConcurrentCancelHandle {
        ConcurrentCancelHandle {
            shared: self.shared.clone(),
        }
    }

    /// Executes every child flow under the selected policy and blocks until
    /// all of them returned.
    ///
    /// # Panics
    ///
    /// Panics if the container was already executed, or if any child flow
    /// was executed by someone other than this container.
    pub fn execute(&mut self) -> ConcurrentOutcome {
        assert!(
            !self.shared.execution_started.swap(true, Ordering::SeqCst),
            "concurrent flows '{}' executed twice",
            self.name()
        );
        for entry in &self.entries {
            assert!(
                !entry.flow.has_executed() && entry.flow.state() != FlowState::Running,
                "child flow '{}' of '{}' was started outside its container",
                entry.flow.name(),
                self.name()
            );
        }

        let parallel = self.policy == ExecutionPolicy::ParallelThreads;
        self.shared.parallel.store(parallel, Ordering::SeqCst);
        info!(
            container = %self.name(),
            policy = %self.policy,
            flows = self.entries.len(),
            "Executing concurrent flows"
        );

        if self.entries.is_empty() {
            self.shared.finish(ConcurrentOutcome::AllCompleted);
            return self.outcome();
        }

        match self.policy {
            ExecutionPolicy::SequentialFixedOrder => {
                let order: Vec<usize> = (0..self.entries.len()).collect();
                self.run_sequential(&order);
            }
            ExecutionPolicy::SequentialRandomOrder => {
                let mut order: Vec<usize> = (0..self.entries.len()).collect();
                order.shuffle(&mut rand::thread_rng());
                self.run_sequential(&order);
            }
            ExecutionPolicy::ParallelThreads => self.run_parallel(),
        }

        // Every child has returned at this point; in sequential mode the last
        // child's signal normally finished already.
        if !self.shared.is_cancelling() && self.shared.all_complete_or_cancelled() {
            self.shared.finish(ConcurrentOutcome::AllCompleted);
        }
        self.outcome()
    }

    fn outcome(&self) -> ConcurrentOutcome {
        if self.shared.is_cancelling() {
            ConcurrentOutcome::AllCancelled
        } else {
            ConcurrentOutcome::AllCompleted
        }
    }

    fn run_sequential(&mut self, order: &[usize]) {
        for &idx in order {
            if self.shared.is_cancelling() {
                debug!(
                    container = %self.name(),
                    "Cancellation begun, not starting remaining flows"
                );
                break;
            }
            self.entries[idx].run();
        }
    }

    fn run_parallel(&mut self) {
        let shared = &self.shared;
        let entries = &mut self.entries;
        let mut run_all = move || {
            rayon::scope(|scope| {
                for entry in entries.iter_mut() {
                    scope.spawn(move |_| {
                        if shared.is_cancelling() {
                            return;
                        }
                        entry.run();
                    });
                }
            });
        };
        match &self.thread_pool {
            Some(pool) => pool.install(run_all),
            None => run_all(),
        }
    }

    fn assert_not_started(&self, operation: &str) {
        assert!(
            !self.shared.execution_started.load(Ordering::SeqCst),
            "{operation} called on '{}' after execution started",
            self.name()
        );
    }
}

impl fmt::Debug for ConcurrentFlows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentFlows")
            .field("name", &self.name())
            .field("policy", &self.policy)
            .field("flows", &self.flow_names())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
