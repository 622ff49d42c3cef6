//! The pipeline orchestrator.

use super::config::PipelineConfig;
use super::NodeId;
use crate::cancellation::StopSource;
use crate::core::{NodeError, NodeResult, NodeState, CANCELLED_ERROR_CODE};
use crate::errors::NodeflowError;
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::flow::{Flow, FlowHandle, FlowOutcome, StepControl};
use crate::node::{Node, PipelineNode};
use crate::observability::SpanTimer;
use crate::progress::ProgressCallback;
use crate::sync::Monitor;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A node together with the id it was registered under.
#[derive(Debug, Clone)]
struct RegisteredNode {
    id: NodeId,
    node: Arc<PipelineNode>,
}

/// Bookkeeping private to one call of [`Pipeline::run`].
///
/// Cancellation handlers may still be running on another thread after the
/// run returned; they only ever touch the state of their own run.
struct RunState {
    parallel_pending: Monitor<Vec<RegisteredNode>>,
    synced_pending: Monitor<Vec<RegisteredNode>>,
    results: Monitor<HashMap<NodeId, NodeResult>>,
}

impl RunState {
    fn new(parallel: Vec<RegisteredNode>, synced: Vec<RegisteredNode>) -> Self {
        Self {
            parallel_pending: Monitor::new(parallel),
            synced_pending: Monitor::new(synced),
            results: Monitor::default(),
        }
    }

    /// Stores a node's own result, replacing any synthetic one, and drops the
    /// node from its pending collection.
    fn record_result(&self, id: NodeId, result: NodeResult) {
        self.results.lock().insert(id, result);
        self.parallel_pending.lock().retain(|r| r.id != id);
        self.synced_pending.lock().retain(|r| r.id != id);
    }

    /// Fills a cancelled entry for every node still pending.
    fn fill_cancelled(&self, pipeline: &str) {
        let mut drained = std::mem::take(&mut *self.parallel_pending.lock());
        drained.append(&mut self.synced_pending.lock());
        if drained.is_empty() {
            return;
        }

        info!(
            pipeline = %pipeline,
            pending = drained.len(),
            "Pipeline cancelled, reporting pending nodes"
        );
        let mut results = self.results.lock();
        for registered in drained {
            results
                .entry(registered.id)
                .or_insert_with(|| Err(NodeError::cancelled()));
        }
    }

    fn pending_count(&self) -> usize {
        self.parallel_pending.lock().len() + self.synced_pending.lock().len()
    }

    fn pending_nodes(&self) -> Vec<RegisteredNode> {
        let mut nodes = self.parallel_pending.lock().clone();
        nodes.extend(self.synced_pending.lock().iter().cloned());
        nodes
    }
}

/// The run in progress and the composite flow driving it.
#[derive(Clone)]
struct ActiveRun {
    state: Arc<RunState>,
    flow: FlowHandle,
}

struct PipelineInner {
    config: PipelineConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
    /// Registered ids in registration order.
    registered: Monitor<Vec<NodeId>>,
    /// Nodes registered since the last run started.
    parallel_queue: Monitor<Vec<RegisteredNode>>,
    synced_queue: Monitor<Vec<RegisteredNode>>,
    active: Monitor<Option<ActiveRun>>,
    stop: StopSource,
    running: AtomicBool,
    sink: RwLock<Arc<dyn EventSink>>,
}

impl PipelineInner {
    fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.read().clone()
    }

    fn register(&self, node: PipelineNode, synced: bool) -> NodeId {
        let id = NodeId::new();
        let node = Arc::new(node.with_stop_token(self.stop.create_token()));
        debug!(
            pipeline = %self.config.name,
            node = %node.name(),
            node_id = %id,
            synced,
            "Registered node"
        );

        self.registered.lock().push(id);
        let queue = if synced {
            &self.synced_queue
        } else {
            &self.parallel_queue
        };
        queue.lock().push(RegisteredNode { id, node });
        id
    }

    /// Runs one node's lifecycle and records its result in `run`.
    fn execute_node(&self, run: &RunState, registered: &RegisteredNode) {
        let RegisteredNode { id, node } = registered;
        if self.stop.is_stop_requested() {
            debug!(node = %node.name(), node_id = %id, "Pipeline cancelled, node never starts");
            run.record_result(*id, Err(NodeError::cancelled()));
            return;
        }

        let sink = self.sink();
        sink.emit(
            event_types::NODE_STARTED,
            Some(json!({ "node_id": id, "node": node.name() })),
        );

        let timer = SpanTimer::start(node.name());
        let result = node.execute();
        let duration_ms = timer.finish();

        match &result {
            Ok(()) => sink.emit(
                event_types::NODE_COMPLETED,
                Some(json!({ "node_id": id, "node": node.name(), "duration_ms": duration_ms })),
            ),
            Err(e) => {
                let event_type = if node.state() == NodeState::Cancelled {
                    event_types::NODE_CANCELLED
                } else {
                    event_types::NODE_FAILED
                };
                sink.emit(
                    event_type,
                    Some(json!({
                        "node_id": id,
                        "node": node.name(),
                        "code": e.code,
                        "message": e.message,
                        "duration_ms": duration_ms,
                    })),
                );
            }
        }

        run.record_result(*id, result);
    }
}

/// Runs a set of parallel-eligible nodes followed by a sequence of synced
/// nodes and collects one result per node.
///
/// Nodes registered with [`Pipeline::add_node`] form the fan-out stage; they
/// run under the configured [`ExecutionPolicy`](crate::flow::ExecutionPolicy).
/// Nodes registered with [`Pipeline::add_synced_node`] run afterwards, one at
/// a time in registration order. A failing node never stops its siblings;
/// only [`Pipeline::cancel`] changes the course of a run.
///
/// # Example
///
/// ```
/// use nodeflow::prelude::*;
/// use nodeflow::testing::{FailingNode, SuccessNode};
///
/// let pipeline = Pipeline::default();
/// let ok = pipeline.add_node(SuccessNode::new("ok"));
/// let bad = pipeline.add_synced_node(FailingNode::new("bad", Phase::Run, 7));
///
/// let results = pipeline.run();
/// assert!(results[&ok].is_ok());
/// assert_eq!(results[&bad].as_ref().unwrap_err().code, 7);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::build(PipelineConfig::default(), None)
    }
}

impl Pipeline {
    /// Creates a pipeline from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the dedicated
    /// worker pool cannot be created.
    pub fn new(config: PipelineConfig) -> Result<Self, NodeflowError> {
        config.validate()?;
        let pool = match config.worker_threads {
            Some(threads) => {
                let prefix = config.name.clone();
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(move |i| format!("{prefix}-worker-{i}"))
                    .build()?;
                Some(Arc::new(pool))
            }
            None => None,
        };
        Ok(Self::build(config, pool))
    }

    fn build(config: PipelineConfig, pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                config,
                pool,
                registered: Monitor::default(),
                parallel_queue: Monitor::default(),
                synced_queue: Monitor::default(),
                active: Monitor::default(),
                stop: StopSource::new(),
                running: AtomicBool::new(false),
                sink: RwLock::new(Arc::new(NoOpEventSink)),
            }),
        }
    }

    /// Sets the sink receiving pipeline and node events.
    #[must_use]
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        self.set_event_sink(sink);
        self
    }

    /// Replaces the event sink.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = sink;
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Registers a parallel-eligible node.
    pub fn add_node(&self, node: impl Node + 'static) -> NodeId {
        self.inner.register(PipelineNode::new(node), false)
    }

    /// Registers a parallel-eligible node that reports its progress.
    pub fn add_node_with_progress(
        &self,
        node: impl Node + 'static,
        progress: ProgressCallback,
    ) -> NodeId {
        self.inner
            .register(PipelineNode::new(node).with_progress(progress), false)
    }

    /// Registers a node that runs after every parallel-eligible node finished.
    pub fn add_synced_node(&self, node: impl Node + 'static) -> NodeId {
        self.inner.register(PipelineNode::new(node), true)
    }

    /// Returns the number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.registered.lock().len()
    }

    /// Returns the number of nodes without a recorded result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let queued =
            self.inner.parallel_queue.lock().len() + self.inner.synced_queue.lock().len();
        let active = self.inner.active.lock().clone();
        queued + active.map_or(0, |run| run.state.pending_count())
    }

    /// Returns true while [`Pipeline::run`] is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Returns true once [`Pipeline::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.stop.is_stop_requested()
    }

    /// Runs every pending node and returns one result per node.
    ///
    /// Blocks until every node reached a terminal state. Nodes that never
    /// started because the pipeline was cancelled are reported with
    /// [`NodeError::cancelled`]. Results of a run are handed out once; a
    /// second run only covers nodes registered since.
    ///
    /// # Panics
    ///
    /// Panics if called while another `run` of the same pipeline is in progress.
    pub fn run(&self) -> HashMap<NodeId, NodeResult> {
        let inner = &self.inner;
        assert!(
            inner
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            "pipeline '{}' is already running",
            inner.config.name
        );

        let parallel = std::mem::take(&mut *inner.parallel_queue.lock());
        let synced = std::mem::take(&mut *inner.synced_queue.lock());
        let policy = inner.config.fan_out_policy();
        let timer = SpanTimer::start(&inner.config.name);

        info!(
            pipeline = %inner.config.name,
            policy = %policy,
            parallel = parallel.len(),
            synced = synced.len(),
            "Pipeline starting"
        );
        inner.sink().emit(
            event_types::PIPELINE_STARTED,
            Some(json!({
                "pipeline": inner.config.name,
                "policy": policy,
                "parallel": parallel.len(),
                "synced": synced.len(),
                "started_at": Utc::now().to_rfc3339(),
            })),
        );

        let run = Arc::new(RunState::new(parallel.clone(), synced.clone()));
        let mut flow = self.build_flow(&run, parallel.clone(), synced.clone());
        *inner.active.lock() = Some(ActiveRun {
            state: run.clone(),
            flow: flow.handle(),
        });
        // A cancel that landed before the run was published must still reach it.
        if inner.stop.is_stop_requested() {
            flow.handle().cancel_flow();
        }

        let outcome = flow.execute();
        *inner.active.lock() = None;

        // Cover nodes the flow never reached. Every node that started has
        // recorded its own result by now.
        let sink = inner.sink();
        let mut results = run.results.claim();
        for registered in parallel.iter().chain(&synced) {
            if registered.node.state() != NodeState::NotStarted {
                continue;
            }
            results
                .entry(registered.id)
                .or_insert_with(|| Err(NodeError::cancelled()));
            sink.emit(
                event_types::NODE_CANCELLED,
                Some(json!({
                    "node_id": registered.id,
                    "node": registered.node.name(),
                    "code": CANCELLED_ERROR_CODE,
                })),
            );
        }

        let duration_ms = timer.finish();
        let failed = results.values().filter(|r| r.is_err()).count();
        let payload = json!({
            "pipeline": inner.config.name,
            "nodes": results.len(),
            "failed": failed,
            "duration_ms": duration_ms,
        });
        match outcome {
            FlowOutcome::Completed => {
                info!(
                    pipeline = %inner.config.name,
                    nodes = results.len(),
                    failed,
                    duration_ms,
                    "Pipeline completed"
                );
                sink.emit(event_types::PIPELINE_COMPLETED, Some(payload));
            }
            FlowOutcome::Cancelled => {
                warn!(
                    pipeline = %inner.config.name,
                    nodes = results.len(),
                    failed,
                    duration_ms,
                    "Pipeline cancelled"
                );
                sink.emit(event_types::PIPELINE_CANCELLED, Some(payload));
            }
        }

        inner.running.store(false, Ordering::SeqCst);
        results
    }

    /// Builds the composite flow: one fan-out step, then one step per synced node.
    fn build_flow(
        &self,
        run: &Arc<RunState>,
        parallel: Vec<RegisteredNode>,
        synced: Vec<RegisteredNode>,
    ) -> Flow {
        let inner = &self.inner;
        let mut flow = Flow::new(inner.config.name.clone());

        let fan_out_inner = inner.clone();
        let fan_out_run = run.clone();
        let policy = inner.config.fan_out_policy();
        let pool = inner.pool.clone();
        flow.add_concurrent_step("fan-out", move |container| {
            container.set_execution(policy);
            if let Some(pool) = pool {
                container.set_thread_pool(pool);
            }
            for registered in parallel {
                let inner = fan_out_inner.clone();
                let run = fan_out_run.clone();
                let name = registered.node.name().to_string();
                container
                    .add_or_get_flow(registered.id.as_uuid(), Some(&name))
                    .add_step("execute", move |_| {
                        inner.execute_node(&run, &registered);
                        StepControl::Continue
                    });
            }
        });

        for registered in synced {
            let inner = inner.clone();
            let run = run.clone();
            let step = format!("synced.{}", registered.node.name());
            flow.add_step(step, move |_| {
                inner.execute_node(&run, &registered);
                StepControl::Continue
            });
        }

        let cancel_run = run.clone();
        let name = inner.config.name.clone();
        flow.on_cancelled(move || cancel_run.fill_cancelled(&name));
        flow
    }

    /// Cancels the pipeline.
    ///
    /// Nodes mid-phase are asked to stop cooperatively; nodes that have not
    /// started never start and are reported as cancelled. Safe to call from
    /// any thread at any time. Calling it before [`Pipeline::run`] makes the
    /// next run report every node as cancelled.
    pub fn cancel(&self) {
        let inner = &self.inner;
        if inner.stop.request_stop() {
            info!(pipeline = %inner.config.name, "Pipeline cancel requested");
        }

        let active = inner.active.lock().clone();
        if let Some(active) = active {
            for registered in active.state.pending_nodes() {
                registered.node.cancel();
            }
            active.flow.cancel_flow();
        }
    }

    /// Runs the pipeline on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`NodeflowError::Join`] if the blocking task panicked or was
    /// aborted.
    pub async fn run_async(&self) -> Result<HashMap<NodeId, NodeResult>, NodeflowError> {
        let pipeline = self.clone();
        Ok(tokio::task::spawn_blocking(move || pipeline.run()).await?)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.inner.config)
            .field("nodes", &self.node_count())
            .field("pending", &self.pending_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingEventSink, MockEventSink};
    use crate::flow::ExecutionPolicy;
    use crate::node::Phase;
    use crate::pipeline::ExecutionMode;
    use crate::testing::{
        assert_node_cancelled, assert_node_failed_with, assert_node_succeeded,
        assert_results_cover, FailingNode, RecordingNode, SleepNode, SuccessNode,
    };
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::Registry;

    fn synchronous() -> Pipeline {
        Pipeline::new(PipelineConfig::new("test").with_execution_mode(ExecutionMode::Synchronous))
            .unwrap()
    }

    #[test]
    fn test_empty_pipeline_returns_empty_map() {
        let pipeline = Pipeline::default();
        assert!(pipeline.run().is_empty());
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_mixed_outcomes_fixed_order() {
        let pipeline = synchronous();
        let ok = pipeline.add_node(SuccessNode::new("ok"));
        let prepare = pipeline.add_node(FailingNode::new("prepare", Phase::Prepare, -1));
        let run = pipeline.add_node(FailingNode::new("run", Phase::Run, -1));
        let validate = pipeline.add_node(FailingNode::new("validate", Phase::Validate, -1));

        let results = pipeline.run();

        assert_results_cover(&results, &[ok, prepare, run, validate]);
        assert_node_succeeded(&results[&ok]);
        for (id, phase) in [(prepare, "prepare"), (run, "run"), (validate, "validate")] {
            assert_node_failed_with(&results[&id], -1);
            assert!(results[&id].as_ref().unwrap_err().message.contains(phase));
        }
    }

    #[test]
    fn test_prepare_failure_skips_later_phases() {
        let pipeline = Pipeline::default();
        let node = RecordingNode::new("rec").failing_in(Phase::Prepare, 3);
        let calls = node.calls();
        let id = pipeline.add_node(node);

        let results = pipeline.run();

        assert_node_failed_with(&results[&id], 3);
        assert_eq!(calls.counts(), (1, 0, 0));
    }

    #[test]
    fn test_synced_failure_does_not_stop_next_synced() {
        let pipeline = Pipeline::default();
        let first = pipeline.add_synced_node(FailingNode::new("first", Phase::Run, 5));
        let second = RecordingNode::new("second");
        let calls = second.calls();
        let second = pipeline.add_synced_node(second);

        let results = pipeline.run();

        assert_node_failed_with(&results[&first], 5);
        assert_node_succeeded(&results[&second]);
        assert_eq!(calls.counts(), (1, 1, 1));
    }

    #[test]
    fn test_synced_nodes_wait_for_parallel_nodes() {
        let pipeline = Pipeline::default();
        pipeline.add_node(RecordingNode::new("slow").sleeping(Duration::from_millis(200)));
        let synced = RecordingNode::new("after");
        let calls = synced.calls();
        pipeline.add_synced_node(synced);

        let began = Instant::now();
        pipeline.run();

        let started = calls.started_at().unwrap();
        assert!(started.duration_since(began) >= Duration::from_millis(200));
    }

    #[test]
    fn test_cancel_before_run_reports_every_node_cancelled() {
        let pipeline = Pipeline::default();
        let recording = RecordingNode::new("never");
        let calls = recording.calls();
        let ids = vec![
            pipeline.add_node(recording),
            pipeline.add_node(SuccessNode::new("a")),
            pipeline.add_synced_node(SuccessNode::new("b")),
        ];

        pipeline.cancel();
        let results = pipeline.run();

        assert_results_cover(&results, &ids);
        for id in &ids {
            assert_node_cancelled(&results[id]);
        }
        assert_eq!(calls.counts(), (0, 0, 0));
        assert!(pipeline.is_cancelled());
    }

    #[test]
    fn test_cancel_twice_is_idempotent() {
        let pipeline = Pipeline::default();
        let id = pipeline.add_node(SuccessNode::new("a"));
        pipeline.cancel();
        pipeline.cancel();

        let results = pipeline.run();
        assert_eq!(results.len(), 1);
        assert_eq!(results[&id].as_ref().unwrap_err().code, CANCELLED_ERROR_CODE);
    }

    #[test]
    fn test_cancel_during_run() {
        let pipeline = Pipeline::default();
        let sleeper = pipeline.add_node(SleepNode::new("sleeper", Duration::from_secs(10)));
        let synced = RecordingNode::new("synced");
        let calls = synced.calls();
        let synced = pipeline.add_synced_node(synced);

        let runner = pipeline.clone();
        let worker = std::thread::spawn(move || runner.run());
        while !pipeline.is_running() {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(100));

        let began = Instant::now();
        pipeline.cancel();
        let results = worker.join().unwrap();

        assert!(began.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), 2);
        assert!(results[&sleeper].is_err());
        assert_node_cancelled(&results[&synced]);
        assert_eq!(calls.counts(), (0, 0, 0));
    }

    #[test]
    fn test_random_policy_reachable_from_config() {
        let pipeline = Pipeline::new(
            PipelineConfig::default().with_fan_out_policy(ExecutionPolicy::SequentialRandomOrder),
        )
        .unwrap();
        let ids: Vec<_> = (0..4)
            .map(|i| pipeline.add_node(SuccessNode::new(format!("n{i}"))))
            .collect();

        let results = pipeline.run();
        assert_results_cover(&results, &ids);
    }

    #[test]
    fn test_dedicated_pool() {
        let pipeline = Pipeline::new(PipelineConfig::default().with_worker_threads(2)).unwrap();
        let ids: Vec<_> = (0..5)
            .map(|i| pipeline.add_node(SuccessNode::new(format!("n{i}"))))
            .collect();

        assert_results_cover(&pipeline.run(), &ids);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Pipeline::new(PipelineConfig::default().with_worker_threads(0)),
            Err(NodeflowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_introspection_counts() {
        let pipeline = Pipeline::default();
        pipeline.add_node(SuccessNode::new("a"));
        pipeline.add_synced_node(SuccessNode::new("b"));
        assert_eq!(pipeline.node_count(), 2);
        assert_eq!(pipeline.pending_count(), 2);

        pipeline.run();

        assert_eq!(pipeline.node_count(), 2);
        assert_eq!(pipeline.pending_count(), 0);
    }

    #[test]
    fn test_second_run_covers_only_new_nodes() {
        let pipeline = Pipeline::default();
        pipeline.add_node(SuccessNode::new("a"));
        assert_eq!(pipeline.run().len(), 1);

        let b = pipeline.add_node(SuccessNode::new("b"));
        let results = pipeline.run();
        assert_eq!(results.len(), 1);
        assert_node_succeeded(&results[&b]);
    }

    #[test]
    fn test_events_in_order_for_synchronous_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = synchronous().with_event_sink(sink.clone());
        pipeline.add_node(SuccessNode::new("ok"));
        pipeline.add_synced_node(FailingNode::new("bad", Phase::Validate, 2));

        pipeline.run();

        assert_eq!(
            sink.event_types(),
            vec![
                "pipeline.started",
                "node.started",
                "node.completed",
                "node.started",
                "node.failed",
                "pipeline.completed",
            ]
        );
        let failed = sink.events_of_type("node.failed")[0].data.clone().unwrap();
        assert_eq!(failed["code"], 2);
        assert_eq!(failed["node"], "bad");
    }

    #[test]
    fn test_cancelled_run_emits_cancel_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = Pipeline::default().with_event_sink(sink.clone());
        pipeline.add_node(SuccessNode::new("a"));
        pipeline.add_synced_node(SuccessNode::new("b"));

        pipeline.cancel();
        pipeline.run();

        assert_eq!(sink.count("node.cancelled"), 2);
        assert_eq!(sink.count("pipeline.cancelled"), 1);
        assert_eq!(sink.count("node.started"), 0);
    }

    #[test]
    fn test_mock_sink_sees_each_node_once() {
        let mut sink = MockEventSink::new();
        sink.expect_emit()
            .withf(|event_type, _| event_type == "node.started")
            .times(3)
            .return_const(());
        sink.expect_emit()
            .withf(|event_type, _| event_type != "node.started")
            .return_const(());

        let pipeline = Pipeline::default().with_event_sink(Arc::new(sink));
        for i in 0..3 {
            pipeline.add_node(SuccessNode::new(format!("n{i}")));
        }
        pipeline.run();
    }

    #[test]
    fn test_progress_reaches_one() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pipeline = Pipeline::default();
        pipeline.add_node_with_progress(
            SuccessNode::new("p"),
            Arc::new(move |v: f32| sink.lock().push(v)),
        );

        pipeline.run();

        let seen = seen.lock();
        assert!((seen.last().copied().unwrap() - 1.0).abs() < f32::EPSILON);
    }

    /// Holds up any event carrying a `pending` field, so the cancellation
    /// handler stays busy after the run has already returned.
    struct StallOnPendingReport(Duration);

    impl<S: Subscriber> Layer<S> for StallOnPendingReport {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().fields().field("pending").is_some() {
                std::thread::sleep(self.0);
            }
        }
    }

    #[test]
    fn test_late_cancel_handler_does_not_leak_into_next_run() {
        let pipeline = Pipeline::default();
        let sleeper = pipeline.add_synced_node(SleepNode::new("sleeper", Duration::from_secs(10)));

        let runner = pipeline.clone();
        let worker = std::thread::spawn(move || runner.run());
        while !pipeline.is_running() {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(100));

        let canceller = pipeline.clone();
        let cancel_thread = std::thread::spawn(move || {
            let subscriber =
                Registry::default().with(StallOnPendingReport(Duration::from_millis(400)));
            tracing::subscriber::with_default(subscriber, || canceller.cancel());
        });

        let first = worker.join().unwrap();
        assert_eq!(first.len(), 1);
        assert!(first.contains_key(&sleeper));

        cancel_thread.join().unwrap();
        let b = pipeline.add_node(SuccessNode::new("b"));
        let second = pipeline.run();

        assert_eq!(second.len(), 1);
        assert!(second.contains_key(&b));
        assert!(!second.contains_key(&sleeper));
    }

    #[tokio::test]
    async fn test_run_async() {
        let pipeline = Pipeline::default();
        let id = pipeline.add_node(SuccessNode::new("async"));

        let results = pipeline.run_async().await.unwrap();

        assert_node_succeeded(&results[&id]);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_run_async_leaves_pipeline_usable() {
        let pipeline = Pipeline::default();
        pipeline.add_node(SuccessNode::new("first"));
        assert_eq!(pipeline.run_async().await.unwrap().len(), 1);

        let id = pipeline.add_node(SuccessNode::new("second"));
        let results = pipeline.run_async().await.unwrap();

        assert_node_succeeded(&results[&id]);
    }
}
