//! End-to-end properties of pipeline runs.

use nodeflow::prelude::*;
use nodeflow::testing::{
    assert_node_cancelled, assert_node_failed_with, assert_node_succeeded, assert_results_cover,
    FailingNode, RecordingNode, SleepNode, SuccessNode,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records the order in which nodes reach their run phase.
struct OrderNode {
    name: String,
    order: Arc<Mutex<Vec<String>>>,
}

impl OrderNode {
    fn new(name: &str, order: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            order: order.clone(),
        }
    }
}

impl Node for OrderNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }

    fn run(&mut self, _ctx: &NodeContext) -> NodeResult {
        self.order.lock().push(self.name.clone());
        Ok(())
    }

    fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
        Ok(())
    }
}

fn pipeline_with(policy: ExecutionPolicy) -> Pipeline {
    Pipeline::new(PipelineConfig::new("props").with_fan_out_policy(policy)).unwrap()
}

#[test]
fn every_registered_node_gets_exactly_one_result() {
    for (parallel, synced) in [(0, 0), (1, 0), (0, 3), (5, 2), (12, 4)] {
        let pipeline = Pipeline::default();
        let mut ids = Vec::new();
        for i in 0..parallel {
            ids.push(match i % 3 {
                0 => pipeline.add_node(SuccessNode::new(format!("p{i}"))),
                1 => pipeline.add_node(FailingNode::new(format!("p{i}"), Phase::Run, 1)),
                _ => pipeline.add_node(FailingNode::new(format!("p{i}"), Phase::Validate, 2)),
            });
        }
        for i in 0..synced {
            ids.push(pipeline.add_synced_node(SuccessNode::new(format!("s{i}"))));
        }

        let results = pipeline.run();
        assert_results_cover(&results, &ids);
    }
}

#[test]
fn mixed_outcomes_are_reported_per_phase() {
    let pipeline = pipeline_with(ExecutionPolicy::SequentialFixedOrder);
    let success = pipeline.add_node(SuccessNode::new("success"));
    let prepare = pipeline.add_node(FailingNode::new("prepare", Phase::Prepare, -1));
    let run = pipeline.add_node(FailingNode::new("run", Phase::Run, -1));
    let validate = pipeline.add_node(FailingNode::new("validate", Phase::Validate, -1));

    let results = pipeline.run();

    assert_eq!(results.len(), 4);
    assert_node_succeeded(&results[&success]);
    let messages: Vec<String> = [prepare, run, validate]
        .iter()
        .map(|id| {
            assert_node_failed_with(&results[id], -1);
            results[id].as_ref().unwrap_err().message.clone()
        })
        .collect();
    assert_eq!(messages, vec!["prepare failed", "run failed", "validate failed"]);
}

#[test]
fn fixed_order_runs_nodes_one_after_another() {
    let pipeline = pipeline_with(ExecutionPolicy::SequentialFixedOrder);
    let nodes: Vec<RecordingNode> = ["a", "b", "c"]
        .into_iter()
        .map(|n| RecordingNode::new(n).sleeping(Duration::from_millis(20)))
        .collect();
    let calls: Vec<_> = nodes.iter().map(RecordingNode::calls).collect();
    for node in nodes {
        pipeline.add_node(node);
    }

    pipeline.run();

    for pair in calls.windows(2) {
        let earlier_validate = pair[0].phase_started_at(Phase::Validate).unwrap();
        let later_prepare = pair[1].phase_started_at(Phase::Prepare).unwrap();
        assert!(earlier_validate <= later_prepare);
    }
}

#[test]
fn random_order_first_node_is_roughly_uniform() {
    const NODES: usize = 4;
    const RUNS: usize = 400;

    let mut firsts: HashMap<String, usize> = HashMap::new();
    for _ in 0..RUNS {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline_with(ExecutionPolicy::SequentialRandomOrder);
        for i in 0..NODES {
            pipeline.add_node(OrderNode::new(&format!("n{i}"), &order));
        }
        pipeline.run();

        let first = order.lock()[0].clone();
        *firsts.entry(first).or_default() += 1;
    }

    assert_eq!(firsts.len(), NODES);
    let expected = RUNS / NODES;
    for (node, count) in &firsts {
        assert!(
            count.abs_diff(expected) < expected / 2,
            "node {node} ran first {count} times out of {RUNS}"
        );
    }
}

#[test]
fn parallel_threads_overlap() {
    let pipeline = Pipeline::new(PipelineConfig::default().with_worker_threads(4)).unwrap();
    let nap = Duration::from_millis(200);
    for i in 0..4 {
        pipeline.add_node(RecordingNode::new(format!("n{i}")).sleeping(nap));
    }

    let began = Instant::now();
    let results = pipeline.run();
    let elapsed = began.elapsed();

    assert_eq!(results.len(), 4);
    assert!(elapsed >= nap);
    assert!(elapsed < nap * 3, "parallel run took {elapsed:?}");
}

#[test]
fn synced_nodes_start_after_parallel_nodes_finish() {
    let pipeline = Pipeline::default();
    pipeline.add_node(RecordingNode::new("slow").sleeping(Duration::from_millis(200)));
    pipeline.add_node(SuccessNode::new("fast"));
    let first = RecordingNode::new("first");
    let second = RecordingNode::new("second");
    let (first_calls, second_calls) = (first.calls(), second.calls());
    pipeline.add_synced_node(first);
    pipeline.add_synced_node(second);

    let began = Instant::now();
    pipeline.run();

    let first_start = first_calls.started_at().unwrap();
    assert!(first_start.duration_since(began) >= Duration::from_millis(200));
    let first_validated = first_calls.phase_started_at(Phase::Validate).unwrap();
    assert!(second_calls.started_at().unwrap() >= first_validated);
}

#[test]
fn prepare_failure_never_runs_later_phases() {
    let pipeline = Pipeline::default();
    let node = RecordingNode::new("broken").failing_in(Phase::Prepare, -1);
    let calls = node.calls();
    let id = pipeline.add_node(node);

    let results = pipeline.run();

    assert_node_failed_with(&results[&id], -1);
    assert_eq!(calls.counts(), (1, 0, 0));
}

#[test]
fn cancel_before_start_reports_sentinel_for_every_node() {
    let pipeline = Pipeline::default();
    let ids = vec![
        pipeline.add_node(SuccessNode::new("a")),
        pipeline.add_node(FailingNode::new("b", Phase::Run, 4)),
        pipeline.add_synced_node(SuccessNode::new("c")),
    ];

    pipeline.cancel();
    pipeline.cancel();
    let results = pipeline.run();

    assert_results_cover(&results, &ids);
    for id in &ids {
        assert_node_cancelled(&results[id]);
        assert_eq!(results[id].as_ref().unwrap_err().code, CANCELLED_ERROR_CODE);
    }
}

#[test]
fn cancel_mid_run_unwinds_and_fires_once() {
    let sink = Arc::new(CollectingEventSink::new());
    let pipeline = Pipeline::default().with_event_sink(sink.clone());
    let sleepers: Vec<_> = (0..3)
        .map(|i| {
            pipeline.add_node(SleepNode::new(format!("sleep{i}"), Duration::from_secs(30)))
        })
        .collect();
    let synced = pipeline.add_synced_node(SuccessNode::new("after"));

    let runner = pipeline.clone();
    let handle = std::thread::spawn(move || runner.run());
    std::thread::sleep(Duration::from_millis(150));

    let canceller = pipeline.clone();
    std::thread::spawn(move || canceller.cancel()).join().unwrap();
    pipeline.cancel();
    let results = handle.join().unwrap();

    assert_eq!(results.len(), 4);
    for id in &sleepers {
        assert!(results[id].is_err());
    }
    assert_node_cancelled(&results[&synced]);
    assert_eq!(sink.count("pipeline.cancelled"), 1);
    assert_eq!(sink.count("pipeline.completed"), 0);
}

#[test]
fn cancel_with_one_worker_reports_queued_nodes() {
    let sink = Arc::new(CollectingEventSink::new());
    let pipeline = Pipeline::new(PipelineConfig::new("single").with_worker_threads(1))
        .unwrap()
        .with_event_sink(sink.clone());
    let ids: Vec<_> = (0..4)
        .map(|i| {
            pipeline.add_node(SleepNode::new(format!("sleep{i}"), Duration::from_secs(30)))
        })
        .collect();

    let runner = pipeline.clone();
    let handle = std::thread::spawn(move || runner.run());
    while sink.count("node.started") == 0 {
        std::thread::sleep(Duration::from_millis(5));
    }
    // Let the started node reach its run phase.
    std::thread::sleep(Duration::from_millis(100));

    let began = Instant::now();
    pipeline.cancel();
    let results = handle.join().unwrap();

    assert!(began.elapsed() < Duration::from_secs(5));
    assert_results_cover(&results, &ids);
    let codes: Vec<i32> = ids
        .iter()
        .map(|id| results[id].as_ref().unwrap_err().code)
        .collect();
    let interrupted = codes
        .iter()
        .filter(|&&c| c == SleepNode::INTERRUPTED_CODE)
        .count();
    let never_started = codes.iter().filter(|&&c| c == CANCELLED_ERROR_CODE).count();
    assert_eq!((interrupted, never_started), (1, 3));
    assert_eq!(sink.count("node.started"), 1);
    assert_eq!(sink.count("pipeline.cancelled"), 1);
    assert_eq!(sink.count("pipeline.completed"), 0);
}

#[test]
fn custom_nodes_share_state_through_arcs() {
    struct Counter {
        hits: Arc<AtomicUsize>,
    }

    impl Node for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn prepare(&mut self, _ctx: &NodeContext) -> NodeResult {
            Ok(())
        }

        fn run(&mut self, ctx: &NodeContext) -> NodeResult {
            ctx.report_progress(0.5);
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn validate(&mut self, _ctx: &NodeContext) -> NodeResult {
            Ok(())
        }
    }

    let hits = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::default();
    for _ in 0..8 {
        pipeline.add_node(Counter { hits: hits.clone() });
    }

    let results = pipeline.run();

    assert_eq!(hits.load(Ordering::SeqCst), 8);
    assert!(results.values().all(Result::is_ok));
}

#[test]
fn run_async_from_a_runtime() {
    let pipeline = Pipeline::default();
    let id = pipeline.add_node(SuccessNode::new("async"));

    let results = tokio_test::block_on(pipeline.run_async()).unwrap();

    assert_node_succeeded(&results[&id]);
}
