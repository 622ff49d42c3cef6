//! Benchmarks for fan-out execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nodeflow::flow::ExecutionPolicy;
use nodeflow::pipeline::{Pipeline, PipelineConfig};
use nodeflow::testing::SuccessNode;

fn run_pipeline(policy: ExecutionPolicy, nodes: usize) -> usize {
    let pipeline = Pipeline::new(PipelineConfig::new("bench").with_fan_out_policy(policy))
        .expect("valid bench config");
    for i in 0..nodes {
        pipeline.add_node(SuccessNode::new(format!("n{i}")));
    }
    pipeline.run().len()
}

fn fanout_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    for nodes in [1, 16, 128] {
        for policy in [
            ExecutionPolicy::SequentialFixedOrder,
            ExecutionPolicy::SequentialRandomOrder,
            ExecutionPolicy::ParallelThreads,
        ] {
            group.bench_with_input(BenchmarkId::new(policy.to_string(), nodes), &nodes, |b, &n| {
                b.iter(|| black_box(run_pipeline(policy, n)));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, fanout_benchmark);
criterion_main!(benches);
