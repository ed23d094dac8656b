use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use streamtask::{Pipeline, PipelineConfig, StageOptions};

const ITEMS: u64 = 20_000;

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_batch_size(256)
        .with_poll_interval(Duration::from_millis(50))
        .with_progress_interval(Duration::from_secs(60))
}

fn run_three_stages(workers: usize, parallel: bool) -> usize {
    let mut pipeline = Pipeline::new(config())
        .add_data(0..ITEMS, StageOptions::default())
        .expect("source")
        .add_stage("square", |x: u64| Ok(x.wrapping_mul(x)), StageOptions::new(workers))
        .expect("square stage")
        .add_stage(
            "format",
            |x: u64| Ok(format!("{:016x}", x)),
            StageOptions::new(workers),
        )
        .expect("format stage")
        .add_stage("len", |s: String| Ok(s.len()), StageOptions::new(workers))
        .expect("len stage");

    pipeline.run(parallel).expect("run");
    pipeline.join().expect("join");
    pipeline.get_results().expect("results").len()
}

fn bench_worker_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("three_stage_pipeline");
    group.throughput(Throughput::Elements(ITEMS));
    group.sample_size(20);

    for workers in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("parallel", workers), &workers, |b, &w| {
            b.iter(|| black_box(run_three_stages(w, true)));
        });
    }

    group.bench_function("sequential", |b| {
        b.iter(|| black_box(run_three_stages(1, false)));
    });

    group.finish();
}

criterion_group!(benches, bench_worker_counts);
criterion_main!(benches);
