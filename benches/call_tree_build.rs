/// Aggregation and call tree construction benchmarks
///
/// Feeds synthetic stacks through the frequency table and the tree builder
/// to track the cost of the post-sampling phase as sample counts grow.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stacksampler::aggregate::ThreadSamples;
use stacksampler::call_tree::CallTree;
use stacksampler::stack_unwind::CallStack;

/// Deterministic stacks of depth 8..24 drawn from a handful of call paths
fn synthetic_stacks(count: usize) -> Vec<CallStack> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let depth = 8 + (state % 16) as usize;
            let frames = (0..depth)
                .map(|level| 0x40_0000 + ((state >> level) & 0x3) * 0x100 + level as u64)
                .collect();
            CallStack::new(frames)
        })
        .collect()
}

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");

    for count in [100usize, 1_000, 10_000] {
        let stacks = synthetic_stacks(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &stacks, |b, stacks| {
            b.iter(|| {
                let mut samples = ThreadSamples::new();
                for stack in stacks {
                    samples.record(stack);
                }
                black_box(samples);
            });
        });
    }

    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");

    for count in [100usize, 1_000, 10_000] {
        let mut samples = ThreadSamples::new();
        for stack in synthetic_stacks(count) {
            samples.record(&stack);
        }
        let records = samples.records();

        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &records, |b, records| {
            b.iter(|| black_box(CallTree::build(records.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record, bench_build);
criterion_main!(benches);
