//! Stripe pool benchmarks using criterion.

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use stripe_pool::{ParkBarrier, StripePool, TickOutcome, TickResult, TickableStripe};

#[derive(Default)]
struct Spin {
    ticks: AtomicU64,
}

impl TickableStripe for Spin {
    fn tick(&self) -> TickResult {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        Ok(TickOutcome::DidWork)
    }
}

fn park_cycle_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("park_cycle");

    for stripes in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("busy", stripes), &stripes, |b, &n| {
            let mut pool = StripePool::<Spin>::new();
            pool.start((0..n).map(|_| Arc::new(Spin::default())).collect())
                .unwrap();
            b.iter(|| {
                pool.park_all_threads();
                pool.unpark_all_threads();
            });
            pool.stop_and_join().unwrap();
        });
    }

    group.finish();
}

fn barrier_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier");
    group.throughput(Throughput::Elements(1));

    let barrier = ParkBarrier::new(1);
    group.bench_function("poll", |b| {
        b.iter(|| black_box(barrier.poll()));
    });

    group.finish();
}

fn lifecycle_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");
    group.sample_size(20);

    for stripes in [1, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("start_stop", stripes),
            &stripes,
            |b, &n| {
                b.iter(|| {
                    let mut pool = StripePool::<Spin>::new();
                    pool.start((0..n).map(|_| Arc::new(Spin::default())).collect())
                        .unwrap();
                    pool.stop_and_join().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    park_cycle_benchmarks,
    barrier_benchmarks,
    lifecycle_benchmarks
);
criterion_main!(benches);
