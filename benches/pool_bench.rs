//! Performance benchmarks for pool operations

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use slabpool::metrics::METRICS;
use slabpool::{DiagnosticPool, SlabPool};

fn slab_pool_benchmark(c: &mut Criterion) {
    let pool = SlabPool::new(4096, 32);
    // Warm the free queue so the steady state is measured, not slab carving.
    let warmup: Vec<_> = (0..64).map(|_| pool.rent(64).unwrap()).collect();
    drop(warmup);

    let mut group = c.benchmark_group("slab_pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rent_return_cycle", |b| {
        b.iter(|| {
            let block = pool.rent(64).unwrap();
            black_box(&block);
            drop(block);
        })
    });

    group.bench_function("rent_write_return", |b| {
        b.iter(|| {
            let mut block = pool.rent(4096).unwrap();
            block[0] = 0x42;
            black_box(&block);
            drop(block);
        })
    });

    group.finish();
}

fn diagnostic_pool_benchmark(c: &mut Criterion) {
    let pool = DiagnosticPool::with_late_return(SlabPool::new(4096, 32));
    let warmup: Vec<_> = (0..64).map(|_| pool.rent(64).unwrap()).collect();
    drop(warmup);

    let mut group = c.benchmark_group("diagnostic_pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("tracked_rent_return_cycle", |b| {
        b.iter(|| {
            let mut block = pool.rent(64).unwrap();
            black_box(&block);
            block.dispose();
        })
    });

    group.finish();
}

fn metrics_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("counter_increment", |b| {
        b.iter(|| {
            METRICS.block_rented();
        })
    });

    group.bench_function("snapshot", |b| {
        b.iter(|| {
            black_box(METRICS.snapshot());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    slab_pool_benchmark,
    diagnostic_pool_benchmark,
    metrics_benchmark
);
criterion_main!(benches);
