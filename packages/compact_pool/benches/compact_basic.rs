//! Basic benchmarks for the `compact_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::alloc::Layout;
use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use compact_pool::CompactPool;
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const POOL_CAPACITY: usize = 1024 * 1024;
const BLOCK: Layout = Layout::new::<u64>();

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("compact_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(
                    CompactPool::builder().capacity(POOL_CAPACITY).build(),
                ));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_one");
    group.bench_function("allocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools =
                iter::repeat_with(|| CompactPool::builder().capacity(POOL_CAPACITY).build())
                    .take(usize::try_from(iters).unwrap())
                    .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(BLOCK)).unwrap());
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("resolve_one");
    group.bench_function("resolve_one", |b| {
        b.iter_custom(|iters| {
            let mut pool = CompactPool::builder().capacity(POOL_CAPACITY).build();
            let handle = pool.allocate(BLOCK).unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.address_of(black_box(handle)).unwrap());
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("compact_slow");

    let allocs_op = allocs.operation("churn_fill_free_refill");
    group.bench_function("churn_fill_free_refill", |b| {
        // Fill the pool, free every other block, refill with double-size
        // blocks. Every refill allocation rides on a compaction pass, so
        // this measures the relocation machinery end to end.
        b.iter_custom(|iters| {
            let layout = Layout::from_size_align(64, 1).unwrap();
            let double = Layout::from_size_align(128, 1).unwrap();
            let count = POOL_CAPACITY / 64;

            let mut pools =
                iter::repeat_with(|| CompactPool::builder().capacity(POOL_CAPACITY).build())
                    .take(usize::try_from(iters).unwrap())
                    .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                let handles = iter::repeat_with(|| pool.allocate(layout).unwrap())
                    .take(count)
                    .collect::<Vec<_>>();

                for handle in handles.iter().step_by(2) {
                    pool.deallocate(*handle).unwrap();
                }

                for _ in 0..count / 4 {
                    _ = black_box(pool.allocate(double).unwrap());
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
