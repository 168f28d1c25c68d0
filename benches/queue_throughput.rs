//! Queue and pool throughput benchmarks.
//!
//! Measures the cost of the double-buffered queue discipline and the
//! end-to-end task rate of the pool.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench queue_throughput
//! cargo bench --bench queue_throughput -- double_queue
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use taskpool_rs::stdx::DoubleQueue;
use taskpool_rs::{TaskQueue, ThreadPool};

const BATCH: usize = 10_000;

fn bench_double_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("double_queue");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("push_pop_interleaved", |b| {
        let queue = DoubleQueue::new(0);
        b.iter(|| {
            for value in 0..BATCH {
                queue.push(black_box(value));
            }
            for _ in 0..BATCH {
                black_box(queue.pop());
            }
        });
    });

    group.bench_function("push_then_drain", |b| {
        let queue = DoubleQueue::new(0);
        b.iter(|| {
            for value in 0..BATCH {
                queue.push(black_box(value));
            }
            let mut out = std::collections::VecDeque::new();
            queue.pop_all(&mut out);
            black_box(out.len())
        });
    });

    group.finish();
}

fn bench_task_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_queue");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("put_take", |b| {
        let queue = TaskQueue::new(0);
        b.iter(|| {
            for _ in 0..BATCH {
                queue.put(Box::new(|| {}));
            }
            while let Some(task) = taskpool_rs::TaskPool::take(&*queue) {
                black_box(task);
            }
        });
    });

    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.sample_size(10);

    group.bench_function("fan_out_empty_tasks", |b| {
        b.iter(|| {
            let pool = ThreadPool::new(4);
            let queue = TaskQueue::new(0);
            pool.task_manager().insert(queue.clone());

            let completed = Arc::new(AtomicUsize::new(0));
            for _ in 0..BATCH {
                let completed = Arc::clone(&completed);
                queue.put(Box::new(move || {
                    completed.fetch_add(1, Ordering::Relaxed);
                }));
            }
            drop(pool);
            assert_eq!(completed.load(Ordering::Relaxed), BATCH);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_double_queue, bench_task_queue, bench_pool);
criterion_main!(benches);
