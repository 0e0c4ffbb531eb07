#![expect(missing_docs, reason = "benchmarks")]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use deferred::{Deferred, EventQueue, Runtime, all, resolved, spawn};

fn entrypoint(c: &mut Criterion) {
    let runtime = Runtime::new();

    let mut g = c.benchmark_group("deferred");

    g.bench_function("settle_and_observe", |b| {
        b.iter(|| {
            let (deferred, settler) = Deferred::<u64, ()>::create();
            settler.settle_ok(black_box(42));
            black_box(runtime.block_on(deferred))
        });
    });

    g.bench_function("then_chain_10", |b| {
        b.iter(|| {
            let mut chain = resolved::<u64, ()>(black_box(0));

            for _ in 0..10 {
                chain = chain.then(|value| Ok(value.wrapping_add(1)));
            }

            black_box(runtime.block_on(chain))
        });
    });

    g.bench_function("all_100", |b| {
        b.iter(|| {
            let inputs = (0..100_u64).map(resolved::<u64, ()>);
            black_box(runtime.block_on(all(inputs)))
        });
    });

    g.bench_function("spawn_await_10", |b| {
        b.iter(|| {
            let task = spawn(async {
                let mut total: u64 = 0;

                for i in 0..10 {
                    total = total.wrapping_add(resolved::<u64, ()>(i).await?);
                }

                Ok::<_, ()>(total)
            });

            black_box(runtime.block_on(task))
        });
    });

    g.finish();

    let mut g = c.benchmark_group("event_queue");

    g.bench_function("push_pull_100", |b| {
        let queue = EventQueue::new();

        b.iter(|| {
            for i in 0..100_u64 {
                queue.push(black_box(i)).unwrap();
            }

            for _ in 0..100 {
                _ = black_box(runtime.block_on(queue.pull()).unwrap());
            }
        });
    });

    g.bench_function("pull_push_100", |b| {
        let queue = EventQueue::new();

        b.iter(|| {
            let pulls: Vec<_> = (0..100).map(|_| queue.pull()).collect();

            for i in 0..100_u64 {
                queue.push(black_box(i)).unwrap();
            }

            _ = black_box(runtime.block_on(all(pulls)).unwrap());
        });
    });

    g.finish();
}

criterion_group!(benches, entrypoint);
criterion_main!(benches);
