use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relaxed_bfs::prelude::*;
use relaxed_bfs::queues::{DcboQueue, FaaArrayQueue, FlatFaaArrayQueue, MsQueue};

const OPS: usize = 100_000;
const THREADS: usize = 4;

/// Every thread pushes its share and then drains until the queue is dry.
fn pump<Q: ConcurrentQueue<NodeId> + Sync>(queue: &Q, thread_pool: &rayon::ThreadPool) {
    thread_pool.broadcast(|ctx| {
        let tid = ctx.index();
        for i in 0..(OPS / THREADS) as NodeId {
            queue.enqueue(i, tid);
        }
        while queue.dequeue(tid).is_some() {}
    });
}

pub fn bench_queues(c: &mut Criterion) {
    let thread_pool = Threads::NumThreads(THREADS).build();
    let mut group = c.benchmark_group("Queue throughput");
    group.throughput(Throughput::Elements(OPS as u64));

    group.bench_with_input(
        BenchmarkId::new("michael-scott", OPS),
        &thread_pool,
        |b, pool| b.iter(|| pump(&MsQueue::with_max_threads(THREADS), pool)),
    );

    group.bench_with_input(
        BenchmarkId::new("faa-array", OPS),
        &thread_pool,
        |b, pool| b.iter(|| pump(&FlatFaaArrayQueue::with_max_threads(THREADS), pool)),
    );

    group.bench_with_input(
        BenchmarkId::new("faa-array-boxed", OPS),
        &thread_pool,
        |b, pool| b.iter(|| pump(&FaaArrayQueue::with_max_threads(THREADS), pool)),
    );

    group.bench_with_input(
        BenchmarkId::new("d-cbo-faa-array", OPS),
        &thread_pool,
        |b, pool| {
            b.iter(|| {
                pump(
                    &DcboQueue::<FlatFaaArrayQueue>::new(64, 2).unwrap(),
                    pool,
                )
            })
        },
    );

    group.finish();
}

criterion_group!(benches, bench_queues);
criterion_main!(benches);
