use relaxed_bfs::bfs::TerminationDetection;
use relaxed_bfs::prelude::*;
use relaxed_bfs::queues::FlatFaaArrayQueue;

#[test]
fn test_pool_drains_queue_exactly_once() {
    const ITEMS: i32 = 50_000;
    const THREADS: usize = 4;

    let queue = FlatFaaArrayQueue::with_max_threads(THREADS);
    for i in 0..ITEMS {
        queue.enqueue(i, 0);
    }

    let thread_pool = Threads::NumThreads(THREADS).build();
    let termination = TerminationDetection::new(thread_pool.current_num_threads());

    let consumed = thread_pool.broadcast(|ctx| {
        let tid = ctx.index();
        let mut values = Vec::new();
        while termination.repeat(|| match queue.dequeue(tid) {
            Some(value) => {
                values.push(value);
                true
            }
            None => false,
        }) {}
        values
    });

    // Every worker was released by the detector and every item was handed
    // to exactly one of them.
    let mut all: Vec<_> = consumed.into_iter().flatten().collect();
    assert_eq!(all.len(), ITEMS as usize);
    all.sort_unstable();
    for (expected, value) in all.into_iter().enumerate() {
        assert_eq!(value, expected as NodeId);
    }
}

#[test]
fn test_empty_queue_terminates() {
    const THREADS: usize = 8;
    let queue = FlatFaaArrayQueue::with_max_threads(THREADS);
    let thread_pool = Threads::NumThreads(THREADS).build();
    let termination = TerminationDetection::new(thread_pool.current_num_threads());

    let outcomes = thread_pool.broadcast(|ctx| {
        let tid = ctx.index();
        termination.repeat(|| queue.dequeue(tid).is_some())
    });
    assert_eq!(outcomes, vec![false; THREADS]);
}

#[test]
fn test_work_found_while_going_idle() {
    // Consumed items keep producing new work for a while, so workers race
    // between idling and retrying; nothing may be lost and the count of a
    // full binary production tree must come out exactly.
    const THREADS: usize = 4;
    const LEVELS: u32 = 18;

    let queue = FlatFaaArrayQueue::with_max_threads(THREADS);
    queue.enqueue(0, 0);
    let thread_pool = Threads::NumThreads(THREADS).build();
    let termination = TerminationDetection::new(thread_pool.current_num_threads());

    let consumed = thread_pool.broadcast(|ctx| {
        let tid = ctx.index();
        let mut count = 0u64;
        while termination.repeat(|| match queue.dequeue(tid) {
            Some(value) => {
                // Each consumed value spawns two successors, cut off at
                // the last level.
                if (value as u32) < LEVELS - 1 {
                    queue.enqueue(value + 1, tid);
                    queue.enqueue(value + 1, tid);
                }
                count += 1;
                true
            }
            None => false,
        }) {}
        count
    });

    let total: u64 = consumed.into_iter().sum();
    assert_eq!(total, (1 << LEVELS) - 1);
    assert_eq!(queue.dequeue(0), None);
}
