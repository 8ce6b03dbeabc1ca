//! Batched relaxed BFS kernel.
//!
//! Identical relaxation protocol to the [per-element kernel](super::relaxed),
//! but frontier items are `[NodeId; B]` arrays, terminated by `-1` when
//! partially filled, so one queue operation moves up to `B` vertices.
//!
//! Before flushing a partially-filled output batch, a worker tries one
//! extra non-escalating dequeue and keeps whichever batch starts shallower
//! for itself, processing the other one right after; this keeps workers on
//! the low-depth frontier and spares a queue round-trip for the local
//! batch. The backup attempt never touches the termination counters: a
//! worker holding an unflushed batch is not idle.

use dsi_progress_logger::ProgressLog;
use rayon::ThreadPool;
use webgraph::traits::RandomAccessGraph;

use super::parent_depth::{ParentDepth, ParentDepthVec};
use super::termination::TerminationDetection;
use super::{relax_node, sequential_expand, BfsResult};
use crate::queues::{ConcurrentQueue, NodeId, NIL};

pub(super) fn run<G, Q, const B: usize>(
    graph: &G,
    queue: &Q,
    source: usize,
    seq_start: u32,
    thread_pool: &ThreadPool,
    pl: &mut impl ProgressLog,
) -> BfsResult
where
    G: RandomAccessGraph + Sync,
    Q: ConcurrentQueue<[NodeId; B]> + Sync,
{
    assert!(
        B >= 2,
        "batches need room for the terminator; use the per-element kernel instead"
    );

    let cells = ParentDepthVec::new(graph.num_nodes());
    cells.set(
        source,
        ParentDepth {
            parent: source as NodeId,
            depth: 0,
        },
    );

    if seq_start > 0 {
        let mut batch = [NIL; B];
        let mut len = 0;
        for node in sequential_expand(graph, &cells, source, seq_start) {
            batch[len] = node;
            len += 1;
            if len == B {
                queue.enqueue(batch, 0);
                batch = [NIL; B];
                len = 0;
            }
        }
        if len > 0 {
            queue.enqueue(batch, 0);
        }
    } else {
        let mut batch = [NIL; B];
        batch[0] = source as NodeId;
        queue.enqueue(batch, 0);
    }

    pl.expected_updates(Some(graph.num_nodes()));
    pl.start("Visiting graph with a batched relaxed parallel BFS...");

    let termination = TerminationDetection::new(thread_pool.current_num_threads());

    let stats = thread_pool.broadcast(|ctx| {
        let tid = ctx.index();
        let mut visited = 0u64;
        let mut revisited = 0u64;
        let mut consumer = [NIL; B];
        let mut backup = [NIL; B];
        let mut producer = [NIL; B];
        let mut producer_len = 0;
        let mut do_backup = false;

        while termination.repeat(|| match queue.dequeue(tid) {
            Some(batch) => {
                consumer = batch;
                true
            }
            None => false,
        }) {
            loop {
                for &node in consumer.iter() {
                    if node == NIL {
                        break;
                    }
                    visited += 1;
                    relax_node(graph, &cells, node, &mut revisited, |relaxed| {
                        producer[producer_len] = relaxed;
                        producer_len += 1;
                        if producer_len == B {
                            queue.enqueue(producer, tid);
                            producer = [NIL; B];
                            producer_len = 0;
                        }
                    });
                }

                if do_backup {
                    // A batch stashed by an earlier backup dequeue is still
                    // waiting for us.
                    consumer = backup;
                    do_backup = false;
                    continue;
                }

                if producer_len == 0 {
                    break;
                }

                // The output batch is partial. Rather than flushing it,
                // grab one more batch if there is one and process the
                // shallower of the two first.
                match queue.single_dequeue(tid) {
                    Some(other) => {
                        let other_depth = cells.get(other[0] as usize).depth;
                        let ours_depth = cells.get(producer[0] as usize).depth;
                        if other_depth >= ours_depth {
                            producer[producer_len] = NIL;
                            consumer = producer;
                            producer = [NIL; B];
                            producer_len = 0;
                            backup = other;
                            do_backup = true;
                        } else {
                            consumer = other;
                        }
                    }
                    None => {
                        producer[producer_len] = NIL;
                        consumer = producer;
                        producer = [NIL; B];
                        producer_len = 0;
                    }
                }
            }
        }
        (visited, revisited)
    });

    let nodes_visited = stats.iter().map(|&(visited, _)| visited).sum();
    let nodes_revisited = stats.iter().map(|&(_, revisited)| revisited).sum();

    pl.update_with_count(nodes_visited as usize);
    pl.done();

    BfsResult {
        parents: cells.parents(),
        depths: cells.depths(),
        nodes_visited,
        nodes_revisited,
    }
}
