//! Per-element relaxed BFS kernel.
//!
//! Workers share a single lock-free frontier queue and a vector of packed
//! `(parent, depth)` cells. There are no synchronous level phases: each
//! worker alternates *dequeue → relax out-neighbors → enqueue* until the
//! termination detector declares the pool quiescent. A vertex may be
//! dequeued more than once, but only when some worker shortened its depth
//! in the meantime, so depths converge to the true BFS distances whatever
//! the interleaving.

use dsi_progress_logger::ProgressLog;
use rayon::ThreadPool;
use webgraph::traits::RandomAccessGraph;

use super::parent_depth::{ParentDepth, ParentDepthVec};
use super::termination::TerminationDetection;
use super::{relax_node, sequential_expand, BfsResult};
use crate::queues::{ConcurrentQueue, NodeId, NIL};

pub(super) fn run<G, Q>(
    graph: &G,
    queue: &Q,
    source: usize,
    seq_start: u32,
    thread_pool: &ThreadPool,
    pl: &mut impl ProgressLog,
) -> BfsResult
where
    G: RandomAccessGraph + Sync,
    Q: ConcurrentQueue<NodeId> + Sync,
{
    let cells = ParentDepthVec::new(graph.num_nodes());
    cells.set(
        source,
        ParentDepth {
            parent: source as NodeId,
            depth: 0,
        },
    );

    if seq_start > 0 {
        // The first layers are too small to amortize queue contention;
        // expand them on this thread and hand over the surviving frontier.
        for node in sequential_expand(graph, &cells, source, seq_start) {
            queue.enqueue(node, 0);
        }
    } else {
        queue.enqueue(source as NodeId, 0);
    }

    pl.expected_updates(Some(graph.num_nodes()));
    pl.start("Visiting graph with a relaxed parallel BFS...");

    let termination = TerminationDetection::new(thread_pool.current_num_threads());

    let stats = thread_pool.broadcast(|ctx| {
        let tid = ctx.index();
        let mut visited = 0u64;
        let mut revisited = 0u64;
        let mut node = NIL;
        while termination.repeat(|| match queue.dequeue(tid) {
            Some(value) => {
                node = value;
                true
            }
            None => false,
        }) {
            visited += 1;
            relax_node(graph, &cells, node, &mut revisited, |relaxed| {
                queue.enqueue(relaxed, tid)
            });
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
