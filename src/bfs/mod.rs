//! Relaxed parallel breadth-first search.
//!
//! The traversal keeps one packed [`(parent, depth)`](ParentDepth) cell per
//! vertex and a single shared frontier queue. Workers relax out-neighbors
//! with a depth-guarded 64-bit CAS and re-enqueue a vertex whenever they
//! shorten its depth, so no level synchronization is needed: the frontier
//! may interleave layers freely, yet depths converge to the true BFS
//! distances because every shorter path eventually wins its CAS.
//!
//! [`RelaxedBfs`] wires a graph to one of the [queue kinds](QueueKind):
//!
//! ```rust
//! use relaxed_bfs::prelude::*;
//! use dsi_progress_logger::no_logging;
//! use webgraph::graphs::vec_graph::VecGraph;
//! use webgraph::labels::proj::Left;
//!
//! let graph = Left(VecGraph::from_arc_list([(0, 1), (1, 2), (1, 3)]));
//! let result = RelaxedBfs::new(&graph)
//!     .with_queue_kind(QueueKind::Faa)
//!     .run(0, &Threads::NumThreads(2).build(), no_logging![])
//!     .unwrap();
//!
//! assert_eq!(result.parents, vec![0, 0, 1, 1]);
//! assert_eq!(result.depths, vec![0, 1, 2, 2]);
//! ```

mod batched;
pub mod parent_depth;
mod relaxed;
pub mod termination;

pub use parent_depth::{ParentDepth, ParentDepthVec, MAX_DEPTH};
pub use termination::TerminationDetection;

use dsi_progress_logger::ProgressLog;
use rayon::ThreadPool;
use std::collections::VecDeque;
use webgraph::traits::RandomAccessGraph;

use crate::queues::{
    dcbo::{DcboConfigError, DcboQueue, DEFAULT_NUM_SUBQUEUES, DEFAULT_N_SAMPLES},
    FaaArrayQueue, FlatFaaArrayQueue, MsQueue, NodeId, QueueKind, NIL,
};

/// The outcome of one BFS run.
#[derive(Debug, Clone)]
pub struct BfsResult {
    /// Parent of each vertex in the visit tree: `-1` for unreached
    /// vertices, the source itself for the source.
    pub parents: Vec<NodeId>,
    /// Distance of each vertex from the source, [`MAX_DEPTH`] if
    /// unreached.
    pub depths: Vec<u32>,
    /// Frontier items processed by the workers; revisits count again.
    pub nodes_visited: u64,
    /// Relaxations that shortened an already-reached vertex.
    pub nodes_revisited: u64,
}

/// A relaxed parallel BFS over a graph, configurable with any of the
/// [queue kinds](QueueKind), an optional sequential warm-up, and the
/// multiqueue parameters.
pub struct RelaxedBfs<G> {
    graph: G,
    queue_kind: QueueKind,
    seq_start: u32,
    num_subqueues: usize,
    n_samples: usize,
}

impl<G: RandomAccessGraph + Sync> RelaxedBfs<G> {
    /// Creates a visit over `graph` with a Michael–Scott frontier, no
    /// warm-up, and the default multiqueue parameters.
    pub fn new(graph: G) -> Self {
        Self {
            graph,
            queue_kind: QueueKind::Ms,
            seq_start: 0,
            num_subqueues: DEFAULT_NUM_SUBQUEUES,
            n_samples: DEFAULT_N_SAMPLES,
        }
    }

    /// Selects the frontier queue.
    pub fn with_queue_kind(mut self, queue_kind: QueueKind) -> Self {
        self.queue_kind = queue_kind;
        self
    }

    /// Expands up to `seq_start` vertices sequentially before the workers
    /// start; 0 disables the warm-up.
    pub fn with_seq_start(mut self, seq_start: u32) -> Self {
        self.seq_start = seq_start;
        self
    }

    /// Number of sub-queues of the d-CBO kinds.
    pub fn with_num_subqueues(mut self, num_subqueues: usize) -> Self {
        self.num_subqueues = num_subqueues;
        self
    }

    /// Number of sub-queues sampled per d-CBO operation.
    pub fn with_n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = n_samples;
        self
    }

    /// Runs the visit from `source` with one frontier item per vertex.
    ///
    /// The worker count is the size of `thread_pool`.
    ///
    /// # Panics
    ///
    /// If `source` is not a vertex of the graph.
    pub fn run(
        &self,
        source: usize,
        thread_pool: &ThreadPool,
        pl: &mut impl ProgressLog,
    ) -> Result<BfsResult, DcboConfigError> {
        self.check_source(source);
        let max_threads = thread_pool.current_num_threads();
        Ok(match self.queue_kind {
            QueueKind::Ms => relaxed::run(
                &self.graph,
                &MsQueue::with_max_threads(max_threads),
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
            QueueKind::Faa => relaxed::run(
                &self.graph,
                &FlatFaaArrayQueue::with_max_threads(max_threads),
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
            QueueKind::DcboMs => relaxed::run(
                &self.graph,
                &self.multiqueue(max_threads, || MsQueue::with_max_threads(max_threads))?,
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
            QueueKind::DcboFaa => relaxed::run(
                &self.graph,
                &self.multiqueue(max_threads, || FlatFaaArrayQueue::with_max_threads(max_threads))?,
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
        })
    }

    /// Runs the visit from `source` moving `B` vertices per frontier item,
    /// with the backup-dequeue reordering.
    ///
    /// # Panics
    ///
    /// If `source` is not a vertex of the graph, or if `B < 2` (use
    /// [`run`](Self::run) for the per-element mode).
    pub fn run_batched<const B: usize>(
        &self,
        source: usize,
        thread_pool: &ThreadPool,
        pl: &mut impl ProgressLog,
    ) -> Result<BfsResult, DcboConfigError> {
        self.check_source(source);
        let max_threads = thread_pool.current_num_threads();
        Ok(match self.queue_kind {
            QueueKind::Ms => batched::run::<_, _, B>(
                &self.graph,
                &MsQueue::with_max_threads(max_threads),
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
            QueueKind::Faa => batched::run::<_, _, B>(
                &self.graph,
                &FaaArrayQueue::with_max_threads(max_threads),
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
            QueueKind::DcboMs => batched::run::<_, _, B>(
                &self.graph,
                &self.multiqueue(max_threads, || MsQueue::with_max_threads(max_threads))?,
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
            QueueKind::DcboFaa => batched::run::<_, _, B>(
                &self.graph,
                &self.multiqueue(max_threads, || FaaArrayQueue::with_max_threads(max_threads))?,
                source,
                self.seq_start,
                thread_pool,
                pl,
            ),
        })
    }

    fn multiqueue<Q>(
        &self,
        max_threads: usize,
        queue: impl Fn() -> Q,
    ) -> Result<DcboQueue<Q>, DcboConfigError> {
        DcboQueue::with_queues(
            (0..self.num_subqueues).map(|_| queue()).collect(),
            self.n_samples,
            max_threads,
        )
    }

    fn check_source(&self, source: usize) {
        let num_nodes = self.graph.num_nodes();
        assert!(
            num_nodes <= i32::MAX as usize,
            "graphs are limited to i32::MAX vertices"
        );
        assert!(source < num_nodes, "source {source} out of range");
    }
}

/// Shared relaxation step: reads the depth of `node`, then depth-guards a
/// packed CAS on every out-neighbor, reporting each vertex whose depth it
/// shortened. A lost CAS re-reads the witnessed cell; the guard exits as
/// soon as some other thread has published an equal or better depth.
fn relax_node<G: RandomAccessGraph>(
    graph: &G,
    cells: &ParentDepthVec,
    node: NodeId,
    revisited: &mut u64,
    mut on_relaxed: impl FnMut(NodeId),
) {
    let new_depth = cells.get(node as usize).depth + 1;
    for succ in graph.successors(node as usize) {
        let mut neighbor = cells.get(succ);
        while new_depth < neighbor.depth {
            if neighbor.depth != MAX_DEPTH {
                *revisited += 1;
            }
            match cells.compare_exchange(
                succ,
                neighbor,
                ParentDepth {
                    parent: node,
                    depth: new_depth,
                },
            ) {
                Ok(()) => {
                    on_relaxed(succ as NodeId);
                    break;
                }
                Err(witnessed) => neighbor = witnessed,
            }
        }
    }
}

/// Sequential warm-up: a plain serial BFS from `source` bounded by
/// `max_pops` dequeues, writing cells directly; returns the frontier that
/// remains to be handed to the concurrent queue.
fn sequential_expand<G: RandomAccessGraph>(
    graph: &G,
    cells: &ParentDepthVec,
    source: usize,
    max_pops: u32,
) -> VecDeque<NodeId> {
    let mut frontier = VecDeque::new();
    frontier.push_back(source as NodeId);
    let mut pops = 0;
    while pops < max_pops {
        let Some(node) = frontier.pop_front() else {
            break;
        };
        pops += 1;
        let new_depth = cells.get(node as usize).depth + 1;
        for succ in graph.successors(node as usize) {
            if cells.get(succ).parent == NIL {
                cells.set(
                    succ,
                    ParentDepth {
                        parent: node,
                        depth: new_depth,
                    },
                );
                frontier.push_back(succ as NodeId);
            }
        }
    }
    frontier
}
