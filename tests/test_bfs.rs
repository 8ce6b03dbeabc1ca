use std::collections::VecDeque;

use anyhow::Result;
use dsi_progress_logger::no_logging;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use relaxed_bfs::prelude::*;
use sux::bits::BitVec;
use webgraph::graphs::vec_graph::VecGraph;
use webgraph::labels::proj::Left;
use webgraph::traits::RandomAccessGraph;

const ALL_KINDS: [QueueKind; 4] = [
    QueueKind::Ms,
    QueueKind::Faa,
    QueueKind::DcboMs,
    QueueKind::DcboFaa,
];

fn reference_depths<G: RandomAccessGraph>(graph: &G, source: usize) -> Vec<u32> {
    let mut depths = vec![MAX_DEPTH; graph.num_nodes()];
    let mut visited = BitVec::new(graph.num_nodes());
    let mut queue = VecDeque::new();

    visited.set(source, true);
    depths[source] = 0;
    queue.push_back(source);
    while let Some(node) = queue.pop_front() {
        for succ in graph.successors(node) {
            if !visited[succ] {
                visited.set(succ, true);
                depths[succ] = depths[node] + 1;
                queue.push_back(succ);
            }
        }
    }
    depths
}

/// Depths must match the serial reference; parents must be in-neighbors one
/// level up (parent identities may legitimately differ between runs).
fn check_against_reference<G: RandomAccessGraph>(graph: &G, source: usize, result: &BfsResult) {
    let reference = reference_depths(graph, source);
    assert_eq!(result.depths, reference);
    assert_eq!(result.parents[source], source as NodeId);
    assert_eq!(result.depths[source], 0);
    for node in 0..graph.num_nodes() {
        if node == source {
            continue;
        }
        let parent = result.parents[node];
        if reference[node] == MAX_DEPTH {
            assert_eq!(parent, NIL, "unreachable node {node} has a parent");
        } else {
            assert!(parent >= 0, "reachable node {node} has no parent");
            assert_eq!(result.depths[node], result.depths[parent as usize] + 1);
            assert!(
                graph
                    .successors(parent as usize)
                    .into_iter()
                    .any(|succ| succ == node),
                "({parent}, {node}) is not an arc"
            );
        }
    }
}

#[test]
fn test_path_graph() -> Result<()> {
    let graph = Left(VecGraph::from_arc_list([(0, 1), (1, 2), (2, 3)]));
    let thread_pool = Threads::NumThreads(8).build();
    for kind in ALL_KINDS {
        let result = RelaxedBfs::new(&graph)
            .with_queue_kind(kind)
            .run_batched::<4>(0, &thread_pool, no_logging![])?;
        assert_eq!(result.parents, vec![0, 0, 1, 2], "{kind}");
        assert_eq!(result.depths, vec![0, 1, 2, 3], "{kind}");
        assert_eq!(result.nodes_revisited, 0, "{kind}");
    }
    Ok(())
}

#[test]
fn test_binary_tree() -> Result<()> {
    // A complete directed binary tree with levels 0..=10: every vertex has
    // a unique parent, so even relaxed runs must reproduce it exactly.
    let levels = 10u32;
    let num_nodes = (1usize << (levels + 1)) - 1;
    let mut arcs = Vec::new();
    for node in 0..(1usize << levels) - 1 {
        arcs.push((node, 2 * node + 1));
        arcs.push((node, 2 * node + 2));
    }
    let graph = Left(VecGraph::from_arc_list(arcs));
    let thread_pool = Threads::NumThreads(8).build();

    for kind in ALL_KINDS {
        let result = RelaxedBfs::new(&graph)
            .with_queue_kind(kind)
            .run(0, &thread_pool, no_logging![])?;
        assert_eq!(result.nodes_visited, num_nodes as u64, "{kind}");
        assert_eq!(result.nodes_revisited, 0, "{kind}");
        for node in 1..num_nodes {
            assert_eq!(result.parents[node], ((node - 1) / 2) as NodeId, "{kind}");
            assert_eq!(
                result.depths[node],
                (usize::BITS - (node + 1).leading_zeros()) - 1,
                "{kind}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_par_chains() -> Result<()> {
    // Sixteen disjoint chains of length 1000 hanging off the source.
    let chains = 16usize;
    let length = 1000usize;
    let mut arcs = Vec::new();
    for chain in 0..chains {
        let first = 1 + chain * length;
        arcs.push((0, first));
        for step in 0..length - 1 {
            arcs.push((first + step, first + step + 1));
        }
    }
    let graph = Left(VecGraph::from_arc_list(arcs));
    let thread_pool = Threads::NumThreads(8).build();

    let result = RelaxedBfs::new(&graph)
        .with_queue_kind(QueueKind::DcboFaa)
        .run(0, &thread_pool, no_logging![])?;

    let reached = result.parents.iter().filter(|&&parent| parent != NIL).count();
    assert_eq!(reached, chains * length + 1);
    for chain in 0..chains {
        for step in 0..length {
            assert_eq!(result.depths[1 + chain * length + step], step as u32 + 1);
        }
    }
    check_against_reference(&graph, 0, &result);
    Ok(())
}

fn random_arcs(num_nodes: usize, num_arcs: usize, seed: u64) -> Vec<(usize, usize)> {
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let mut arcs = Vec::with_capacity(num_arcs + 1);
    // Pin the number of nodes whatever the random arcs hit.
    arcs.push((num_nodes - 1, 0));
    for _ in 0..num_arcs {
        arcs.push((rng.gen_range(0..num_nodes), rng.gen_range(0..num_nodes)));
    }
    arcs
}

#[test]
fn test_depths_deterministic_across_threads_and_kinds() -> Result<()> {
    // Relaxation is deterministic in depths: whatever the interleaving,
    // the queue kind, or the worker count, the depth vector is the one of
    // the serial reference.
    let graph = Left(VecGraph::from_arc_list(random_arcs(2_000, 10_000, 0x5eed)));
    let reference = reference_depths(&graph, 0);

    for kind in ALL_KINDS {
        for threads in [1, 2, 4, 8] {
            let thread_pool = Threads::NumThreads(threads).build();
            let result = RelaxedBfs::new(&graph)
                .with_queue_kind(kind)
                .run(0, &thread_pool, no_logging![])?;
            assert_eq!(result.depths, reference, "{kind} with {threads} threads");
            check_against_reference(&graph, 0, &result);

            let result = RelaxedBfs::new(&graph)
                .with_queue_kind(kind)
                .run_batched::<8>(0, &thread_pool, no_logging![])?;
            assert_eq!(
                result.depths, reference,
                "batched {kind} with {threads} threads"
            );
            check_against_reference(&graph, 0, &result);
        }
    }
    Ok(())
}

#[test]
fn test_sequential_warm_up() -> Result<()> {
    let graph = Left(VecGraph::from_arc_list(random_arcs(2_000, 10_000, 0xcafe)));
    let thread_pool = Threads::NumThreads(4).build();
    let reference = reference_depths(&graph, 0);

    for seq_start in [1, 100, 100_000] {
        let result = RelaxedBfs::new(&graph)
            .with_queue_kind(QueueKind::Faa)
            .with_seq_start(seq_start)
            .run(0, &thread_pool, no_logging![])?;
        assert_eq!(result.depths, reference, "seq_start = {seq_start}");
        check_against_reference(&graph, 0, &result);

        let result = RelaxedBfs::new(&graph)
            .with_queue_kind(QueueKind::DcboMs)
            .with_seq_start(seq_start)
            .run_batched::<8>(0, &thread_pool, no_logging![])?;
        assert_eq!(result.depths, reference, "batched seq_start = {seq_start}");
    }
    Ok(())
}

#[test]
fn test_unreachable_vertices() -> Result<()> {
    let graph = Left(VecGraph::from_arc_list([(0, 1), (2, 3), (3, 2)]));
    let thread_pool = Threads::NumThreads(2).build();
    let result = RelaxedBfs::new(&graph)
        .with_queue_kind(QueueKind::Ms)
        .run(0, &thread_pool, no_logging![])?;
    assert_eq!(result.parents, vec![0, 0, NIL, NIL]);
    assert_eq!(result.depths[2], MAX_DEPTH);
    assert_eq!(result.depths[3], MAX_DEPTH);
    Ok(())
}

#[test]
fn test_multiqueue_parameters() -> Result<()> {
    let graph = Left(VecGraph::from_arc_list([(0, 1), (1, 2)]));
    let thread_pool = Threads::NumThreads(2).build();

    let result = RelaxedBfs::new(&graph)
        .with_queue_kind(QueueKind::DcboFaa)
        .with_num_subqueues(4)
        .with_n_samples(4)
        .run(0, &thread_pool, no_logging![])?;
    assert_eq!(result.depths, vec![0, 1, 2]);

    // Sampling more sub-queues than exist is a configuration error.
    assert!(RelaxedBfs::new(&graph)
        .with_queue_kind(QueueKind::DcboMs)
        .with_num_subqueues(2)
        .with_n_samples(3)
        .run(0, &thread_pool, no_logging![])
        .is_err());
    Ok(())
}
