//! Packed per-vertex `(parent, depth)` cells.
//!
//! Both fields must move together: the invariant
//! `depth[parent[v]] + 1 = depth[v]` would need a second CAS or a lock if
//! they lived in separate arrays. Packing them into one 64-bit word makes
//! the relaxation step a single compare-and-swap, and depth stays
//! monotonically non-increasing over the whole run.

use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::queues::{NodeId, NIL};

/// Depth of a vertex that has not been reached yet.
pub const MAX_DEPTH: u32 = u32::MAX;

/// The visit state of one vertex: its parent in the visit tree and its
/// distance from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentDepth {
    pub parent: NodeId,
    pub depth: u32,
}

impl ParentDepth {
    /// The initial state of every vertex.
    pub const UNVISITED: ParentDepth = ParentDepth {
        parent: NIL,
        depth: MAX_DEPTH,
    };

    /// Parent in the low half, depth in the high half.
    fn pack(self) -> u64 {
        (self.depth as u64) << 32 | self.parent as u32 as u64
    }

    fn unpack(bits: u64) -> Self {
        ParentDepth {
            parent: bits as u32 as NodeId,
            depth: (bits >> 32) as u32,
        }
    }
}

/// One atomic packed cell per vertex. Cells are only ever read and written
/// as whole 64-bit words, so no torn `(parent, depth)` pair can be
/// observed.
pub struct ParentDepthVec {
    cells: Box<[AtomicU64]>,
}

impl ParentDepthVec {
    /// Creates a vector of `num_nodes` cells, all
    /// [`UNVISITED`](ParentDepth::UNVISITED).
    pub fn new(num_nodes: usize) -> Self {
        Self {
            cells: (0..num_nodes)
                .map(|_| AtomicU64::new(ParentDepth::UNVISITED.pack()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, node: usize) -> ParentDepth {
        ParentDepth::unpack(self.cells[node].load(Ordering::Acquire))
    }

    /// Unconditional store; used to seed the source and by the sequential
    /// warm-up, before any worker runs.
    pub fn set(&self, node: usize, value: ParentDepth) {
        self.cells[node].store(value.pack(), Ordering::Relaxed);
    }

    /// Publishes `new` if the cell still holds `current`; on failure the
    /// witnessed value is returned so the caller can re-evaluate its depth
    /// guard.
    pub fn compare_exchange(
        &self,
        node: usize,
        current: ParentDepth,
        new: ParentDepth,
    ) -> Result<(), ParentDepth> {
        self.cells[node]
            .compare_exchange(
                current.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(ParentDepth::unpack)
    }

    /// Extracts the parent vector (`-1` for unreached vertices).
    pub fn parents(&self) -> Vec<NodeId> {
        self.cells
            .par_iter()
            .map(|cell| ParentDepth::unpack(cell.load(Ordering::Relaxed)).parent)
            .collect()
    }

    /// Extracts the depth vector ([`MAX_DEPTH`] for unreached vertices).
    pub fn depths(&self) -> Vec<u32> {
        self.cells
            .par_iter()
            .map(|cell| ParentDepth::unpack(cell.load(Ordering::Relaxed)).depth)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pack_round_trip() {
        for pair in [
            ParentDepth::UNVISITED,
            ParentDepth {
                parent: 0,
                depth: 0,
            },
            ParentDepth {
                parent: i32::MAX,
                depth: 12345,
            },
            ParentDepth {
                parent: -1,
                depth: 0,
            },
        ] {
            assert_eq!(ParentDepth::unpack(pair.pack()), pair);
        }
    }

    #[test]
    fn test_compare_exchange_witnesses_current() {
        let cells = ParentDepthVec::new(4);
        let first = ParentDepth {
            parent: 2,
            depth: 3,
        };
        assert_eq!(cells.compare_exchange(1, ParentDepth::UNVISITED, first), Ok(()));

        let second = ParentDepth {
            parent: 0,
            depth: 1,
        };
        // A stale expected value fails and reports what is really there.
        assert_eq!(
            cells.compare_exchange(1, ParentDepth::UNVISITED, second),
            Err(first)
        );
        assert_eq!(cells.compare_exchange(1, first, second), Ok(()));
        assert_eq!(cells.get(1), second);
    }
}
