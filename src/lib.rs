//! Relaxed parallel breadth-first search built on a family of lock-free
//! FIFO queues (Michael–Scott, fetch-and-add array, d-choice multiqueue).

pub mod bfs;
pub mod queues;
pub mod utils;

pub mod prelude {
    pub use crate::bfs::{BfsResult, RelaxedBfs, MAX_DEPTH};
    pub use crate::queues::{ConcurrentQueue, NodeId, QueueKind, NIL};
    pub use crate::utils::Threads;
}
