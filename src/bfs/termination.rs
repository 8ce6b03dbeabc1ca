//! Barrier-free quiescence detection for the worker pool.
//!
//! Two bounded counters track how many workers currently find the frontier
//! empty (`no_work`) and how many of those have gone idle (`idle`). A
//! worker whose dequeue fails keeps retrying; only when *every* worker
//! reports no work does it go idle, and only when every worker is idle is
//! termination declared. Any successful dequeue on the way rolls the
//! counters back, so an enqueue racing with the shutdown wave is always
//! picked up by some retrying worker.

use crossbeam_utils::CachePadded;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared termination state for a pool of `num_threads` workers.
pub struct TerminationDetection {
    no_work: CachePadded<AtomicUsize>,
    idle: CachePadded<AtomicUsize>,
    num_threads: usize,
}

impl TerminationDetection {
    pub fn new(num_threads: usize) -> Self {
        Self {
            no_work: CachePadded::new(AtomicUsize::new(0)),
            idle: CachePadded::new(AtomicUsize::new(0)),
            num_threads,
        }
    }

    /// Runs `attempt` (one dequeue-and-process step, returning whether it
    /// found work) until it succeeds or the pool has globally quiesced.
    /// Returns `false` only in the latter case, after which the calling
    /// worker must exit.
    pub fn repeat(&self, mut attempt: impl FnMut() -> bool) -> bool {
        if attempt() {
            return true;
        }
        self.no_work.fetch_add(1, Ordering::AcqRel);
        loop {
            if attempt() {
                self.no_work.fetch_sub(1, Ordering::AcqRel);
                return true;
            }
            if self.no_work.load(Ordering::Acquire) >= self.num_threads && self.should_terminate()
            {
                return false;
            }
            hint::spin_loop();
        }
    }

    /// Called once every worker reports no work: go idle and wait for the
    /// outcome. Returns `true` when the whole pool is idle; returns
    /// `false` (resuming the retry loop) if some worker found work in the
    /// meantime.
    fn should_terminate(&self) -> bool {
        self.idle.fetch_add(1, Ordering::AcqRel);
        while self.no_work.load(Ordering::Acquire) >= self.num_threads {
            if self.idle.load(Ordering::Acquire) >= self.num_threads {
                return true;
            }
            hint::spin_loop();
        }
        self.idle.fetch_sub(1, Ordering::AcqRel);
        false
    }
}
