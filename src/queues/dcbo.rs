//! d-choice best-out-of relaxed multiqueue.
//!
//! An ensemble of `S` independent FIFO sub-queues. Every operation samples
//! `d` sub-queues with a per-thread PRNG and uses the one with the minimum
//! operation count, which keeps the ensemble balanced without any shared
//! coordination. Ordering across sub-queues is deliberately given up;
//! what remains is eventual exactly-once delivery and a *linearizable*
//! emptiness check: a failed dequeue escalates to a double-collect that
//! snapshots every sub-queue's enqueue version, sweeps all sub-queues, and
//! reports empty only if no version moved during the sweep.

use crossbeam_utils::CachePadded;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::cell::{RefCell, UnsafeCell};
use thiserror::Error;

use super::hazard::DEFAULT_MAX_THREADS;
use super::ConcurrentQueue;

/// Default number of sub-queues.
pub const DEFAULT_NUM_SUBQUEUES: usize = 64;

/// Default number of sub-queues sampled per operation.
pub const DEFAULT_N_SAMPLES: usize = 2;

/// Default length of a sticky streak (consecutive operations pinned to the
/// last sub-queue before resampling).
pub const DEFAULT_STICKY_STREAK: u32 = 8;

thread_local! {
    /// Sampling PRNG; throughput matters more than quality here, and the
    /// double-collect catches whatever imbalance sampling leaves behind.
    static SAMPLER: RefCell<Xoshiro256Plus> = RefCell::new(Xoshiro256Plus::from_entropy());
}

/// The multiqueue parameters were inconsistent.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcboConfigError {
    #[error("the number of sub-queues must be positive")]
    NoSubQueues,
    #[error("cannot sample {n_samples} out of {num_subqueues} sub-queues")]
    TooManySamples {
        n_samples: usize,
        num_subqueues: usize,
    },
}

/// Per-thread stickiness: which sub-queue the last operation used and how
/// many more operations may reuse it before resampling.
#[derive(Default)]
struct StickyState {
    enq_queue: usize,
    enq_left: u32,
    deq_queue: usize,
    deq_left: u32,
}

/// Relaxed FIFO over `S` sub-queues of kind `Q`.
///
/// # Examples
///
/// ```
/// use relaxed_bfs::queues::{ConcurrentQueue, DcboQueue, FlatFaaArrayQueue};
///
/// let queue = DcboQueue::<FlatFaaArrayQueue>::new(8, 2)?;
/// for i in 0..100 {
///     queue.enqueue(i, 0);
/// }
/// let mut out: Vec<_> = std::iter::from_fn(|| queue.dequeue(0)).collect();
/// out.sort_unstable();
/// assert_eq!(out, (0..100).collect::<Vec<_>>());
/// # Ok::<(), relaxed_bfs::queues::dcbo::DcboConfigError>(())
/// ```
pub struct DcboQueue<Q> {
    sub_queues: Box<[Q]>,
    n_samples: usize,
    sticky_streak: u32,
    sticky: Box<[CachePadded<UnsafeCell<StickyState>>]>,
}

unsafe impl<Q: Send> Send for DcboQueue<Q> {}
unsafe impl<Q: Sync> Sync for DcboQueue<Q> {}

impl<Q: Default> DcboQueue<Q> {
    /// Creates a multiqueue of `num_subqueues` default-constructed
    /// sub-queues, sampling `n_samples` of them per operation. Thread ids
    /// up to [`DEFAULT_MAX_THREADS`] are accepted, matching the bound of
    /// the default-constructed sub-queues.
    pub fn new(num_subqueues: usize, n_samples: usize) -> Result<Self, DcboConfigError> {
        Self::with_queues(
            (0..num_subqueues).map(|_| Q::default()).collect(),
            n_samples,
            DEFAULT_MAX_THREADS,
        )
    }
}

impl<Q> DcboQueue<Q> {
    /// Creates a multiqueue over the given sub-queues, accepting thread
    /// ids in `0..max_threads`. `max_threads` sizes the per-thread sticky
    /// state and should not exceed the bound the sub-queues were built
    /// with.
    pub fn with_queues(
        sub_queues: Vec<Q>,
        n_samples: usize,
        max_threads: usize,
    ) -> Result<Self, DcboConfigError> {
        if sub_queues.is_empty() {
            return Err(DcboConfigError::NoSubQueues);
        }
        if n_samples == 0 || n_samples > sub_queues.len() {
            return Err(DcboConfigError::TooManySamples {
                n_samples,
                num_subqueues: sub_queues.len(),
            });
        }
        Ok(Self {
            sub_queues: sub_queues.into_boxed_slice(),
            n_samples,
            sticky_streak: DEFAULT_STICKY_STREAK,
            sticky: (0..max_threads)
                .map(|_| CachePadded::new(UnsafeCell::new(StickyState::default())))
                .collect(),
        })
    }

    /// Sets the sticky streak length used by the `sticky_*` operations.
    pub fn with_sticky_streak(mut self, sticky_streak: u32) -> Self {
        self.sticky_streak = sticky_streak;
        self
    }

    /// Number of sub-queues.
    pub fn num_subqueues(&self) -> usize {
        self.sub_queues.len()
    }

    fn sample(&self) -> usize {
        SAMPLER.with(|rng| rng.borrow_mut().gen_range(0..self.sub_queues.len()))
    }

    /// Samples `n_samples` sub-queues and returns the index minimizing
    /// `count`.
    fn best_of_samples(&self, count: impl Fn(&Q) -> u64) -> usize {
        let mut best = self.sample();
        let mut best_count = count(&self.sub_queues[best]);
        for _ in 1..self.n_samples {
            let index = self.sample();
            let sampled = count(&self.sub_queues[index]);
            if sampled < best_count {
                best = index;
                best_count = sampled;
            }
        }
        best
    }

    /// Sticky state of `tid`; exclusive by the thread-id contract.
    #[allow(clippy::mut_from_ref)]
    fn sticky_state(&self, tid: usize) -> &mut StickyState {
        unsafe { &mut *self.sticky[tid].get() }
    }
}

impl<Q> DcboQueue<Q> {
    /// Linearizable emptiness check: snapshot every sub-queue's enqueue
    /// version while sweeping pops over all of them; if a pop succeeds,
    /// done; if a full sweep fails and no version moved, the ensemble was
    /// empty at some instant during the sweep.
    fn double_collect<T>(&self, tid: usize, versions: &mut [u64]) -> Option<T>
    where
        Q: ConcurrentQueue<T>,
    {
        loop {
            for (index, sub_queue) in self.sub_queues.iter().enumerate() {
                versions[index] = sub_queue.enqueue_version(tid);
                if let Some(value) = sub_queue.dequeue(tid) {
                    return Some(value);
                }
            }
            if self
                .sub_queues
                .iter()
                .zip(versions.iter())
                .all(|(sub_queue, &version)| sub_queue.enqueue_version(tid) == version)
            {
                return None;
            }
        }
    }

    /// Enqueue pinned to the thread's current streak sub-queue, resampling
    /// every [`sticky_streak`](Self::with_sticky_streak) operations.
    ///
    /// # Panics
    ///
    /// If `tid` is at least the `max_threads` the queue was built with.
    pub fn sticky_enqueue<T>(&self, value: T, tid: usize)
    where
        Q: ConcurrentQueue<T>,
    {
        let state = self.sticky_state(tid);
        if state.enq_left == 0 {
            state.enq_queue = self.best_of_samples(|sub_queue| sub_queue.enqueue_count(tid));
            // A zero streak still uses the freshly sampled sub-queue once.
            state.enq_left = self.sticky_streak.max(1);
        }
        state.enq_left -= 1;
        self.sub_queues[state.enq_queue].enqueue(value, tid);
    }

    /// Dequeue pinned like [`sticky_enqueue`](Self::sticky_enqueue); an
    /// empty streak sub-queue ends the streak and falls back to the
    /// sampled path, then to the double-collect.
    ///
    /// # Panics
    ///
    /// If `tid` is at least the `max_threads` the queue was built with.
    pub fn sticky_dequeue<T>(&self, tid: usize) -> Option<T>
    where
        Q: ConcurrentQueue<T>,
    {
        let state = self.sticky_state(tid);
        if state.deq_left > 0 {
            state.deq_left -= 1;
            if let Some(value) = self.sub_queues[state.deq_queue].dequeue(tid) {
                return Some(value);
            }
            state.deq_left = 0;
        }
        let index = self.best_of_samples(|sub_queue| sub_queue.dequeue_count(tid));
        if let Some(value) = self.sub_queues[index].dequeue(tid) {
            state.deq_queue = index;
            // The sampled success counts against the fresh streak, as on
            // the enqueue side.
            state.deq_left = self.sticky_streak.max(1);
            state.deq_left -= 1;
            return Some(value);
        }
        let mut versions = vec![0; self.sub_queues.len()];
        self.double_collect(tid, &mut versions)
    }

    /// Sticky counterpart of [`single_dequeue`](ConcurrentQueue::single_dequeue):
    /// no double-collect escalation.
    ///
    /// # Panics
    ///
    /// If `tid` is at least the `max_threads` the queue was built with.
    pub fn sticky_single_dequeue<T>(&self, tid: usize) -> Option<T>
    where
        Q: ConcurrentQueue<T>,
    {
        let state = self.sticky_state(tid);
        if state.deq_left > 0 {
            state.deq_left -= 1;
            if let Some(value) = self.sub_queues[state.deq_queue].dequeue(tid) {
                return Some(value);
            }
            state.deq_left = 0;
        }
        let index = self.best_of_samples(|sub_queue| sub_queue.dequeue_count(tid));
        if let Some(value) = self.sub_queues[index].dequeue(tid) {
            state.deq_queue = index;
            state.deq_left = self.sticky_streak.max(1);
            state.deq_left -= 1;
            return Some(value);
        }
        None
    }
}

impl<T: Send, Q: ConcurrentQueue<T> + Sync> ConcurrentQueue<T> for DcboQueue<Q> {
    fn enqueue(&self, value: T, tid: usize) {
        let index = self.best_of_samples(|sub_queue| sub_queue.enqueue_count(tid));
        self.sub_queues[index].enqueue(value, tid);
    }

    fn dequeue(&self, tid: usize) -> Option<T> {
        let index = self.best_of_samples(|sub_queue| sub_queue.dequeue_count(tid));
        if let Some(value) = self.sub_queues[index].dequeue(tid) {
            return Some(value);
        }
        let mut versions = vec![0; self.sub_queues.len()];
        self.double_collect(tid, &mut versions)
    }

    fn single_dequeue(&self, tid: usize) -> Option<T> {
        let index = self.best_of_samples(|sub_queue| sub_queue.dequeue_count(tid));
        self.sub_queues[index].dequeue(tid)
    }

    fn enqueue_count(&self, tid: usize) -> u64 {
        self.sub_queues
            .iter()
            .map(|sub_queue| sub_queue.enqueue_count(tid))
            .sum()
    }

    fn dequeue_count(&self, tid: usize) -> u64 {
        self.sub_queues
            .iter()
            .map(|sub_queue| sub_queue.dequeue_count(tid))
            .sum()
    }

    fn enqueue_version(&self, tid: usize) -> u64 {
        self.sub_queues
            .iter()
            .map(|sub_queue| sub_queue.enqueue_version(tid))
            .sum()
    }
}
