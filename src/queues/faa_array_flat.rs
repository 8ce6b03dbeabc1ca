//! Fetch-and-add array queue with inline [`NodeId`] slots.
//!
//! A linked list of fixed-size slot arrays: both operations reserve a slot
//! with one fetch-and-add and finalize it with one CAS, so the uncontended
//! cost is 1 FAA + 1 CAS + 1 hazard-pointer publication. When a segment
//! overflows, a fresh segment pre-filled with the pending element is linked
//! in Michael–Scott fashion, which is what makes the queue lock-free.
//!
//! Each slot holds `-1` (never filled), a valid id `≥ 0`, or [`TAKEN`]
//! once dequeued; the `-1 → v` and `v → TAKEN` transitions guarantee every
//! element is consumed exactly once. Segments drained past by `head` are
//! retired through the hazard-pointer registry.

use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, Ordering};

use super::hazard::{HazardPointers, DEFAULT_MAX_THREADS};
use super::{ConcurrentQueue, NodeId, NIL};

/// Slots per segment.
pub const BUFFER_SIZE: usize = 1024;

/// Slot marker for an element that has already been dequeued.
const TAKEN: NodeId = -2;

const HP_SLOT: usize = 0;

/// One array node of the queue. The dequeue index is separated from the
/// enqueue index and the link by the slot array itself, keeping the two
/// contended counters on distant cache lines.
struct Segment {
    deq_idx: AtomicU32,
    items: [AtomicI32; BUFFER_SIZE],
    enq_idx: AtomicU32,
    next: AtomicPtr<Segment>,
    /// Position of this segment in the chain, starting from 0; used to
    /// derive the monotone operation counters.
    node_idx: u32,
}

impl Segment {
    /// An all-empty segment; only ever used as the initial sentinel.
    fn empty(node_idx: u32) -> *mut Self {
        let segment = Self::with_first(NIL, node_idx);
        unsafe { &*segment }.enq_idx.store(0, Ordering::Relaxed);
        segment
    }

    /// A segment with `first` pre-filled at slot 0 and the enqueue index
    /// already past it.
    fn with_first(first: NodeId, node_idx: u32) -> *mut Self {
        let segment = Box::new(Segment {
            deq_idx: AtomicU32::new(0),
            items: std::array::from_fn(|_| AtomicI32::new(NIL)),
            enq_idx: AtomicU32::new(1),
            next: AtomicPtr::new(ptr::null_mut()),
            node_idx,
        });
        segment.items[0].store(first, Ordering::Relaxed);
        Box::into_raw(segment)
    }
}

/// Unbounded lock-free FIFO of [`NodeId`]s with O(1) amortized operations.
pub struct FlatFaaArrayQueue {
    head: CachePadded<AtomicPtr<Segment>>,
    tail: CachePadded<AtomicPtr<Segment>>,
    hazard: HazardPointers<Segment>,
}

impl FlatFaaArrayQueue {
    /// Creates an empty queue sized for [`DEFAULT_MAX_THREADS`] thread ids.
    pub fn new() -> Self {
        Self::with_max_threads(DEFAULT_MAX_THREADS)
    }

    /// Creates an empty queue accepting thread ids in `0..max_threads`.
    pub fn with_max_threads(max_threads: usize) -> Self {
        let sentinel = Segment::empty(0);
        Self {
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            hazard: HazardPointers::new(max_threads),
        }
    }

    /// Appends `item` at the tail. Lock-free.
    ///
    /// # Panics
    ///
    /// If `item` is negative: the negative range is reserved for the empty
    /// and taken slot markers.
    pub fn enqueue(&self, item: NodeId, tid: usize) {
        assert!(item >= 0, "negative ids are reserved slot markers");
        loop {
            let tail = self.hazard.protect(HP_SLOT, &self.tail, tid);
            let segment = unsafe { &*tail };
            let idx = segment.enq_idx.fetch_add(1, Ordering::SeqCst) as usize;
            if idx >= BUFFER_SIZE {
                // Segment full. Either link a fresh one pre-filled with
                // `item` or help whoever beat us to it.
                if tail != self.tail.load(Ordering::SeqCst) {
                    continue;
                }
                let next = segment.next.load(Ordering::Acquire);
                if next.is_null() {
                    let fresh = Segment::with_first(item, segment.node_idx + 1);
                    if segment
                        .next
                        .compare_exchange(
                            ptr::null_mut(),
                            fresh,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        let _ = self.tail.compare_exchange(
                            tail,
                            fresh,
                            Ordering::Release,
                            Ordering::Relaxed,
                        );
                        self.hazard.clear_one(HP_SLOT, tid);
                        return;
                    }
                    drop(unsafe { Box::from_raw(fresh) });
                } else {
                    let _ = self.tail.compare_exchange(
                        tail,
                        next,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                }
                continue;
            }
            if segment.items[idx]
                .compare_exchange(NIL, item, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.hazard.clear_one(HP_SLOT, tid);
                return;
            }
            // The slot was poisoned by a dequeuer that overtook the
            // reservation; take a new one.
        }
    }

    /// Removes the oldest element, or returns `None` if the queue was
    /// observed empty at the linearization point. Lock-free.
    pub fn dequeue(&self, tid: usize) -> Option<NodeId> {
        loop {
            let head = self.hazard.protect(HP_SLOT, &self.head, tid);
            let segment = unsafe { &*head };
            if segment.deq_idx.load(Ordering::Acquire) >= segment.enq_idx.load(Ordering::Acquire)
                && segment.next.load(Ordering::Acquire).is_null()
            {
                break;
            }
            let idx = segment.deq_idx.fetch_add(1, Ordering::SeqCst) as usize;
            if idx >= BUFFER_SIZE {
                // Segment drained; move on to the next one, if any.
                let next = segment.next.load(Ordering::Acquire);
                if next.is_null() {
                    break;
                }
                if self
                    .head
                    .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe { self.hazard.retire(head, tid) };
                }
                continue;
            }
            let item = segment.items[idx].swap(TAKEN, Ordering::AcqRel);
            if item == NIL {
                // Poisoned an empty slot whose enqueuer was still on the
                // way; its element will surface in a later slot.
                continue;
            }
            self.hazard.clear_one(HP_SLOT, tid);
            return Some(item);
        }
        self.hazard.clear_one(HP_SLOT, tid);
        None
    }

    fn segment_count(
        &self,
        location: &AtomicPtr<Segment>,
        index: impl Fn(&Segment) -> u32,
        tid: usize,
    ) -> u64 {
        let segment = self.hazard.protect(HP_SLOT, location, tid);
        let segment = unsafe { &*segment };
        let idx = (index(segment) as usize).min(BUFFER_SIZE) as u64;
        let count = idx + BUFFER_SIZE as u64 * segment.node_idx as u64;
        self.hazard.clear_one(HP_SLOT, tid);
        count
    }
}

impl Default for FlatFaaArrayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FlatFaaArrayQueue {
    fn drop(&mut self) {
        // Slots hold plain ids, so the chain can be freed directly;
        // segments retired earlier belong to the registry.
        let mut segment = *self.head.get_mut();
        while !segment.is_null() {
            let mut boxed = unsafe { Box::from_raw(segment) };
            segment = *boxed.next.get_mut();
        }
    }
}

impl ConcurrentQueue<NodeId> for FlatFaaArrayQueue {
    fn enqueue(&self, item: NodeId, tid: usize) {
        FlatFaaArrayQueue::enqueue(self, item, tid);
    }

    fn dequeue(&self, tid: usize) -> Option<NodeId> {
        FlatFaaArrayQueue::dequeue(self, tid)
    }

    /// Successful enqueues so far, derived from the tail segment as
    /// `min(enq_idx, BUFFER_SIZE) + BUFFER_SIZE × node_idx`.
    fn enqueue_count(&self, tid: usize) -> u64 {
        self.segment_count(&self.tail, |segment| segment.enq_idx.load(Ordering::Acquire), tid)
    }

    fn dequeue_count(&self, tid: usize) -> u64 {
        self.segment_count(&self.head, |segment| segment.deq_idx.load(Ordering::Acquire), tid)
    }

    fn enqueue_version(&self, tid: usize) -> u64 {
        self.enqueue_count(tid)
    }
}
