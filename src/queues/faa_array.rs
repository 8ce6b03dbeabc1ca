//! Fetch-and-add array queue over boxed elements.
//!
//! Same algorithm as [`faa_array_flat`](super::faa_array_flat), but the
//! slots hold pointers to heap-allocated elements instead of inline ids:
//! the empty marker is the null pointer and the taken marker a tagged
//! non-null address. This is the variant that carries `-1`-terminated
//! batch arrays, which do not fit in a single atomic word.

use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use super::hazard::{HazardPointers, DEFAULT_MAX_THREADS};
use super::ConcurrentQueue;

/// Slots per segment.
pub const BUFFER_SIZE: usize = 1024;

const HP_SLOT: usize = 0;

/// Slot marker for an element that has already been dequeued. Never
/// dereferenced.
fn taken<T>() -> *mut T {
    1 as *mut T
}

struct Segment<T> {
    deq_idx: AtomicU32,
    items: [AtomicPtr<T>; BUFFER_SIZE],
    enq_idx: AtomicU32,
    next: AtomicPtr<Segment<T>>,
    node_idx: u32,
}

impl<T> Segment<T> {
    fn empty(node_idx: u32) -> *mut Self {
        let segment = Self::with_first(ptr::null_mut(), node_idx);
        unsafe { &*segment }.enq_idx.store(0, Ordering::Relaxed);
        segment
    }

    fn with_first(first: *mut T, node_idx: u32) -> *mut Self {
        let segment = Box::new(Segment {
            deq_idx: AtomicU32::new(0),
            items: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            enq_idx: AtomicU32::new(1),
            next: AtomicPtr::new(ptr::null_mut()),
            node_idx,
        });
        segment.items[0].store(first, Ordering::Relaxed);
        Box::into_raw(segment)
    }
}

/// Unbounded lock-free FIFO for arbitrary `Send` elements.
pub struct FaaArrayQueue<T> {
    head: CachePadded<AtomicPtr<Segment<T>>>,
    tail: CachePadded<AtomicPtr<Segment<T>>>,
    hazard: HazardPointers<Segment<T>>,
}

unsafe impl<T: Send> Send for FaaArrayQueue<T> {}
unsafe impl<T: Send> Sync for FaaArrayQueue<T> {}

impl<T: Send> FaaArrayQueue<T> {
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

    /// Appends `value` at the tail. Lock-free. The element is boxed once,
    /// whatever the number of retries.
    pub fn enqueue(&self, value: T, tid: usize) {
        let item = Box::into_raw(Box::new(value));
        loop {
            let tail = self.hazard.protect(HP_SLOT, &self.tail, tid);
            let segment = unsafe { &*tail };
            let idx = segment.enq_idx.fetch_add(1, Ordering::SeqCst) as usize;
            if idx >= BUFFER_SIZE {
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
                    // The segment lost the race; the element it carried is
                    // still ours and rides into the next attempt.
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
                .compare_exchange(ptr::null_mut(), item, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.hazard.clear_one(HP_SLOT, tid);
                return;
            }
        }
    }

    /// Removes the oldest element, or returns `None` if the queue was
    /// observed empty at the linearization point. Lock-free.
    pub fn dequeue(&self, tid: usize) -> Option<T> {
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
            let item = segment.items[idx].swap(taken(), Ordering::AcqRel);
            if item.is_null() || item == taken() {
                continue;
            }
            self.hazard.clear_one(HP_SLOT, tid);
            return Some(*unsafe { Box::from_raw(item) });
        }
        self.hazard.clear_one(HP_SLOT, tid);
        None
    }

    fn segment_count(
        &self,
        location: &AtomicPtr<Segment<T>>,
        index: impl Fn(&Segment<T>) -> u32,
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

impl<T: Send> Default for FaaArrayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for FaaArrayQueue<T> {
    fn drop(&mut self) {
        // Free the boxed elements still in flight, then the segment chain.
        let mut segment = *self.head.get_mut();
        while !segment.is_null() {
            let mut boxed = unsafe { Box::from_raw(segment) };
            for slot in boxed.items.iter_mut() {
                let item = *slot.get_mut();
                if !item.is_null() && item != taken() {
                    drop(unsafe { Box::from_raw(item) });
                }
            }
            segment = *boxed.next.get_mut();
        }
    }
}

impl<T: Send> ConcurrentQueue<T> for FaaArrayQueue<T> {
    fn enqueue(&self, value: T, tid: usize) {
        FaaArrayQueue::enqueue(self, value, tid);
    }

    fn dequeue(&self, tid: usize) -> Option<T> {
        FaaArrayQueue::dequeue(self, tid)
    }

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
