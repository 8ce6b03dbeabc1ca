//! Michael–Scott lock-free FIFO.
//!
//! Michael and Scott, “Simple, Fast, and Practical Non-Blocking and
//! Blocking Concurrent Queue Algorithms”, PODC 1996. A singly-linked list
//! with a sentinel at the front; `tail` may lag behind the real last node
//! and is helped forward by both operations. Popped sentinels are retired
//! through the hazard-pointer registry, since a racing `pop` may still
//! dereference them after the winning `head` swing.

use crossbeam_utils::CachePadded;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use super::hazard::{HazardPointers, DEFAULT_MAX_THREADS};
use super::ConcurrentQueue;

const HP_HEAD: usize = 0;
const HP_NEXT: usize = 1;
const HP_TAIL: usize = 0;

struct Node<T> {
    /// Empty in the sentinel position, full in every node behind it. The
    /// value is moved out by the single `pop` that swings `head` past it.
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Self {
        Box::into_raw(Box::new(Node {
            value: MaybeUninit::uninit(),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn with_value(value: T) -> *mut Self {
        Box::into_raw(Box::new(Node {
            value: MaybeUninit::new(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// Unbounded lock-free FIFO of single-element nodes.
///
/// Operation counters are monotone and bumped on each successful
/// linearization, so the queue can be composed into a
/// [d-CBO multiqueue](crate::queues::DcboQueue).
///
/// # Examples
///
/// ```
/// use relaxed_bfs::queues::MsQueue;
///
/// let queue = MsQueue::new();
/// queue.push(4, 0);
/// queue.push(7, 0);
/// assert_eq!(queue.pop(0), Some(4));
/// assert_eq!(queue.pop(0), Some(7));
/// assert_eq!(queue.pop(0), None);
/// ```
pub struct MsQueue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    enqueues: CachePadded<AtomicU64>,
    dequeues: CachePadded<AtomicU64>,
    hazard: HazardPointers<Node<T>>,
}

unsafe impl<T: Send> Send for MsQueue<T> {}
unsafe impl<T: Send> Sync for MsQueue<T> {}

impl<T> MsQueue<T> {
    /// Creates an empty queue sized for [`DEFAULT_MAX_THREADS`] thread ids.
    pub fn new() -> Self {
        Self::with_max_threads(DEFAULT_MAX_THREADS)
    }

    /// Creates an empty queue accepting thread ids in `0..max_threads`.
    pub fn with_max_threads(max_threads: usize) -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            enqueues: CachePadded::new(AtomicU64::new(0)),
            dequeues: CachePadded::new(AtomicU64::new(0)),
            hazard: HazardPointers::new(max_threads),
        }
    }

    /// Appends `value` at the tail. Lock-free.
    pub fn push(&self, value: T, tid: usize) {
        let node = Node::with_value(value);
        loop {
            let tail = self.hazard.protect(HP_TAIL, &self.tail, tid);
            let next = unsafe { &*tail }.next.load(Ordering::Acquire);
            if tail != self.tail.load(Ordering::SeqCst) {
                continue;
            }
            if !next.is_null() {
                // Tail is lagging: help it forward and retry.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if unsafe { &*tail }
                .next
                .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let _ = self
                    .tail
                    .compare_exchange(tail, node, Ordering::Release, Ordering::Relaxed);
                self.enqueues.fetch_add(1, Ordering::Release);
                self.hazard.clear_one(HP_TAIL, tid);
                return;
            }
        }
    }

    /// Removes the oldest element, or returns `None` if the queue was
    /// observed empty at the linearization point. Lock-free.
    pub fn pop(&self, tid: usize) -> Option<T> {
        loop {
            let head = self.hazard.protect(HP_HEAD, &self.head, tid);
            let tail = self.tail.load(Ordering::SeqCst);
            let next = unsafe { &*head }.next.load(Ordering::Acquire);
            if head != self.head.load(Ordering::SeqCst) {
                continue;
            }
            if head == tail {
                if next.is_null() {
                    self.hazard.clear(tid);
                    return None;
                }
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if next.is_null() {
                continue;
            }
            // The value lives in `next`, the sentinel-to-be; protect it
            // across the head swing so the read below cannot race with
            // reclamation.
            self.hazard.protect_ptr(HP_NEXT, next, tid);
            if head != self.head.load(Ordering::SeqCst) {
                continue;
            }
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let value = unsafe { ptr::read((*next).value.as_ptr()) };
                self.dequeues.fetch_add(1, Ordering::Release);
                self.hazard.clear(tid);
                unsafe { self.hazard.retire(head, tid) };
                return Some(value);
            }
        }
    }
}

impl<T> Default for MsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MsQueue<T> {
    fn drop(&mut self) {
        // The chain starts at the current sentinel, whose value slot is
        // empty; every node behind it still owns its value.
        let mut node = *self.head.get_mut();
        let mut is_sentinel = true;
        while !node.is_null() {
            let mut boxed = unsafe { Box::from_raw(node) };
            node = *boxed.next.get_mut();
            if !is_sentinel {
                unsafe { boxed.value.assume_init_drop() };
            }
            is_sentinel = false;
        }
    }
}

impl<T: Send> ConcurrentQueue<T> for MsQueue<T> {
    fn enqueue(&self, value: T, tid: usize) {
        self.push(value, tid);
    }

    fn dequeue(&self, tid: usize) -> Option<T> {
        self.pop(tid)
    }

    fn enqueue_count(&self, _tid: usize) -> u64 {
        self.enqueues.load(Ordering::Acquire)
    }

    fn dequeue_count(&self, _tid: usize) -> u64 {
        self.dequeues.load(Ordering::Acquire)
    }

    fn enqueue_version(&self, _tid: usize) -> u64 {
        self.enqueues.load(Ordering::Acquire)
    }
}
