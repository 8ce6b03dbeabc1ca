//! Hazard-pointer registry for the array-queue segments and list nodes.
//!
//! Implements the scheme of Michael, “Hazard Pointers: Safe Memory
//! Reclamation for Lock-Free Objects”, IEEE TPDS 2004: each thread owns a
//! small array of protection slots and a private list of retired pointers;
//! a retired pointer is freed only once it appears in no thread's slots.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Protection slots per thread (“K” in the hazard-pointer paper).
pub const MAX_HPS: usize = 4;

/// Registry width used when the worker count is not known in advance.
pub const DEFAULT_MAX_THREADS: usize = 256;

/// Per-thread hazard slots and retire lists for up to `max_threads`
/// threads, identified by dense ids in `0..max_threads`.
///
/// `protect`/`clear` may be called concurrently from any thread on its own
/// id; the retire list of a thread is touched only by that thread, while
/// the reclamation scan reads every thread's slots.
pub struct HazardPointers<T> {
    slots: Box<[CachePadded<[AtomicPtr<T>; MAX_HPS]>]>,
    retired: Box<[CachePadded<UnsafeCell<Vec<*mut T>>>]>,
    scan_threshold: usize,
}

unsafe impl<T: Send> Send for HazardPointers<T> {}
unsafe impl<T: Send> Sync for HazardPointers<T> {}

impl<T> HazardPointers<T> {
    /// Creates a registry for thread ids in `0..max_threads`.
    ///
    /// The reclamation scan is amortized by letting each retire list grow
    /// to `MAX_HPS × max_threads` entries before scanning.
    pub fn new(max_threads: usize) -> Self {
        Self {
            slots: (0..max_threads)
                .map(|_| CachePadded::new(std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut()))))
                .collect(),
            retired: (0..max_threads)
                .map(|_| CachePadded::new(UnsafeCell::new(Vec::new())))
                .collect(),
            scan_threshold: MAX_HPS * max_threads,
        }
    }

    /// Reads `atom` and publishes the value in slot `slot` of thread `tid`,
    /// until two consecutive reads agree. The returned pointer is safe to
    /// dereference until the slot is cleared or overwritten, even if it is
    /// concurrently unlinked and retired.
    ///
    /// Lock-free: a publisher changing `atom` forces another iteration.
    ///
    /// # Panics
    ///
    /// If `tid ≥ max_threads` or `slot ≥ MAX_HPS`.
    pub fn protect(&self, slot: usize, atom: &AtomicPtr<T>, tid: usize) -> *mut T {
        let hp = &self.slots[tid][slot];
        let mut published = ptr::null_mut();
        loop {
            let current = atom.load(Ordering::SeqCst);
            if current == published {
                return current;
            }
            hp.store(current, Ordering::SeqCst);
            published = current;
        }
    }

    /// Publishes an already-loaded pointer. Unlike [`protect`](Self::protect)
    /// this does not validate the source location, so the caller must
    /// re-check it before dereferencing.
    pub fn protect_ptr(&self, slot: usize, ptr: *mut T, tid: usize) -> *mut T {
        self.slots[tid][slot].store(ptr, Ordering::SeqCst);
        ptr
    }

    /// Releases every slot of thread `tid`.
    pub fn clear(&self, tid: usize) {
        for hp in self.slots[tid].iter() {
            hp.store(ptr::null_mut(), Ordering::Release);
        }
    }

    /// Releases a single slot of thread `tid`.
    pub fn clear_one(&self, slot: usize, tid: usize) {
        self.slots[tid][slot].store(ptr::null_mut(), Ordering::Release);
    }

    /// Hands `ptr` to the registry for delayed reclamation. Once the
    /// thread's retire list exceeds the scan threshold, every list entry
    /// absent from all hazard slots is freed.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, must be unreachable for new
    /// protections (unlinked from every shared location), and must not be
    /// retired twice. Only the owning thread may pass `tid`.
    pub unsafe fn retire(&self, ptr: *mut T, tid: usize) {
        let retired = unsafe { &mut *self.retired[tid].get() };
        retired.push(ptr);
        if retired.len() >= self.scan_threshold {
            self.scan(retired);
        }
    }

    fn scan(&self, retired: &mut Vec<*mut T>) {
        retired.retain(|&candidate| {
            if self.is_protected(candidate) {
                true
            } else {
                drop(unsafe { Box::from_raw(candidate) });
                false
            }
        });
    }

    fn is_protected(&self, ptr: *mut T) -> bool {
        self.slots
            .iter()
            .any(|slots| slots.iter().any(|hp| hp.load(Ordering::SeqCst) == ptr))
    }
}

impl<T> Drop for HazardPointers<T> {
    fn drop(&mut self) {
        // All threads are gone, so everything still retired is free to go.
        for list in self.retired.iter_mut() {
            for &ptr in list.get_mut().iter() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}
