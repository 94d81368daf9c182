//! Linked-list node storage for the queue.
//!
//! The node at `head` is always a sentinel. Its value slot is either
//! uninitialized (the initial sentinel) or has already been moved out by the
//! dequeue that promoted it, so a node never drops its own value.

use std::mem::MaybeUninit;

use crossbeam_epoch::{Atomic, Owned};

/// A singly-linked queue node.
///
/// ```text
/// head (sentinel)          first value            last value
/// ┌──────────────┐        ┌──────────────┐        ┌──────────────┐
/// │ value: ----- │  next  │ value: a     │  next  │ value: c     │  next
/// │ next ────────┼───────►│ next ────────┼─ ... ─►│ next ────────┼──► null
/// └──────────────┘        └──────────────┘        └──────────────┘
///                                                   ▲
///                                                   tail (may lag by one)
/// ```
pub(crate) struct Node<T> {
    pub(crate) value: MaybeUninit<T>,
    pub(crate) next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    /// The value-less node a fresh queue starts with.
    pub(crate) fn sentinel() -> Owned<Self> {
        Owned::new(Self {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        })
    }

    /// A detached node carrying `value`, ready to be linked at the tail.
    pub(crate) fn detached(value: T) -> Owned<Self> {
        Owned::new(Self {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
    }

    /// Moves the value out of a node that was just promoted to sentinel.
    ///
    /// # Safety
    ///
    /// The caller must be the unique thread that won the head CAS which made
    /// this node the sentinel, and the value must not have been read before.
    #[inline]
    pub(crate) unsafe fn take_value(&self) -> T {
        unsafe { self.value.assume_init_read() }
    }
}
