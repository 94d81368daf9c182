//! # bufpipe-queue
//!
//! An unbounded, lock-free, multi-producer multi-consumer FIFO queue.
//!
//! This is the Michael–Scott queue
//! (<https://www.cs.rochester.edu/u/scott/papers/1996_PODC_queues.pdf>) with
//! unlinked nodes reclaimed through `crossbeam-epoch`. It is the storage layer
//! underneath `bufpipe::Pipe`, but is usable on its own wherever a shared
//! `&Queue<T>` needs non-blocking push/pop from any number of threads.
//!
//! ## Features
//!
//! - **Unbounded**: `enqueue` always succeeds
//! - **Lock-free**: every retry of a CAS loop means some other thread made progress
//! - **Linearizable**: a total order over enqueue/dequeue exists, consistent with
//!   each thread's program order
//! - **Non-blocking dequeue**: an empty queue is reported immediately, never polled
//!
//! ## Example
//!
//! ```
//! use bufpipe_queue::Queue;
//!
//! let queue = Queue::new();
//!
//! assert_eq!(queue.enqueue(1), 1);
//! assert_eq!(queue.enqueue(2), 2);
//!
//! assert_eq!(queue.dequeue(), Some(1));
//! assert_eq!(queue.dequeue(), Some(2));
//! assert_eq!(queue.dequeue(), None);
//! ```
//!
//! ## Sharing Across Threads
//!
//! ```
//! use bufpipe_queue::Queue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(Queue::new());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|p| {
//!         let queue = Arc::clone(&queue);
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 queue.enqueue(p * 100 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! let mut drained = Vec::new();
//! while let Some(v) = queue.dequeue() {
//!     drained.push(v);
//! }
//! drained.sort_unstable();
//! assert_eq!(drained, (0..400).collect::<Vec<_>>());
//! ```
//!
//! # Algorithm
//!
//! ```text
//! enqueue(v):                              dequeue():
//! ────────────────────────────             ─────────────────────────────────
//! node = detached(v)                       loop:
//! loop:                                      head, tail, next = head.next
//!   tail, next = tail.next                   if head moved: retry
//!   if tail moved: retry                     if head == tail:
//!   if next == null:                           if next == null: return None
//!     CAS(tail.next, null -> node)             CAS(tail, tail -> next)  (help)
//!     ok: CAS(tail, tail -> node)            else:
//!         return                               CAS(head, head -> next)
//!   else:                                      ok: value = next.value
//!     CAS(tail, tail -> next)  (help)              retire(head)
//! ```
//!
//! `tail` may lag the true last node by one while an enqueue is between its
//! two CASes. Any thread that observes the lag advances `tail` itself before
//! retrying, so a stalled enqueuer never blocks anyone else.
//!
//! The dequeued value is read from the node that *becomes* the new sentinel,
//! after the head CAS succeeds. Only the CAS winner ever reads it, so the
//! value is moved out exactly once and no other thread can observe a
//! half-read slot.
//!
//! # Memory Reclamation
//!
//! Every operation runs inside an epoch guard. A retired sentinel is freed only
//! once every thread that might still hold a pointer to it (obtained before the
//! unlink) has left its critical section. Because nodes are never freed early
//! they are never reused early either, which rules out ABA on the head/tail
//! CASes.
//!
//! # Size
//!
//! [`Queue::len`] is a separate counter bumped *after* the structural CAS
//! commits. It is exact at quiescence but may be transiently stale (even
//! momentarily behind a racing dequeue) under concurrency. Treat it as a hint.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod node;

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicIsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard};
use crossbeam_utils::{Backoff, CachePadded};

use node::Node;

/// An unbounded lock-free FIFO queue.
///
/// All operations take `&self`; share the queue with `Arc<Queue<T>>` or a
/// scoped borrow.
///
/// # Example
///
/// ```
/// use bufpipe_queue::Queue;
///
/// let queue = Queue::new();
/// queue.enqueue("a");
/// queue.enqueue("b");
///
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.dequeue(), Some("a"));
/// assert_eq!(queue.len(), 1);
/// ```
pub struct Queue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    size: CachePadded<AtomicIsize>,
    _marker: PhantomData<T>,
}

// Safety: values are moved in by one thread and moved out by exactly one
// (the head CAS winner). Node links are only touched through atomics.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            size: CachePadded::new(AtomicIsize::new(0)),
            _marker: PhantomData,
        };

        // Safety: the queue is not shared yet.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = Node::sentinel().into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }

        queue
    }

    /// Appends a value at the tail. Always succeeds.
    ///
    /// Returns the number of values in the queue right after this insert,
    /// as seen by the size counter (see [`Queue::len`] for the caveats).
    ///
    /// # Example
    ///
    /// ```
    /// use bufpipe_queue::Queue;
    ///
    /// let queue = Queue::new();
    /// assert_eq!(queue.enqueue(10), 1);
    /// assert_eq!(queue.enqueue(20), 2);
    /// ```
    pub fn enqueue(&self, value: T) -> usize {
        let guard = epoch::pin();
        self.push_with(value, &guard);
        let size = self.size.fetch_add(1, Ordering::AcqRel) + 1;
        clamp(size)
    }

    /// Removes the value at the head.
    ///
    /// Returns `None` immediately if the queue is empty; never blocks or polls.
    ///
    /// # Example
    ///
    /// ```
    /// use bufpipe_queue::Queue;
    ///
    /// let queue = Queue::new();
    /// assert_eq!(queue.dequeue(), None::<u32>);
    ///
    /// queue.enqueue(7);
    /// assert_eq!(queue.dequeue(), Some(7));
    /// ```
    pub fn dequeue(&self) -> Option<T> {
        let guard = epoch::pin();
        let value = self.pop_with(&guard)?;
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    /// Approximate number of values in the queue.
    ///
    /// Read without synchronizing against the structural CASes. Exact when no
    /// operation is in flight.
    #[inline]
    pub fn len(&self) -> usize {
        clamp(self.size.load(Ordering::Acquire))
    }

    /// Returns `true` if the queue held no values at the moment of the check.
    ///
    /// Unlike [`Queue::len`], this inspects the list itself: it is `false` as
    /// soon as an enqueue's link CAS has committed.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // Safety: head is never null and cannot be freed while we are pinned.
        let next = unsafe { head.deref() }.next.load(Ordering::Acquire, &guard);
        next.is_null()
    }

    fn push_with(&self, value: T, guard: &Guard) {
        let node = Node::detached(value).into_shared(guard);
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: tail is never null and cannot be freed while we are pinned.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            // Tail moved under us, start over
            if tail != self.tail.load(Ordering::Acquire, guard) {
                continue;
            }

            if next.is_null() {
                if tail_ref
                    .next
                    .compare_exchange(
                        epoch::Shared::null(),
                        node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    )
                    .is_ok()
                {
                    // Best effort: a later operation fixes the tail if we lose.
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                    return;
                }
                backoff.spin();
            } else {
                // Another enqueue is between its two CASes: help it along.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
            }
        }
    }

    fn pop_with(&self, guard: &Guard) -> Option<T> {
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: head is never null and cannot be freed while we are pinned.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);

            if head != self.head.load(Ordering::Acquire, guard) {
                continue;
            }

            if head == tail {
                if next.is_null() {
                    return None;
                }
                // Tail lags behind a committed enqueue.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            debug_assert!(!next.is_null(), "head != tail implies a successor");

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                // Safety: we won the head CAS, so `next` is now our sentinel and
                // nobody else will read its value. It stays allocated while we
                // are pinned. The old head is unreachable from the queue and is
                // retired until all current guards are dropped.
                unsafe {
                    let value = next.deref().take_value();
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }

            backoff.spin();
        }
    }
}

#[inline]
fn clamp(size: isize) -> usize {
    usize::try_from(size).unwrap_or(0)
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Safety: `&mut self` means no other thread can reach the nodes.
        unsafe {
            let guard = epoch::unprotected();
            while self.pop_with(guard).is_some() {}

            let sentinel = self.head.load(Ordering::Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
