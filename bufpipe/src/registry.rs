//! Bounded set of parked receivers waiting for a wake-up.

use bufpipe_notify::NotifyCh;
use crossbeam_queue::ArrayQueue;

/// FIFO of wake-up channels, one per parked receiver.
///
/// Entries are never removed from the middle. A receiver that stops waiting
/// cancels its channel and leaves it in place; dead entries are discarded
/// the next time they reach the head.
pub(crate) struct Registry {
    slots: ArrayQueue<NotifyCh<()>>,
}

impl Registry {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "registry capacity must be non-zero");
        Self {
            slots: ArrayQueue::new(capacity),
        }
    }

    /// Adds a channel, handing it back if every slot is taken.
    #[inline]
    pub(crate) fn try_register(&self, ch: NotifyCh<()>) -> Result<(), NotifyCh<()>> {
        self.slots.push(ch)
    }

    /// Notifies the oldest live entry, discarding dead ones on the way.
    ///
    /// Returns `false` if no live entry was found.
    pub(crate) fn wake_one(&self) -> bool {
        while let Some(ch) = self.slots.pop() {
            if ch.notify(()) {
                return true;
            }
        }
        false
    }

    /// Cancels every entry. Returns how many were still live.
    pub(crate) fn cancel_all(&self) -> usize {
        let mut live = 0;
        while let Some(ch) = self.slots.pop() {
            if ch.cancel() {
                live += 1;
            }
        }
        live
    }

    /// Tries to make room by discarding a dead head entry.
    ///
    /// A live head is rotated to the tail. If its slot was taken in the
    /// meantime it is woken instead, and its receiver registers again.
    /// Either way the entry is briefly absent, so callers must re-check for
    /// data and close afterwards.
    ///
    /// Returns `true` if a slot is likely free now.
    pub(crate) fn evict_stale(&self) -> bool {
        let Some(head) = self.slots.pop() else {
            return true;
        };
        if head.is_closed() {
            return true;
        }
        match self.slots.push(head) {
            Ok(()) => false,
            Err(bounced) => {
                bounced.notify(());
                false
            }
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
