//! One-shot, cancellable notification channel.
//!
//! A [`NotifyCh`] carries at most one outcome in its lifetime: either a value
//! delivered by [`NotifyCh::notify`], or a cancellation (optionally with a
//! value) delivered by [`NotifyCh::cancel`] / [`NotifyCh::cancel_with_value`].
//! Exactly one of those calls succeeds per channel, no matter how many threads
//! race for it. Whoever holds the receive lease observes that outcome.
//!
//! It is the parking primitive underneath `bufpipe::Pipe::receive`: a reader
//! that finds the pipe empty registers a channel and sleeps on it until an
//! append notifies it, the pipe is closed, or its [`CancelToken`] fires.
//!
//! # Example
//!
//! ```rust
//! use bufpipe_notify::{CancelToken, NotifyCh};
//! use std::thread;
//!
//! let ch = NotifyCh::new();
//! let sender = ch.clone();
//!
//! let handle = thread::spawn(move || {
//!     assert!(sender.notify(42));
//!     assert!(!sender.notify(43)); // one-shot
//! });
//!
//! assert_eq!(ch.wait(&CancelToken::new()), Ok(42));
//! handle.join().unwrap();
//! ```
//!
//! # Two Leases
//!
//! ```text
//!                 send lease                       receive lease
//!            ┌──────────────────┐            ┌──────────────────────┐
//!  notify ──►│ Idle ─► Leased ─►│ Closed     │ Idle ◄─► Leased ─►   │ Closed
//!  cancel ──►│   (one winner)   │  (gate)    │  fetch / unfetch     │ (consumed)
//!            └──────────────────┘            └──────────────────────┘
//! ```
//!
//! The send lease decides *what* happened; the receive lease decides *who*
//! gets to see it. Keeping them apart means the owner of a channel can always
//! close it unconditionally, while a waiter whose wait was interrupted can
//! hand its lease back ([`NotifyCh::unfetch_channel`]) so the same channel can
//! be waited on again instead of being poisoned.
//!
//! # Waking a Parked Thread
//!
//! The receive-lease holder arms the channel with its thread's
//! [`Unparker`](crossbeam_utils::sync::Unparker). The closer takes that
//! unparker after closing the gate:
//!
//! ```text
//! Waiter:                          Closer:
//! ─────────────────────            ─────────────────────
//! store(waker, unparker)
//! [SeqCst fence]                   close(send lease)
//! load(send lease) -> Leased       [SeqCst fence]
//! park()                           take(waker) -> Some
//!                                  unpark()
//! ```
//!
//! The fences give a total order: either the closer finds the unparker, or
//! the waiter sees the gate closed before it parks. Parker tokens make an
//! early unpark stick, so the wake-up cannot be lost in between.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cancel;
mod lease;

pub use cancel::{CancelToken, Interrupted, Subscription};

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering, fence};

use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::sync::{Parker, Unparker};

use lease::{Lease, LeaseCell};

/// Shared state between every handle of one channel.
struct Inner<T> {
    send: LeaseCell,
    receive: LeaseCell,
    /// Meaningful once `send` is `Closed`.
    cancelled: AtomicBool,
    /// Written only by the send-lease winner before closing, read only by the
    /// receive-lease holder after observing the close.
    value: UnsafeCell<Option<T>>,
    waker: AtomicCell<Option<Unparker>>,
}

// Safety: `value` is handed from exactly one writer to exactly one reader,
// ordered by the release/acquire pair on the send lease.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn new(receive: LeaseCell) -> Self {
        Self {
            send: LeaseCell::new(),
            receive,
            cancelled: AtomicBool::new(false),
            value: UnsafeCell::new(None),
            waker: AtomicCell::new(None),
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.send.load() == Lease::Closed
    }

    /// Common path of notify / cancel / `cancel_with_value`.
    fn close_with(&self, value: Option<T>, cancelled: bool) -> bool {
        if !self.send.acquire() {
            return false;
        }

        if value.is_some() {
            // Safety: we hold the send lease; no reader looks before `Closed`.
            unsafe { *self.value.get() = value };
        }
        self.cancelled.store(cancelled, Ordering::Relaxed);

        let closed = self.send.close();
        debug_assert!(closed, "send lease holder must be able to close");

        fence(Ordering::SeqCst);
        if let Some(unparker) = self.waker.take() {
            unparker.unpark();
        }
        true
    }

    /// Moves the outcome out. Caller must have moved the receive lease to
    /// `Closed` after observing the send side closed.
    fn take_delivery(&self) -> Delivery<T> {
        // Safety: the send side is closed (acquire-loaded) and the caller won
        // the receive-lease close, so nobody else touches `value`.
        let value = unsafe { (*self.value.get()).take() };
        if self.cancelled.load(Ordering::Relaxed) {
            Delivery::Cancelled(value)
        } else {
            match value {
                Some(v) => Delivery::Notified(v),
                None => unreachable!("notify always stores a value"),
            }
        }
    }
}

/// A one-shot, cancellable notification channel.
///
/// Cloning produces another handle to the same channel.
pub struct NotifyCh<T> {
    inner: Arc<Inner<T>>,
}

impl<T> NotifyCh<T> {
    /// Creates an idle channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(LeaseCell::new())),
        }
    }

    /// Creates a channel whose receive lease is already held by the returned
    /// [`Waiter`].
    ///
    /// Equivalent to `new()` followed by a `fetch_channel()` that cannot fail.
    /// This is the constructor to use when the channel is handed to a
    /// notifier right away and the caller is the only one who will wait on
    /// it.
    #[must_use]
    pub fn leased() -> (Self, Waiter<T>) {
        let inner = Arc::new(Inner::new(LeaseCell::leased()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            Waiter { inner },
        )
    }

    /// Takes the receive lease.
    ///
    /// Returns `None` if another waiter holds it or the outcome was already
    /// consumed. A waiter that gives up without consuming the outcome should
    /// hand the lease back with [`NotifyCh::unfetch_channel`].
    pub fn fetch_channel(&self) -> Option<Waiter<T>> {
        if self.inner.receive.acquire() {
            Some(Waiter {
                inner: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    /// Returns a receive lease taken by [`NotifyCh::fetch_channel`].
    ///
    /// # Errors
    ///
    /// Hands `waiter` back if it belongs to a different channel or this
    /// channel has already been closed. In the second case an outcome is
    /// waiting, and the caller still collects it with
    /// [`Waiter::try_complete`].
    pub fn unfetch_channel(&self, waiter: Waiter<T>) -> Result<(), Waiter<T>> {
        if !Arc::ptr_eq(&self.inner, &waiter.inner) {
            return Err(waiter);
        }
        waiter.release()
    }

    /// Delivers `value` and closes the channel.
    ///
    /// Returns `false` if the channel was already notified or cancelled.
    pub fn notify(&self, value: T) -> bool {
        self.inner.close_with(Some(value), false)
    }

    /// Closes the channel as cancelled.
    ///
    /// Returns `false` if the channel was already notified or cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.close_with(None, true)
    }

    /// Closes the channel as cancelled, attaching `value`.
    ///
    /// Returns `false` if the channel was already notified or cancelled.
    pub fn cancel_with_value(&self, value: T) -> bool {
        self.inner.close_with(Some(value), true)
    }

    /// Returns `true` once `notify` or a cancel has succeeded.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Returns `true` if the channel was closed by a cancel.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.is_closed() && self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `true` if the channel was closed by `notify`.
    #[inline]
    pub fn is_notified(&self) -> bool {
        self.is_closed() && !self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Blocks until the channel is closed or `token` fires.
    ///
    /// # Errors
    ///
    /// - [`WaitError::AlreadyUsed`] if the receive lease is unavailable
    ///   (another waiter holds it, or the outcome was already consumed).
    ///   Returned immediately without blocking.
    /// - [`WaitError::Closed`] if the channel was cancelled, carrying the
    ///   value passed to `cancel_with_value`, if any.
    /// - [`WaitError::Cancelled`] / [`WaitError::DeadlineExceeded`] if the
    ///   token fired while the channel was still open. The receive lease is
    ///   handed back, so the channel can be waited on again.
    ///
    /// # Example
    ///
    /// ```
    /// use bufpipe_notify::{CancelToken, NotifyCh, WaitError};
    /// use std::time::Duration;
    ///
    /// let ch = NotifyCh::<u32>::new();
    ///
    /// let expired = CancelToken::with_timeout(Duration::ZERO);
    /// assert_eq!(ch.wait(&expired), Err(WaitError::DeadlineExceeded));
    ///
    /// // Not poisoned: the owner can still close it and a new wait sees it.
    /// assert!(ch.cancel_with_value(7));
    /// assert_eq!(ch.wait(&CancelToken::new()), Err(WaitError::Closed(Some(7))));
    /// ```
    pub fn wait(&self, token: &CancelToken) -> Result<T, WaitError<T>> {
        let Some(mut waiter) = self.fetch_channel() else {
            return Err(WaitError::AlreadyUsed);
        };

        let parker = Parker::new();
        waiter.register(parker.unparker());
        let _subscription = token.subscribe(parker.unparker());

        loop {
            waiter = match waiter.try_complete() {
                Ok(Delivery::Notified(value)) => return Ok(value),
                Ok(Delivery::Cancelled(value)) => return Err(WaitError::Closed(value)),
                Err(pending) => pending,
            };

            if let Err(why) = token.check() {
                match waiter.release() {
                    Ok(()) => return Err(why.into()),
                    // Closed between the two checks: report the outcome.
                    Err(closed) => {
                        waiter = closed;
                        continue;
                    }
                }
            }

            token.park(&parker);
        }
    }
}

impl<T> Clone for NotifyCh<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for NotifyCh<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for NotifyCh<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyCh")
            .field("send", &self.inner.send)
            .field("receive", &self.inner.receive)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// The receive lease of a [`NotifyCh`].
///
/// Holding a `Waiter` means this thread, and only this thread, will observe
/// the channel's outcome. Dropping it without calling
/// [`Waiter::try_complete`] or [`NotifyCh::unfetch_channel`] keeps the lease
/// taken.
pub struct Waiter<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Waiter<T> {
    /// Arms the channel to unpark `unparker` when it closes.
    ///
    /// Re-check [`Waiter::is_closed`] after registering and before parking.
    pub fn register(&self, unparker: &Unparker) {
        self.inner.waker.store(Some(unparker.clone()));
        fence(Ordering::SeqCst);
    }

    /// Returns `true` once the channel has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Consumes the outcome if the channel is closed.
    ///
    /// Returns the waiter back unchanged while the channel is still open.
    pub fn try_complete(self) -> Result<Delivery<T>, Self> {
        if !self.inner.is_closed() {
            return Err(self);
        }
        let consumed = self.inner.receive.close();
        debug_assert!(consumed, "waiter must hold the receive lease");
        Ok(self.inner.take_delivery())
    }

    /// Hands the receive lease back while the channel is still open.
    fn release(self) -> Result<(), Self> {
        if self.inner.is_closed() {
            return Err(self);
        }
        // Drop our registration so a later closer does not wake this thread.
        drop(self.inner.waker.take());
        if self.inner.receive.release() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// How a closed channel was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// Closed by [`NotifyCh::notify`].
    Notified(T),
    /// Closed by [`NotifyCh::cancel`] or [`NotifyCh::cancel_with_value`].
    Cancelled(Option<T>),
}

// ============================================================================
// Error Types
// ============================================================================

/// Error returned by [`NotifyCh::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<T> {
    /// The receive lease was already taken or consumed.
    AlreadyUsed,
    /// The channel was cancelled, possibly with a value.
    Closed(Option<T>),
    /// The token was cancelled before the channel closed.
    Cancelled,
    /// The token's deadline passed before the channel closed.
    DeadlineExceeded,
}

impl<T> WaitError<T> {
    /// Returns the value attached by `cancel_with_value`, if any.
    pub fn into_inner(self) -> Option<T> {
        match self {
            WaitError::Closed(value) => value,
            _ => None,
        }
    }

    /// Returns `true` if the wait was ended by the token rather than the channel.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WaitError::Cancelled | WaitError::DeadlineExceeded)
    }
}

impl<T> From<Interrupted> for WaitError<T> {
    fn from(why: Interrupted) -> Self {
        match why {
            Interrupted::Cancelled => WaitError::Cancelled,
            Interrupted::DeadlineExceeded => WaitError::DeadlineExceeded,
        }
    }
}

impl<T> fmt::Display for WaitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::AlreadyUsed => write!(f, "notification channel already used"),
            WaitError::Closed(_) => write!(f, "notification channel cancelled"),
            WaitError::Cancelled => write!(f, "wait cancelled"),
            WaitError::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for WaitError<T> {}
