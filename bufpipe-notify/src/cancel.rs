//! Cancellation tokens for blocking waits.
//!
//! A [`CancelToken`] is the thing a blocking call watches besides its own
//! wake-up source: it fires either when someone calls [`CancelToken::cancel`]
//! or when its deadline passes. Clones share state, so one thread can hold a
//! clone to interrupt a wait running on another.
//!
//! # Example
//!
//! ```
//! use bufpipe_notify::{CancelToken, Interrupted};
//! use std::time::Duration;
//!
//! let token = CancelToken::new();
//! assert_eq!(token.check(), Ok(()));
//!
//! token.clone().cancel();
//! assert_eq!(token.check(), Err(Interrupted::Cancelled));
//!
//! let expired = CancelToken::with_timeout(Duration::ZERO);
//! assert_eq!(expired.check(), Err(Interrupted::DeadlineExceeded));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};
use tracing::trace;

/// Why a blocking wait stopped without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// [`CancelToken::cancel`] was called.
    Cancelled,
    /// The token's deadline passed.
    DeadlineExceeded,
}

impl Interrupted {
    /// Returns `true` if this is the `Cancelled` variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Interrupted::Cancelled)
    }

    /// Returns `true` if this is the `DeadlineExceeded` variant.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Interrupted::DeadlineExceeded)
    }
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "wait cancelled"),
            Interrupted::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl std::error::Error for Interrupted {}

struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    next_id: AtomicU64,
    /// Threads parked on behalf of this token. Only touched when a blocking
    /// wait starts or ends, and on cancel.
    subscribers: Mutex<Vec<(u64, Unparker)>>,
}

/// A cancellation signal with an optional deadline.
///
/// A token created with [`CancelToken::new`] never fires on its own; it is
/// the "no cancellation" token for calls that should block until they get a
/// result.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Creates a token with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a token that fires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    /// Creates a token that fires `timeout` from now.
    ///
    /// A timeout too large to represent is treated as no deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fires the token and wakes every thread currently parked on it.
    ///
    /// Returns `false` if it had already been cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trace!(waiters = subscribers.len(), "cancel token fired");
        for (_, unparker) in subscribers.iter() {
            unparker.unpark();
        }
        true
    }

    /// Returns `true` if the token was cancelled or its deadline passed.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Reports whether, and why, the token has fired.
    ///
    /// An explicit cancel takes precedence over an expired deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Err(Interrupted::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// The instant this token fires on its own, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Registers a parked thread to be woken by [`CancelToken::cancel`].
    ///
    /// The registration lasts until the returned guard is dropped. Callers
    /// must re-check the token after subscribing and before parking.
    pub fn subscribe(&self, unparker: &Unparker) -> Subscription<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, unparker.clone()));
        Subscription { token: self, id }
    }

    /// Parks the current thread until unparked or the deadline passes.
    ///
    /// May return spuriously; callers loop on their own condition.
    pub fn park(&self, parker: &Parker) {
        match self.inner.deadline {
            Some(deadline) => parker.park_deadline(deadline),
            None => parker.park(),
        }
    }

    /// Like [`CancelToken::park`], but never sleeps longer than `limit`.
    pub fn park_at_most(&self, parker: &Parker, limit: Duration) {
        let capped = Instant::now().checked_add(limit);
        match (self.inner.deadline, capped) {
            (Some(deadline), Some(capped)) => parker.park_deadline(deadline.min(capped)),
            (Some(deadline), None) => parker.park_deadline(deadline),
            (None, _) => parker.park_timeout(limit),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.inner.cancelled.load(Ordering::Relaxed))
            .field("deadline", &self.inner.deadline)
            .finish_non_exhaustive()
    }
}

/// Keeps a parked thread subscribed to a [`CancelToken`].
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        let mut subscribers = self
            .token
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = subscribers.iter().position(|(id, _)| *id == self.id) {
            subscribers.swap_remove(pos);
        }
    }
}

impl fmt::Debug for Subscription<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
