use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering, fence};
use std::time::Duration;

use bufpipe_notify::{CancelToken, NotifyCh};
use bufpipe_queue::Queue;
use crossbeam_utils::sync::Parker;
use crossbeam_utils::{Backoff, CachePadded};
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{ClosedOnWrite, FetchError, ReceiveError};
use crate::registry::Registry;

/// Set once by the first successful [`Pipe::close`].
const CLOSED: usize = 1;
/// Added per append between its open check and the end of its enqueue.
const WRITER: usize = 2;

/// An unbounded, closable multi-producer multi-consumer pipe.
///
/// Any number of threads may append, fetch and receive through a shared
/// reference; wrap the pipe in an `Arc` to share it.
///
/// # Example
///
/// ```
/// use bufpipe::{CancelToken, FetchError, Pipe, ReceiveError};
///
/// let pipe = Pipe::new();
/// assert_eq!(pipe.fetch(), Err(FetchError::NoData));
///
/// pipe.append(1).unwrap();
/// pipe.append(2).unwrap();
/// assert!(pipe.close());
/// assert!(pipe.append(3).is_err());
///
/// let token = CancelToken::new();
/// assert_eq!(pipe.receive(&token), Ok(1));
/// assert_eq!(pipe.fetch(), Ok(2));
/// assert_eq!(pipe.receive(&token), Err(ReceiveError::EndOfStream));
/// ```
pub struct Pipe<T> {
    queue: Queue<T>,
    /// `CLOSED` bit plus `WRITER` per in-flight append.
    state: CachePadded<AtomicUsize>,
    drained: AtomicBool,
    registry: Registry,
    blocked: AtomicUsize,
    poll: Duration,
}

impl<T> Pipe<T> {
    /// Creates an open pipe with the default [`Config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an open pipe with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the registry capacity is 0.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            queue: Queue::new(),
            state: CachePadded::new(AtomicUsize::new(0)),
            drained: AtomicBool::new(false),
            registry: Registry::new(config.registry_capacity),
            blocked: AtomicUsize::new(0),
            poll: config.registry_poll,
        }
    }

    /// Appends a value and wakes at most one parked receiver.
    ///
    /// Returns the approximate number of queued values after the append.
    ///
    /// # Errors
    ///
    /// Returns [`ClosedOnWrite`] with the value if the pipe was closed.
    pub fn append(&self, value: T) -> Result<usize, ClosedOnWrite<T>> {
        // Only accepted appends are counted, so a stream of rejected ones
        // cannot hold off end of stream.
        let admitted = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s & CLOSED == 0).then_some(s + WRITER)
            });
        if admitted.is_err() {
            return Err(ClosedOnWrite(value));
        }

        let len = self.queue.enqueue(value);
        self.state.fetch_sub(WRITER, Ordering::Release);

        // Pairs with the fence in `receive` after registering.
        fence(Ordering::SeqCst);
        self.registry.wake_one();
        Ok(len)
    }

    /// Takes the next value without blocking.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NoData`] if the pipe is empty but still open.
    /// - [`FetchError::EndOfStream`] if the pipe is closed and empty. Every
    ///   later fetch reports the same.
    pub fn fetch(&self) -> Result<T, FetchError> {
        if let Some(value) = self.queue.dequeue() {
            return Ok(value);
        }
        if self.drained.load(Ordering::Acquire) {
            return Err(FetchError::EndOfStream);
        }

        // Closed with no append still enqueueing: one more look decides.
        if self.state.load(Ordering::Acquire) == CLOSED {
            if let Some(value) = self.queue.dequeue() {
                return Ok(value);
            }
            if !self.drained.swap(true, Ordering::AcqRel) {
                debug!("pipe drained");
            }
            return Err(FetchError::EndOfStream);
        }

        Err(FetchError::NoData)
    }

    /// Takes the next value, blocking until one arrives, the pipe reaches
    /// end of stream, or `token` fires.
    ///
    /// A receive that is woken but loses the value to another consumer goes
    /// back to waiting.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::EndOfStream`] if the pipe is closed and empty.
    /// - [`ReceiveError::Cancelled`] / [`ReceiveError::DeadlineExceeded`] if
    ///   the token fired first. A token that has already fired is reported
    ///   as soon as the pipe is found empty.
    ///
    /// # Example
    ///
    /// ```
    /// use bufpipe::{CancelToken, Pipe, ReceiveError};
    /// use std::sync::Arc;
    /// use std::thread;
    /// use std::time::Duration;
    ///
    /// let pipe = Arc::new(Pipe::new());
    ///
    /// let writer = Arc::clone(&pipe);
    /// thread::spawn(move || {
    ///     writer.append("hello").unwrap();
    /// });
    /// assert_eq!(pipe.receive(&CancelToken::new()), Ok("hello"));
    ///
    /// let token = CancelToken::with_timeout(Duration::from_millis(10));
    /// assert_eq!(pipe.receive(&token), Err(ReceiveError::DeadlineExceeded));
    /// ```
    pub fn receive(&self, token: &CancelToken) -> Result<T, ReceiveError> {
        let _blocked = Blocked::enter(&self.blocked);
        let parker = Parker::new();
        let _subscription = token.subscribe(parker.unparker());
        let backoff = Backoff::new();

        loop {
            match self.fetch() {
                Ok(value) => return Ok(value),
                Err(FetchError::EndOfStream) => return Err(ReceiveError::EndOfStream),
                Err(FetchError::NoData) => {}
            }
            token.check()?;

            if self.is_closed() {
                // An append that passed its open check is still enqueueing.
                backoff.snooze();
                continue;
            }

            let (ch, waiter) = NotifyCh::leased();
            waiter.register(parker.unparker());
            if !self.register(ch.clone(), token, &parker) {
                continue;
            }

            // Pairs with the fence in `append`: either it sees our entry or
            // we see its value.
            fence(Ordering::SeqCst);
            match self.fetch() {
                Ok(value) => {
                    self.withdraw(&ch);
                    return Ok(value);
                }
                Err(FetchError::EndOfStream) => {
                    self.withdraw(&ch);
                    return Err(ReceiveError::EndOfStream);
                }
                Err(FetchError::NoData) => {}
            }

            loop {
                if waiter.is_closed() {
                    break;
                }
                if self.is_closed() {
                    self.withdraw(&ch);
                    break;
                }
                if let Err(why) = token.check() {
                    self.withdraw(&ch);
                    return Err(why.into());
                }
                token.park(&parker);
            }
        }
    }

    /// Closes the write side.
    ///
    /// Values already appended can still be fetched or received. Every
    /// parked receiver is woken. Returns `false` if the pipe was already
    /// closed.
    pub fn close(&self) -> bool {
        let prev = self.state.fetch_or(CLOSED, Ordering::SeqCst);
        if prev & CLOSED != 0 {
            return false;
        }

        fence(Ordering::SeqCst);
        let woken = self.registry.cancel_all();
        debug!(
            blocked = self.blocked_receivers(),
            woken,
            queued = self.queue.len(),
            "pipe closed"
        );
        true
    }

    /// Returns the approximate number of queued values.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no value is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns `true` once [`Pipe::close`] has succeeded.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) & CLOSED != 0
    }

    /// Returns `true` once a fetch or receive has reported end of stream.
    #[inline]
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Number of threads currently inside [`Pipe::receive`].
    pub fn blocked_receivers(&self) -> usize {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Number of registry entries, including those of receivers that have
    /// stopped waiting but not yet been discarded.
    pub fn pending_waiters(&self) -> usize {
        self.registry.len()
    }

    /// Puts `ch` in the registry, waiting for a free slot if necessary.
    ///
    /// Gives up and returns `false` when waiting is pointless because data
    /// arrived, the pipe closed, or the token fired.
    fn register(&self, mut ch: NotifyCh<()>, token: &CancelToken, parker: &Parker) -> bool {
        let backoff = Backoff::new();
        let mut saturated = false;

        loop {
            match self.registry.try_register(ch) {
                Ok(()) => return true,
                Err(rejected) => ch = rejected,
            }

            if !saturated {
                saturated = true;
                debug!(
                    capacity = self.registry.capacity(),
                    blocked = self.blocked_receivers(),
                    "waiter registry full"
                );
            }

            let freed = self.registry.evict_stale();
            self.settle();
            if freed {
                continue;
            }

            if !self.queue.is_empty() || self.is_closed() || token.is_cancelled() {
                return false;
            }
            if backoff.is_completed() {
                token.park_at_most(parker, self.poll);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Repairs a wake-up or close that may have missed an entry while the
    /// registry was being rotated.
    fn settle(&self) {
        fence(Ordering::SeqCst);
        if !self.queue.is_empty() {
            self.registry.wake_one();
        }
        if self.is_closed() {
            self.registry.cancel_all();
        }
    }

    /// Stops waiting on `ch`. A wake-up it already received is passed on.
    fn withdraw(&self, ch: &NotifyCh<()>) {
        if !ch.cancel() && ch.is_notified() {
            trace!("forwarding wake-up of withdrawn receiver");
            self.registry.wake_one();
        }
    }
}

impl<T> Default for Pipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("drained", &self.is_drained())
            .field("blocked_receivers", &self.blocked_receivers())
            .field("pending_waiters", &self.pending_waiters())
            .finish_non_exhaustive()
    }
}

/// Counts a thread inside `receive` for as long as it lives.
struct Blocked<'a>(&'a AtomicUsize);

impl<'a> Blocked<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count)
    }
}

impl Drop for Blocked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
