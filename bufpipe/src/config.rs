use std::time::Duration;

/// Default number of receivers that can be parked on a pipe at once.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 16;

/// Default sleep between registration attempts when the registry is full.
pub const DEFAULT_REGISTRY_POLL: Duration = Duration::from_millis(1);

/// Construction-time settings for a [`Pipe`](crate::Pipe).
///
/// # Example
///
/// ```
/// use bufpipe::{Config, Pipe};
/// use std::time::Duration;
///
/// let pipe: Pipe<u64> = Pipe::with_config(
///     Config::default()
///         .registry_capacity(64)
///         .registry_poll(Duration::from_micros(200)),
/// );
/// assert!(pipe.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub(crate) registry_capacity: usize,
    pub(crate) registry_poll: Duration,
}

impl Config {
    /// Sets how many blocked receivers can wait for a wake-up at once.
    ///
    /// Receivers beyond this number poll instead of parking indefinitely
    /// until a slot frees up.
    ///
    /// While the registry is full, a registered receiver may be woken
    /// without a matching append. Stale entries are evicted with a
    /// notification so their slots free up. Such a receiver finds nothing,
    /// registers again and goes back to waiting.
    #[must_use]
    pub fn registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Sets how long a receiver that found the registry full sleeps before
    /// retrying.
    #[must_use]
    pub fn registry_poll(mut self, poll: Duration) -> Self {
        self.registry_poll = poll;
        self
    }

    /// Returns the configured registry capacity.
    pub fn capacity(&self) -> usize {
        self.registry_capacity
    }

    /// Returns the configured registry poll interval.
    pub fn poll(&self) -> Duration {
        self.registry_poll
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            registry_poll: DEFAULT_REGISTRY_POLL,
        }
    }
}
