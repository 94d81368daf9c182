//! Single-acquire lease cells.
//!
//! A notification channel has two of these: one guarding the send side
//! (who gets to close it) and one guarding the receive side (who gets to wait
//! on it). Every transition is a compare-exchange, so each edge below is taken
//! by at most one thread.
//!
//! ```text
//!            acquire             close
//!   Idle ───────────────► Leased ───────────► Closed
//!    ▲                      │
//!    └──────────────────────┘
//!            release
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

/// State of one side of a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Lease {
    Idle = 0,
    Leased = 1,
    Closed = 2,
}

impl Lease {
    #[inline]
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Leased,
            _ => Self::Closed,
        }
    }
}

pub(crate) struct LeaseCell(AtomicU8);

impl LeaseCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(Lease::Idle as u8))
    }

    /// Starts out already leased, for a channel handed straight to its waiter.
    pub(crate) const fn leased() -> Self {
        Self(AtomicU8::new(Lease::Leased as u8))
    }

    #[inline]
    pub(crate) fn load(&self) -> Lease {
        Lease::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Idle -> Leased`. Returns `true` for the single winner.
    #[inline]
    pub(crate) fn acquire(&self) -> bool {
        self.transition(Lease::Idle, Lease::Leased)
    }

    /// `Leased -> Idle`.
    #[inline]
    pub(crate) fn release(&self) -> bool {
        self.transition(Lease::Leased, Lease::Idle)
    }

    /// `Leased -> Closed`. Terminal.
    #[inline]
    pub(crate) fn close(&self) -> bool {
        self.transition(Lease::Leased, Lease::Closed)
    }

    #[inline]
    fn transition(&self, from: Lease, to: Lease) -> bool {
        // Fast reject without a locked instruction
        if self.load() != from {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for LeaseCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.load().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn lifecycle() {
        let cell = LeaseCell::new();
        assert_eq!(cell.load(), Lease::Idle);

        assert!(!cell.close(), "cannot close an idle lease");
        assert!(!cell.release());

        assert!(cell.acquire());
        assert!(!cell.acquire(), "second acquire must fail");
        assert_eq!(cell.load(), Lease::Leased);

        assert!(cell.release());
        assert!(cell.acquire(), "released lease can be re-acquired");

        assert!(cell.close());
        assert_eq!(cell.load(), Lease::Closed);
        assert!(!cell.acquire());
        assert!(!cell.release());
        assert!(!cell.close());
    }

    #[test]
    fn starts_leased() {
        let cell = LeaseCell::leased();
        assert!(!cell.acquire());
        assert!(cell.release());
    }

    #[test]
    fn exactly_one_acquirer() {
        for _ in 0..200 {
            let cell = Arc::new(LeaseCell::new());
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let cell = Arc::clone(&cell);
                    let wins = Arc::clone(&wins);
                    thread::spawn(move || {
                        if cell.acquire() {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::SeqCst), 1);
        }
    }
}
