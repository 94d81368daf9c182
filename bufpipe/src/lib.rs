//! An unbounded, closable multi-producer multi-consumer pipe.
//!
//! [`Pipe`] sits on top of [`bufpipe_queue::Queue`], a lock-free FIFO, and
//! adds what a stream needs: blocking reads with cancellation, a write side
//! that can be closed, and end-of-stream once the remaining values are
//! consumed.
//!
//! ```text
//!            append ─┐                         ┌─► fetch   (non-blocking)
//!  producers ────────┼──► Queue<T> ──► ... ────┤
//!            append ─┘        │                └─► receive (blocks, parks on NotifyCh)
//!                             │                        ▲
//!                             └── wake one ── registry ┘
//! ```
//!
//! # Example
//!
//! ```
//! use bufpipe::{CancelToken, Pipe, ReceiveError};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let pipe = Arc::new(Pipe::new());
//!
//! let consumer = {
//!     let pipe = Arc::clone(&pipe);
//!     thread::spawn(move || {
//!         let token = CancelToken::new();
//!         let mut sum = 0u64;
//!         loop {
//!             match pipe.receive(&token) {
//!                 Ok(v) => sum += v,
//!                 Err(ReceiveError::EndOfStream) => return sum,
//!                 Err(e) => panic!("{e}"),
//!             }
//!         }
//!     })
//! };
//!
//! for i in 1..=100 {
//!     pipe.append(i).unwrap();
//! }
//! pipe.close();
//!
//! assert_eq!(consumer.join().unwrap(), 5050);
//! ```
//!
//! # States
//!
//! ```text
//! Open ──close()──► Closed ──queue observed empty──► Drained
//! ```
//!
//! - **Open**: appends succeed; an empty fetch is [`FetchError::NoData`].
//! - **Closed**: appends fail with [`ClosedOnWrite`]; queued values are
//!   still delivered.
//! - **Drained**: every fetch and receive reports end of stream.
//!
//! An append that passed its open check before a concurrent close always
//! lands before end of stream is reported.
//!
//! # Waking Receivers
//!
//! A receiver that finds the pipe empty registers a one-shot
//! [`NotifyCh`](bufpipe_notify::NotifyCh) and parks. Each append notifies at
//! most one registered receiver; close cancels all of them.
//!
//! ```text
//! Receiver:                        Appender:
//! ─────────────────────            ─────────────────────
//! push(registry, ch)               enqueue(value)
//! [SeqCst fence]                   [SeqCst fence]
//! fetch() -> NoData                pop(registry) -> ch
//! park()                           notify(ch)
//! ```
//!
//! Either the appender finds the channel or the receiver finds the value.
//! A receiver that was notified but returns without parking (it found a
//! value, or its token fired) passes the wake-up on to the next receiver.
//!
//! # Registry Capacity
//!
//! The registry is bounded ([`Config::registry_capacity`], default 16).
//! Receivers that find it full keep polling the pipe at
//! [`Config::registry_poll`] intervals until a slot frees up, instead of
//! parking indefinitely.
//!
//! # Byte Streams
//!
//! [`byte_pipe`] returns a [`ByteWriter`] / [`ByteReader`] pair
//! implementing [`std::io::Write`] and [`std::io::Read`] over a pipe of
//! byte blocks.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bytes;
mod config;
mod error;
mod pipe;
mod registry;

pub use bufpipe_notify::{CancelToken, Interrupted};
pub use bytes::{
    ByteReader, ByteWriter, DEFAULT_READ_FROM_CHUNK, byte_pipe, byte_pipe_with_config,
};
pub use config::{Config, DEFAULT_REGISTRY_CAPACITY, DEFAULT_REGISTRY_POLL};
pub use error::{ClosedOnWrite, FetchError, ReceiveError};
pub use pipe::Pipe;
