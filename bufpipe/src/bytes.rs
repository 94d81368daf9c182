//! Byte-stream adapter over a [`Pipe`] of byte blocks.
//!
//! [`ByteWriter`] implements [`io::Write`] by copying each buffer into a new
//! block; [`ByteWriter::append`] hands a block over without copying.
//! [`ByteReader`] implements [`io::Read`] by draining blocks in order and
//! keeping whatever did not fit for the next call.
//! [`ByteReader::fetch_block`] and [`ByteReader::receive_block`] take whole
//! blocks instead.
//!
//! ```
//! use bufpipe::byte_pipe;
//! use std::io::{Read, Write};
//!
//! let (mut writer, mut reader) = byte_pipe();
//! writer.write_all(b"hello ").unwrap();
//! writer.append(b"world".to_vec()).unwrap();
//! writer.close();
//!
//! let mut out = String::new();
//! reader.read_to_string(&mut out).unwrap();
//! assert_eq!(out, "hello world");
//! assert!(reader.is_end_of_stream());
//! ```

use core::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bufpipe_notify::CancelToken;
use tracing::debug;

use crate::config::Config;
use crate::error::{ClosedOnWrite, FetchError, ReceiveError};
use crate::pipe::Pipe;

/// Default block size used by [`ByteWriter::read_from`]: 1 MiB.
pub const DEFAULT_READ_FROM_CHUNK: usize = 1024 * 1024;

/// Creates a connected byte writer and reader over a fresh pipe.
pub fn byte_pipe() -> (ByteWriter, ByteReader) {
    byte_pipe_with_config(Config::default())
}

/// Like [`byte_pipe`], with a custom pipe configuration.
///
/// # Panics
///
/// Panics if the registry capacity is 0.
pub fn byte_pipe_with_config(config: Config) -> (ByteWriter, ByteReader) {
    let pipe = Arc::new(Pipe::with_config(config));
    (
        ByteWriter {
            pipe: Arc::clone(&pipe),
            chunk_size: DEFAULT_READ_FROM_CHUNK,
        },
        ByteReader {
            pipe,
            block: Vec::new(),
            offset: 0,
            token: CancelToken::new(),
        },
    )
}

/// The writing half of a byte pipe.
///
/// Clones share the pipe, so several threads can write blocks concurrently.
/// Blocks from different writers interleave whole; bytes within a block
/// are never split.
#[derive(Clone)]
pub struct ByteWriter {
    pipe: Arc<Pipe<Vec<u8>>>,
    chunk_size: usize,
}

impl ByteWriter {
    /// Queues `block` as is.
    ///
    /// # Errors
    ///
    /// Returns the block if the pipe was closed.
    pub fn append(&self, block: Vec<u8>) -> Result<usize, ClosedOnWrite<Vec<u8>>> {
        self.pipe.append(block)
    }

    /// Copies `source` into the pipe until it reports end of data.
    ///
    /// Data is split into blocks of [`ByteWriter::chunk_size`] bytes; the
    /// last block may be shorter. Reads interrupted by a signal are retried.
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Any read error from `source`, or [`io::ErrorKind::BrokenPipe`] if the
    /// pipe was closed. Bytes appended before the error stay in the pipe.
    pub fn read_from<R: Read + ?Sized>(&self, source: &mut R) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            let mut block = vec![0u8; self.chunk_size];
            let filled = fill(source, &mut block)?;
            if filled == 0 {
                break;
            }
            block.truncate(filled);
            self.pipe.append(block).map_err(closed_on_write)?;
            total += filled as u64;
            if filled < self.chunk_size {
                break;
            }
        }
        debug!(bytes = total, "read_from complete");
        Ok(total)
    }

    /// Block size used by [`ByteWriter::read_from`].
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Sets the block size used by [`ByteWriter::read_from`]. `0` restores
    /// [`DEFAULT_READ_FROM_CHUNK`].
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = if size == 0 {
            DEFAULT_READ_FROM_CHUNK
        } else {
            size
        };
    }

    /// Closes the pipe for every writer. Readers see end of stream once the
    /// queued bytes are consumed.
    pub fn close(&self) -> bool {
        self.pipe.close()
    }

    /// Returns `true` if the pipe was closed.
    pub fn is_closed(&self) -> bool {
        self.pipe.is_closed()
    }
}

impl Write for ByteWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.pipe.append(buf.to_vec()).map_err(closed_on_write)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ByteWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteWriter")
            .field("chunk_size", &self.chunk_size)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The reading half of a byte pipe.
pub struct ByteReader {
    pipe: Arc<Pipe<Vec<u8>>>,
    block: Vec<u8>,
    offset: usize,
    token: CancelToken,
}

impl ByteReader {
    /// Makes blocking reads give up when `token` fires.
    ///
    /// A cancelled read fails with [`io::ErrorKind::Other`], an expired one
    /// with [`io::ErrorKind::TimedOut`].
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// Returns `true` once the pipe is closed and every byte has been read.
    pub fn is_end_of_stream(&self) -> bool {
        self.offset == self.block.len() && self.pipe.is_drained()
    }

    /// Takes the next block without copying.
    ///
    /// Bytes left over from a partial [`Read::read`] come first, as one
    /// block; after that whole blocks are returned as they were appended.
    /// Empty blocks are skipped.
    ///
    /// # Errors
    ///
    /// [`FetchError::NoData`] if nothing is available right now,
    /// [`FetchError::EndOfStream`] once the pipe is closed and drained.
    pub fn fetch_block(&mut self) -> Result<Vec<u8>, FetchError> {
        if let Some(rest) = self.take_buffered() {
            return Ok(rest);
        }
        loop {
            let data = self.pipe.fetch()?;
            if !data.is_empty() {
                return Ok(data);
            }
        }
    }

    /// Blocking form of [`ByteReader::fetch_block`].
    ///
    /// Waits on `token` rather than the reader's own token.
    ///
    /// # Errors
    ///
    /// [`ReceiveError::EndOfStream`] once the pipe is closed and drained, or
    /// the reason `token` fired.
    pub fn receive_block(&mut self, token: &CancelToken) -> Result<Vec<u8>, ReceiveError> {
        if let Some(rest) = self.take_buffered() {
            return Ok(rest);
        }
        loop {
            let data = self.pipe.receive(token)?;
            if !data.is_empty() {
                return Ok(data);
            }
        }
    }

    fn take_buffered(&mut self) -> Option<Vec<u8>> {
        if self.offset == self.block.len() {
            return None;
        }
        let mut rest = std::mem::take(&mut self.block);
        rest.drain(..self.offset);
        self.offset = 0;
        Some(rest)
    }

    /// Loads the next non-empty block. `Ok(false)` means end of stream or,
    /// when `block` is `false`, that nothing is available right now.
    fn refill(&mut self, block: bool) -> io::Result<bool> {
        loop {
            let next = if block {
                self.pipe.receive(&self.token)
            } else {
                match self.pipe.fetch() {
                    Ok(data) => Ok(data),
                    Err(FetchError::NoData) => return Ok(false),
                    Err(FetchError::EndOfStream) => Err(ReceiveError::EndOfStream),
                }
            };
            match next {
                Ok(data) if data.is_empty() => continue,
                Ok(data) => {
                    self.block = data;
                    self.offset = 0;
                    return Ok(true);
                }
                Err(ReceiveError::EndOfStream) => return Ok(false),
                Err(e) => return Err(interrupted(e)),
            }
        }
    }
}

impl Read for ByteReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            if self.offset == self.block.len() && !self.refill(n == 0)? {
                break;
            }
            let rest = &self.block[self.offset..];
            let take = rest.len().min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&rest[..take]);
            self.offset += take;
            n += take;
        }
        Ok(n)
    }
}

impl fmt::Debug for ByteReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteReader")
            .field("buffered", &(self.block.len() - self.offset))
            .field("end_of_stream", &self.is_end_of_stream())
            .finish_non_exhaustive()
    }
}

/// Reads until `buf` is full or `source` reports end of data.
fn fill<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn closed_on_write(_: ClosedOnWrite<Vec<u8>>) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "append on closed pipe")
}

fn interrupted(e: ReceiveError) -> io::Error {
    let kind = match e {
        ReceiveError::DeadlineExceeded => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, e)
}
