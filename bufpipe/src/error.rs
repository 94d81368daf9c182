use core::fmt;

use bufpipe_notify::Interrupted;

/// Error returned by [`Pipe::append`](crate::Pipe::append) after the pipe
/// was closed.
///
/// The rejected value is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedOnWrite<T>(pub T);

impl<T> ClosedOnWrite<T> {
    /// Returns the value that could not be appended.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for ClosedOnWrite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "append on closed pipe")
    }
}

impl<T: fmt::Debug> std::error::Error for ClosedOnWrite<T> {}

/// Error returned by [`Pipe::fetch`](crate::Pipe::fetch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// The pipe is empty but still open.
    ///
    /// A value may arrive later.
    NoData,

    /// The pipe is closed and every value has been consumed.
    EndOfStream,
}

impl FetchError {
    /// Returns `true` if this error is the `NoData` variant.
    pub fn is_no_data(&self) -> bool {
        matches!(self, FetchError::NoData)
    }

    /// Returns `true` if this error is the `EndOfStream` variant.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FetchError::EndOfStream)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NoData => write!(f, "no data available"),
            FetchError::EndOfStream => write!(f, "end of stream"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Error returned by [`Pipe::receive`](crate::Pipe::receive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// The pipe is closed and every value has been consumed.
    EndOfStream,

    /// The token was cancelled before a value arrived.
    Cancelled,

    /// The token's deadline passed before a value arrived.
    DeadlineExceeded,
}

impl ReceiveError {
    /// Returns `true` if this error is the `EndOfStream` variant.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReceiveError::EndOfStream)
    }

    /// Returns `true` if the receive was ended by its token rather than the pipe.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ReceiveError::Cancelled | ReceiveError::DeadlineExceeded)
    }
}

impl From<Interrupted> for ReceiveError {
    fn from(why: Interrupted) -> Self {
        match why {
            Interrupted::Cancelled => ReceiveError::Cancelled,
            Interrupted::DeadlineExceeded => ReceiveError::DeadlineExceeded,
        }
    }
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::EndOfStream => write!(f, "end of stream"),
            ReceiveError::Cancelled => write!(f, "receive cancelled"),
            ReceiveError::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl std::error::Error for ReceiveError {}
