//! Common error types for megapi-adaptor.
//!
//! This module provides a centralized Error enum using thiserror. Errors that
//! happen inside the background writer are not returned from any call; they
//! are recorded as [`WriteFailure`]s instead.

use std::io;
use thiserror::Error;

/// Main error type for adaptor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The serial port could not be opened (bad path, device busy,
    /// permissions). The adaptor stays unconnected and may be retried.
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Closing the port failed during finalize. The writer has already
    /// stopped when this is returned.
    #[error("failed to close {device}: {source}")]
    Close {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Operation requires a connected adaptor.
    #[error("adaptor is not connected")]
    NotConnected,

    /// The writer has exited and no longer accepts frames.
    #[error("writer has stopped")]
    WriterStopped,

    /// The hand-off slot is occupied.
    #[error("writer is busy")]
    Busy,

    /// The writer task panicked or was aborted.
    #[error("writer task failed: {0}")]
    WriterTask(#[from] tokio::task::JoinError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A write to the board that failed inside the writer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Length of the frame that was being written
    pub len: usize,
    /// Kind of the underlying I/O error
    pub kind: io::ErrorKind,
    /// Rendered error message
    pub message: String,
}

impl WriteFailure {
    pub(crate) fn new(len: usize, error: &io::Error) -> Self {
        Self {
            len,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "write of {} bytes failed: {}", self.len, self.message)
    }
}
