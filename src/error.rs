//! Error types for the host database thin client.

use std::io;
use thiserror::Error;

/// Result type alias for host database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for host database thin client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while draining a local stream source.
    ///
    /// After this error the remote object may hold a partial value; callers
    /// should discard the locator and reacquire the row.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested conversion is not defined for the column's content.
    #[error("Data type mismatch: {message}")]
    DataTypeMismatch { message: String },

    /// Network or host failure reported by the remote locator service.
    #[error("Remote I/O error: {message}")]
    RemoteIo { message: String },

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed data in a fetched row.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Coded character set with no registered converter.
    #[error("Unsupported CCSID: {ccsid}")]
    UnsupportedCcsid { ccsid: u16 },

    /// Column index out of bounds.
    #[error("Column index {index} out of bounds (columns: {count})")]
    ColumnIndexOutOfBounds { index: usize, count: usize },

    /// The cursor is not positioned on a row.
    #[error("Cursor is not positioned on a row")]
    CursorNotPositioned,
}

impl Error {
    /// Create a data type mismatch error.
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::DataTypeMismatch {
            message: message.into(),
        }
    }

    /// Create a remote I/O error.
    pub fn remote_io(message: impl Into<String>) -> Self {
        Self::RemoteIo {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
