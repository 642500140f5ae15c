//! Error types for feedstoredb

use std::fmt;
use std::io;

/// Result type alias for feedstoredb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
///
/// An empty slot is never an error: absence is reported as `Ok(None)`.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Stored record could not be decoded (bad magic, truncated payload, invalid field)
    Corrupt(String),

    /// Encoded record too large (max 64 MiB)
    RecordTooLarge(usize),

    /// Storage is closed or the cache worker has shut down
    Closed,

    /// Storage adapter panicked while running an operation
    Panicked(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Corrupt(msg) => write!(f, "Corrupt record: {}", msg),
            Error::RecordTooLarge(size) => {
                write!(f, "Record too large: {} bytes (max 64 MiB)", size)
            }
            Error::Closed => write!(f, "Store is closed"),
            Error::Panicked(msg) => write!(f, "Storage panicked: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => Error::Corrupt("truncated payload".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::Corrupt(format!("{:?} at {} bytes from end", e.code, e.input.len()))
            }
        }
    }
}
