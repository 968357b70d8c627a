//! Errors surfaced by the reading API.

use std::fmt;
use std::sync::Arc;

use oxhdf5_format::FormatError;

/// Errors produced while opening, navigating, or reading an HDF5 file.
///
/// `Clone` so lazy initializers can cache a failure and re-raise it to
/// every later caller; the I/O cause sits behind an `Arc` for that reason.
#[derive(Debug, Clone)]
pub enum Error {
    /// An I/O failure or out-of-range read at the given file offset.
    Io {
        /// File offset of the failed access.
        offset: u64,
        /// Underlying cause.
        source: Arc<std::io::Error>,
    },
    /// The on-disk bytes are malformed; see [`FormatError`].
    Format(FormatError),
    /// The file handle was closed; the node or dataset handle is dead.
    Closed,
    /// No node exists at the given path.
    NotFound(String),
}

impl Error {
    /// An out-of-range read: `len` bytes at `offset` in a file of
    /// `available` bytes.
    pub(crate) fn short_read(offset: u64, len: u64, available: u64) -> Error {
        Error::Io {
            offset,
            source: Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("need {len} bytes at offset {offset}, file has {available}"),
            )),
        }
    }

    /// Wrap an I/O error detected at `offset`.
    pub(crate) fn io_at(offset: u64, source: std::io::Error) -> Error {
        Error::Io {
            offset,
            source: Arc::new(source),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { offset, source } => {
                write!(f, "I/O error at offset {offset:#x}: {source}")
            }
            Error::Format(e) => write!(f, "{e}"),
            Error::Closed => write!(f, "file is closed"),
            Error::NotFound(path) => write!(f, "no such node: {path}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source.as_ref()),
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}
