//! Byte-source backends for the `oxhdf5` HDF5 reader.
//!
//! Everything above this crate works on plain byte slices; the backends here
//! only differ in how those bytes are obtained:
//!
//! - [`MemorySource`] — an owned in-memory buffer.
//! - [`FileSource`] — a file read into memory in one go.
//! - [`MmapSource`] — a read-only memory mapping, the recommended backend
//!   for large files since only the touched pages are ever faulted in.

mod mmap;

pub use mmap::MmapSource;

use std::fs;
use std::io;
use std::path::Path;

/// A read-only source of file bytes.
///
/// Implementations expose the whole file as one contiguous slice; callers
/// perform their own range checks against [`ByteSource::len`].
pub trait ByteSource: Send + Sync {
    /// The complete file contents.
    fn as_bytes(&self) -> &[u8];

    /// Total length in bytes.
    fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    /// Returns `true` if the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// An owned in-memory byte buffer.
///
/// Useful for tests and for callers that already hold the file contents.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap an existing buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A file slurped into memory with a single read.
///
/// Prefer [`MmapSource`] for large files; this backend exists for
/// environments where mapping is undesirable (network filesystems,
/// sanitizer runs).
#[derive(Debug)]
pub struct FileSource {
    data: Vec<u8>,
}

impl FileSource {
    /// Read the entire file at `path` into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read(path)?;
        Ok(Self { data })
    }
}

impl ByteSource for FileSource {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
