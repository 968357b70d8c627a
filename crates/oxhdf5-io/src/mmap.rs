//! Read-only memory-mapped byte source.

use std::fs;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::ByteSource;

/// A read-only memory mapping of a file.
///
/// Pages are faulted in on demand, so opening a multi-gigabyte file costs
/// almost nothing until its data is actually touched.
pub struct MmapSource {
    _file: fs::File,
    mmap: Mmap,
}

impl MmapSource {
    /// Open `path` and map it read-only.
    ///
    /// The mapping assumes the file is not truncated or rewritten by another
    /// process while it is held; HDF5 tooling conventions make that the
    /// caller's responsibility.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        // SAFETY: read-only mapping of a file we just opened; the caller
        // guarantees no concurrent external truncation.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Hint to the kernel that `len` bytes starting at `offset` will be
    /// needed soon (`madvise(MADV_WILLNEED)`). No-op off Unix.
    #[cfg(unix)]
    pub fn advise_willneed(&self, offset: usize, len: usize) {
        let clamped = len.min(self.mmap.len().saturating_sub(offset));
        if clamped == 0 {
            return;
        }
        // SAFETY: the advised range lies inside our valid mapping.
        unsafe {
            let ptr = self.mmap.as_ptr().add(offset);
            libc::madvise(ptr as *mut libc::c_void, clamped, libc::MADV_WILLNEED);
        }
    }

    /// No-op on non-Unix platforms.
    #[cfg(not(unix))]
    pub fn advise_willneed(&self, _offset: usize, _len: usize) {}
}

impl ByteSource for MmapSource {
    fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}
