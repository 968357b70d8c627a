//! The file channel: checked byte access over a closeable backing source.
//!
//! The channel owns the file's [`ByteSource`] behind an `RwLock<Option<..>>`
//! so that [`FileChannel::close`] can release the mapping while node and
//! dataset handles still hold their `Arc`s; every later access observes the
//! closed state and fails with [`Error::Closed`]. Borrowed views are backed
//! by the read guard, so no view can outlive the mapping it points into.

use std::ops::Deref;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use oxhdf5_format::signature::find_signature;
use oxhdf5_format::Superblock;
use oxhdf5_io::ByteSource;

use crate::error::Error;

/// A borrowed view of file bytes, valid while it is held.
///
/// Dereferences to `&[u8]`. Holding one blocks [`FileChannel::close`], which
/// is what makes the borrow safe.
pub struct FileBytes<'a> {
    guard: RwLockReadGuard<'a, Option<Box<dyn ByteSource>>>,
    start: usize,
    end: usize,
}

impl std::fmt::Debug for FileBytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBytes")
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl Deref for FileBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.guard.as_deref() {
            Some(source) => &source.as_bytes()[self.start..self.end],
            // Unreachable: construction checks for the open state and the
            // guard pins it; return an empty slice rather than panic.
            None => &[],
        }
    }
}

/// Owns the open file and its parsed superblock.
pub struct FileChannel {
    source: RwLock<Option<Box<dyn ByteSource>>>,
    len: u64,
    superblock: Superblock,
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("len", &self.len)
            .finish()
    }
}

impl FileChannel {
    /// Take ownership of a byte source, locate the signature, and parse the
    /// superblock.
    pub fn open(source: Box<dyn ByteSource>) -> Result<FileChannel, Error> {
        let len = source.len();
        let bytes = source.as_bytes();
        let signature_offset = find_signature(bytes)?;
        let superblock = Superblock::parse(bytes, signature_offset)?;

        log::debug!(
            "opened HDF5 source: {len} bytes, superblock v{} at {signature_offset:#x}",
            superblock.version
        );

        Ok(FileChannel {
            source: RwLock::new(Some(source)),
            len,
            superblock,
        })
    }

    /// The parsed superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Total file length in bytes.
    pub fn size(&self) -> u64 {
        self.len
    }

    /// Release the backing source. Every later access through this channel
    /// (from any node or dataset handle) fails with [`Error::Closed`].
    pub fn close(&self) {
        let mut guard = self
            .source
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            log::debug!("closed HDF5 source");
        }
    }

    /// Has [`FileChannel::close`] been called?
    pub fn is_closed(&self) -> bool {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// A borrowed view of the whole file.
    pub fn bytes(&self) -> Result<FileBytes<'_>, Error> {
        self.map(0, self.len)
    }

    /// A borrowed view of `len` bytes at `offset`, bounds-checked.
    pub fn map(&self, offset: u64, len: u64) -> Result<FileBytes<'_>, Error> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::short_read(offset, len, self.len))?;
        if end > self.len {
            return Err(Error::short_read(offset, len, self.len));
        }
        let guard = self.source.read().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            return Err(Error::Closed);
        }
        Ok(FileBytes {
            guard,
            start: offset as usize,
            end: end as usize,
        })
    }

    /// Copy `len` bytes at `offset` out of the file.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        Ok(self.map(offset, len as u64)?.to_vec())
    }

    /// Resolve a file-relative address against the superblock base.
    pub fn resolve(&self, address: u64) -> Result<u64, Error> {
        self.superblock
            .base_address
            .checked_add(address)
            .ok_or_else(|| {
                Error::Format(oxhdf5_format::FormatError::CorruptHeader {
                    address,
                    detail: "address overflows past the superblock base".into(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxhdf5_format::checksum::jenkins_lookup3;
    use oxhdf5_format::signature::HDF5_SIGNATURE;
    use oxhdf5_io::MemorySource;

    /// A minimal v2 superblock followed by zero padding.
    fn minimal_file(total: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&HDF5_SIGNATURE);
        buf.push(2); // version
        buf.push(8); // offset size
        buf.push(8); // length size
        buf.push(0); // flags
        buf.extend_from_slice(&0u64.to_le_bytes()); // base
        buf.extend_from_slice(&u64::MAX.to_le_bytes()); // extension
        buf.extend_from_slice(&(total as u64).to_le_bytes()); // eof
        buf.extend_from_slice(&48u64.to_le_bytes()); // root header
        let checksum = jenkins_lookup3(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.resize(total, 0);
        buf
    }

    fn channel() -> FileChannel {
        FileChannel::open(Box::new(MemorySource::new(minimal_file(256)))).unwrap()
    }

    #[test]
    fn parses_superblock() {
        let ch = channel();
        assert_eq!(ch.superblock().version, 2);
        assert_eq!(ch.size(), 256);
        assert!(!ch.is_closed());
    }

    #[test]
    fn rejects_non_hdf5() {
        let err = FileChannel::open(Box::new(MemorySource::new(vec![0, 0, 0]))).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(oxhdf5_format::FormatError::NotHdf5)
        ));
    }

    #[test]
    fn read_at_copies() {
        let ch = channel();
        let bytes = ch.read_at(0, 8).unwrap();
        assert_eq!(bytes, HDF5_SIGNATURE);
    }

    #[test]
    fn map_view_derefs() {
        let ch = channel();
        let view = ch.map(1, 3).unwrap();
        assert_eq!(&*view, &HDF5_SIGNATURE[1..4]);
    }

    #[test]
    fn read_past_eof_is_io_error() {
        let ch = channel();
        let err = ch.read_at(250, 100).unwrap_err();
        assert!(matches!(err, Error::Io { offset: 250, .. }));
    }

    #[test]
    fn offset_overflow_is_io_error() {
        let ch = channel();
        assert!(matches!(
            ch.map(u64::MAX, 2).unwrap_err(),
            Error::Io { .. }
        ));
    }

    #[test]
    fn close_invalidates_reads() {
        let ch = channel();
        ch.close();
        assert!(ch.is_closed());
        assert!(matches!(ch.read_at(0, 4).unwrap_err(), Error::Closed));
        assert!(matches!(ch.bytes().unwrap_err(), Error::Closed));
    }

    #[test]
    fn close_twice_is_fine() {
        let ch = channel();
        ch.close();
        ch.close();
        assert!(ch.is_closed());
    }

    #[test]
    fn resolve_adds_base() {
        let ch = channel();
        assert_eq!(ch.resolve(96).unwrap(), 96);
    }
}
