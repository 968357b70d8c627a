//! Error taxonomy for on-disk HDF5 decoding.
//!
//! Every variant that reports corruption carries the byte address (or
//! message type code) where the problem was detected, so failures can be
//! traced back into a hex dump of the file.

use core::fmt;

/// Errors produced while decoding on-disk HDF5 structures.
///
/// `Clone + PartialEq` so that lazy initializers can cache a failure and
/// re-raise it to every later caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// No HDF5 signature at any valid offset.
    NotHdf5,
    /// A structure declares a version this library does not read.
    UnsupportedVersion {
        /// Which structure carried the version.
        what: &'static str,
        /// The version found on disk.
        version: u8,
    },
    /// A superblock, object header, heap, or other addressed structure is
    /// malformed.
    CorruptHeader {
        /// File address of the structure.
        address: u64,
        /// What was wrong.
        detail: String,
    },
    /// An object header message body is malformed.
    CorruptMessage {
        /// On-disk message type code.
        msg_type: u16,
        /// What was wrong.
        detail: String,
    },
    /// A B-tree node (v1 or v2) is malformed.
    CorruptBTree {
        /// File address of the node.
        address: u64,
        /// What was wrong.
        detail: String,
    },
    /// A stored Jenkins lookup3 checksum does not match the node bytes.
    ChecksumMismatch {
        /// File address of the checksummed structure.
        address: u64,
    },
    /// A filter pipeline references a filter this library cannot run.
    UnsupportedFilter {
        /// The on-disk filter identifier.
        id: u16,
    },
    /// The data layout message uses a layout class or version outside the
    /// supported set (compact, contiguous, chunked v3).
    UnsupportedLayout,
    /// The datatype message uses a class or encoding outside the supported
    /// set.
    UnsupportedDatatype(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::NotHdf5 => {
                write!(f, "not an HDF5 file: signature not found")
            }
            FormatError::UnsupportedVersion { what, version } => {
                write!(f, "unsupported {what} version {version}")
            }
            FormatError::CorruptHeader { address, detail } => {
                write!(f, "corrupt structure at {address:#x}: {detail}")
            }
            FormatError::CorruptMessage { msg_type, detail } => {
                write!(f, "corrupt message (type {msg_type:#06x}): {detail}")
            }
            FormatError::CorruptBTree { address, detail } => {
                write!(f, "corrupt B-tree node at {address:#x}: {detail}")
            }
            FormatError::ChecksumMismatch { address } => {
                write!(f, "checksum mismatch at {address:#x}")
            }
            FormatError::UnsupportedFilter { id } => {
                write!(f, "unsupported filter id {id}")
            }
            FormatError::UnsupportedLayout => {
                write!(f, "unsupported data layout")
            }
            FormatError::UnsupportedDatatype(detail) => {
                write!(f, "unsupported datatype: {detail}")
            }
        }
    }
}

impl std::error::Error for FormatError {}
