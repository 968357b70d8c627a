//! HDF5 file signature detection.

use crate::error::FormatError;

/// The 8-byte HDF5 magic signature: `\x89HDF\r\n\x1a\n`.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Superblocks past this offset are not searched for; a real HDF5 file with
/// a user block this large is not something we expect to meet.
const MAX_SEARCH: usize = 8 * 1024 * 1024;

/// Locate the HDF5 signature.
///
/// The format places it at offset 0 or at a power-of-two offset starting at
/// 512 (user-block sizes). Returns the signature's byte offset, or
/// [`FormatError::NotHdf5`] if none is found within the first
/// `min(file_size, 8 MiB)`.
pub fn find_signature(data: &[u8]) -> Result<usize, FormatError> {
    let limit = data.len().min(MAX_SEARCH);

    if limit >= 8 && data[..8] == HDF5_SIGNATURE {
        return Ok(0);
    }

    let mut offset = 512usize;
    while offset + 8 <= limit {
        if data[offset..offset + 8] == HDF5_SIGNATURE {
            return Ok(offset);
        }
        offset *= 2;
    }

    Err(FormatError::NotHdf5)
}
