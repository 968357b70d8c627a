//! Bounds-checked little-endian byte cursor.
//!
//! Every decoder in this crate walks raw bytes through a [`Cursor`]. The
//! cursor carries a [`Site`] describing *what* is being decoded, so a short
//! read or a bad field value turns into the right [`FormatError`] variant —
//! with the detecting address — without per-call-site error mapping.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// What a cursor is currently decoding; determines the error kind reported
/// for truncation or malformed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// The superblock found at the given signature offset.
    Superblock { address: u64 },
    /// An object header (or one of its continuation blocks).
    Header { address: u64 },
    /// A header message body, identified by its on-disk type code.
    Message { msg_type: u16 },
    /// A B-tree node, v1 or v2.
    BTree { address: u64 },
    /// A heap structure (local, global, or fractal).
    Heap { address: u64 },
}

impl Site {
    /// Build the corruption error matching this site.
    pub fn corrupt(self, detail: impl Into<String>) -> FormatError {
        let detail = detail.into();
        match self {
            Site::Superblock { address } | Site::Header { address } => {
                FormatError::CorruptHeader { address, detail }
            }
            Site::Message { msg_type } => FormatError::CorruptMessage { msg_type, detail },
            Site::BTree { address } => FormatError::CorruptBTree { address, detail },
            Site::Heap { address } => FormatError::CorruptHeader {
                address,
                detail: format!("heap: {detail}"),
            },
        }
    }
}

/// A forward-only reader over a byte slice with checked access.
#[derive(Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    site: Site,
}

impl<'a> Cursor<'a> {
    /// Cursor over the whole of `data`.
    pub fn new(data: &'a [u8], site: Site) -> Self {
        Self { data, pos: 0, site }
    }

    /// Cursor over `data` starting at byte `pos`.
    ///
    /// Fails if `pos` is already past the end.
    pub fn at(data: &'a [u8], pos: usize, site: Site) -> Result<Self, FormatError> {
        if pos > data.len() {
            return Err(site.corrupt(format!(
                "start offset {pos} past end of data ({} bytes)",
                data.len()
            )));
        }
        Ok(Self { data, pos, site })
    }

    /// Current absolute position within the underlying slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left before the end of the slice.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The decoding site, for constructing related errors.
    pub fn site(&self) -> Site {
        self.site
    }

    /// Build a corruption error for this site.
    pub fn corrupt(&self, detail: impl Into<String>) -> FormatError {
        self.site.corrupt(detail)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        match self.pos.checked_add(n) {
            Some(end) if end <= self.data.len() => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            _ => Err(self.site.corrupt(format!(
                "truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            ))),
        }
    }

    /// Read `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        self.take(n)
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.take(n).map(|_| ())
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    /// Read a little-endian `u32`.
    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    /// Read a little-endian `u64`.
    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Read an unsigned little-endian integer of `width` bytes (1, 2, 4, or 8),
    /// widened to `u64`.
    pub fn uint(&mut self, width: u8) -> Result<u64, FormatError> {
        let slice = self.take(width as usize)?;
        match width {
            1 => Ok(slice[0] as u64),
            2 => Ok(LittleEndian::read_u16(slice) as u64),
            4 => Ok(LittleEndian::read_u32(slice) as u64),
            8 => Ok(LittleEndian::read_u64(slice)),
            other => Err(self.site.corrupt(format!("invalid field width {other}"))),
        }
    }

    /// Read a little-endian unsigned integer of any width from 1 to 8
    /// bytes (used by variable-width fields in B-tree v2 nodes and heap
    /// ids).
    pub fn var_uint(&mut self, width: usize) -> Result<u64, FormatError> {
        if width == 0 || width > 8 {
            return Err(self.site.corrupt(format!("invalid variable field width {width}")));
        }
        let slice = self.take(width)?;
        let mut value = 0u64;
        for (i, &byte) in slice.iter().enumerate() {
            value |= u64::from(byte) << (8 * i);
        }
        Ok(value)
    }

    /// Read a superblock-width address; all-`0xFF` (the `UNDEFINED`
    /// sentinel) decodes to `None`.
    pub fn addr(&mut self, offset_size: u8) -> Result<Option<u64>, FormatError> {
        let slice = self.take(offset_size as usize)?;
        if slice.iter().all(|&b| b == 0xFF) {
            return Ok(None);
        }
        Ok(Some(match offset_size {
            2 => LittleEndian::read_u16(slice) as u64,
            4 => LittleEndian::read_u32(slice) as u64,
            8 => LittleEndian::read_u64(slice),
            other => {
                return Err(self.site.corrupt(format!("invalid offset size {other}")));
            }
        }))
    }

    /// Read a superblock-width length.
    pub fn length(&mut self, length_size: u8) -> Result<u64, FormatError> {
        self.uint(length_size)
    }

    /// Read a NUL-terminated string; consumes the terminator.
    pub fn cstr(&mut self) -> Result<String, FormatError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.site.corrupt("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}
