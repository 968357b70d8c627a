//! Local heap decoding (`HEAP`), the name store for v1 symbol tables.

use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::superblock::Superblock;

/// A parsed local heap header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeap {
    /// File address the header was parsed from.
    pub address: u64,
    /// Length of the data segment in bytes.
    pub data_segment_size: u64,
    /// File address of the data segment.
    pub data_segment_address: u64,
}

impl LocalHeap {
    /// Parse the heap header at `address`.
    pub fn parse(
        data: &[u8],
        address: u64,
        superblock: &Superblock,
    ) -> Result<LocalHeap, FormatError> {
        let site = Site::Heap { address };
        let mut cur = Cursor::at(data, address as usize, site)?;

        if cur.bytes(4)? != b"HEAP" {
            return Err(site.corrupt("bad local heap signature"));
        }
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "local heap",
                version,
            });
        }
        cur.skip(3)?; // reserved

        let data_segment_size = cur.length(superblock.length_size)?;
        cur.length(superblock.length_size)?; // free list head offset
        let data_segment_address = cur
            .addr(superblock.offset_size)?
            .ok_or_else(|| cur.corrupt("undefined data segment address"))?;

        Ok(LocalHeap {
            address,
            data_segment_size,
            data_segment_address,
        })
    }

    /// Read the NUL-terminated string at `offset` within the data segment.
    pub fn string_at(&self, data: &[u8], offset: u64) -> Result<String, FormatError> {
        let site = Site::Heap {
            address: self.address,
        };
        let start = self
            .data_segment_address
            .checked_add(offset)
            .ok_or_else(|| site.corrupt("string offset overflows"))?;
        let end = self
            .data_segment_address
            .checked_add(self.data_segment_size)
            .ok_or_else(|| site.corrupt("data segment end overflows"))?;
        if offset >= self.data_segment_size {
            return Err(site.corrupt(format!(
                "string offset {offset} outside data segment of {} bytes",
                self.data_segment_size
            )));
        }
        let end = (end as usize).min(data.len());
        let mut cur = Cursor::at(&data[..end], start as usize, site)?;
        cur.cstr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sb() -> Superblock {
        Superblock {
            version: 0,
            offset_size: 8,
            length_size: 8,
            base_address: 0,
            eof_address: 1 << 20,
            root_group_address: 96,
            group_leaf_node_k: Some(4),
            group_internal_node_k: Some(16),
            indexed_storage_internal_node_k: None,
        }
    }

    fn build_heap(segment_at: usize, names: &[&str]) -> Vec<u8> {
        let mut segment = Vec::new();
        for name in names {
            segment.extend_from_slice(name.as_bytes());
            segment.push(0);
        }

        let mut file = vec![0u8; segment_at + segment.len() + 32];
        let mut header = Vec::new();
        header.extend_from_slice(b"HEAP");
        header.push(0);
        header.extend_from_slice(&[0u8; 3]);
        header.extend_from_slice(&(segment.len() as u64).to_le_bytes());
        header.extend_from_slice(&u64::MAX.to_le_bytes()); // free list
        header.extend_from_slice(&(segment_at as u64).to_le_bytes());
        file[..header.len()].copy_from_slice(&header);
        file[segment_at..segment_at + segment.len()].copy_from_slice(&segment);
        file
    }

    #[test]
    fn header_fields() {
        let file = build_heap(100, &["alpha", "beta"]);
        let heap = LocalHeap::parse(&file, 0, &sb()).unwrap();
        assert_eq!(heap.data_segment_address, 100);
        assert_eq!(heap.data_segment_size, 11);
    }

    #[test]
    fn strings_by_offset() {
        let file = build_heap(100, &["alpha", "beta"]);
        let heap = LocalHeap::parse(&file, 0, &sb()).unwrap();
        assert_eq!(heap.string_at(&file, 0).unwrap(), "alpha");
        assert_eq!(heap.string_at(&file, 6).unwrap(), "beta");
    }

    #[test]
    fn offset_outside_segment() {
        let file = build_heap(100, &["x"]);
        let heap = LocalHeap::parse(&file, 0, &sb()).unwrap();
        assert!(matches!(
            heap.string_at(&file, 50).unwrap_err(),
            FormatError::CorruptHeader { .. }
        ));
    }

    #[test]
    fn bad_signature() {
        let mut file = build_heap(100, &["x"]);
        file[0] = b'P';
        assert!(matches!(
            LocalHeap::parse(&file, 0, &sb()).unwrap_err(),
            FormatError::CorruptHeader { .. }
        ));
    }

    #[test]
    fn bad_version() {
        let mut file = build_heap(100, &["x"]);
        file[4] = 1;
        assert!(matches!(
            LocalHeap::parse(&file, 0, &sb()).unwrap_err(),
            FormatError::UnsupportedVersion { .. }
        ));
    }
}
