//! Superblock parsing, versions 0 through 3.

use crate::checksum::jenkins_lookup3;
use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::signature::HDF5_SIGNATURE;

/// The parsed superblock: addressing parameters for the whole file.
///
/// Immutable after parse. All later decoding takes its `offset_size` /
/// `length_size`, and every file-relative address is resolved against
/// `base_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (0–3).
    pub version: u8,
    /// Width of file addresses in bytes (2, 4, or 8).
    pub offset_size: u8,
    /// Width of lengths in bytes (2, 4, or 8).
    pub length_size: u8,
    /// Base address added to every file-relative address.
    pub base_address: u64,
    /// End-of-file address (first byte past the HDF5 data).
    pub eof_address: u64,
    /// Root group object header address (file-relative).
    pub root_group_address: u64,
    /// Group B-tree leaf node K (v0/v1 only).
    pub group_leaf_node_k: Option<u16>,
    /// Group B-tree internal node K (v0/v1 only).
    pub group_internal_node_k: Option<u16>,
    /// Indexed-storage B-tree internal node K (v1 only).
    pub indexed_storage_internal_node_k: Option<u16>,
}

fn validate_width(cur: &Cursor<'_>, what: &str, width: u8) -> Result<(), FormatError> {
    if matches!(width, 2 | 4 | 8) {
        Ok(())
    } else {
        Err(cur.corrupt(format!("invalid {what} size {width} (must be 2, 4, or 8)")))
    }
}

impl Superblock {
    /// Parse the superblock whose signature sits at `signature_offset`.
    pub fn parse(data: &[u8], signature_offset: usize) -> Result<Superblock, FormatError> {
        let site = Site::Superblock {
            address: signature_offset as u64,
        };
        let mut cur = Cursor::at(data, signature_offset, site)?;

        if cur.bytes(8)? != HDF5_SIGNATURE {
            return Err(FormatError::NotHdf5);
        }

        let version = cur.u8()?;
        let sb = match version {
            0 | 1 => Self::parse_v0_v1(&mut cur, version)?,
            2 | 3 => Self::parse_v2_v3(data, signature_offset, &mut cur, version)?,
            other => {
                return Err(FormatError::UnsupportedVersion {
                    what: "superblock",
                    version: other,
                })
            }
        };

        sb.check_invariants(&cur)?;
        Ok(sb)
    }

    fn parse_v0_v1(cur: &mut Cursor<'_>, version: u8) -> Result<Superblock, FormatError> {
        cur.u8()?; // free-space storage version
        cur.u8()?; // root group symbol table version
        cur.u8()?; // reserved
        cur.u8()?; // shared header message version
        let offset_size = cur.u8()?;
        let length_size = cur.u8()?;
        cur.u8()?; // reserved
        validate_width(cur, "offset", offset_size)?;
        validate_width(cur, "length", length_size)?;

        let group_leaf_node_k = cur.u16()?;
        let group_internal_node_k = cur.u16()?;
        let indexed_storage_internal_node_k = if version == 1 {
            let k = cur.u16()?;
            cur.u16()?; // reserved
            Some(k)
        } else {
            None
        };
        cur.u32()?; // file consistency flags

        let base_address = cur.addr(offset_size)?.unwrap_or(0);
        cur.addr(offset_size)?; // free-space manager address
        let eof_address = cur
            .addr(offset_size)?
            .ok_or_else(|| cur.corrupt("undefined end-of-file address"))?;
        cur.addr(offset_size)?; // driver information block address

        // Root group symbol table entry: link name offset, object header
        // address, cache type, reserved, 16-byte scratch pad.
        cur.addr(offset_size)?;
        let root_group_address = cur
            .addr(offset_size)?
            .ok_or_else(|| cur.corrupt("undefined root group address"))?;
        cur.u32()?;
        cur.u32()?;
        cur.bytes(16)?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            group_leaf_node_k: Some(group_leaf_node_k),
            group_internal_node_k: Some(group_internal_node_k),
            indexed_storage_internal_node_k,
        })
    }

    fn parse_v2_v3(
        data: &[u8],
        signature_offset: usize,
        cur: &mut Cursor<'_>,
        version: u8,
    ) -> Result<Superblock, FormatError> {
        let offset_size = cur.u8()?;
        let length_size = cur.u8()?;
        cur.u8()?; // file consistency flags
        validate_width(cur, "offset", offset_size)?;
        validate_width(cur, "length", length_size)?;

        let base_address = cur.addr(offset_size)?.unwrap_or(0);
        cur.addr(offset_size)?; // superblock extension address
        let eof_address = cur
            .addr(offset_size)?
            .ok_or_else(|| cur.corrupt("undefined end-of-file address"))?;
        let root_group_address = cur
            .addr(offset_size)?
            .ok_or_else(|| cur.corrupt("undefined root group address"))?;

        let checksum_pos = cur.position();
        let stored = cur.u32()?;
        let computed = jenkins_lookup3(&data[signature_offset..checksum_pos]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                address: signature_offset as u64,
            });
        }

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            group_leaf_node_k: None,
            group_internal_node_k: None,
            indexed_storage_internal_node_k: None,
        })
    }

    fn check_invariants(&self, cur: &Cursor<'_>) -> Result<(), FormatError> {
        let root_abs = self
            .base_address
            .checked_add(self.root_group_address)
            .ok_or_else(|| cur.corrupt("root group address overflows"))?;
        if root_abs >= self.eof_address {
            return Err(cur.corrupt(format!(
                "root group header {root_abs:#x} not below end-of-file {:#x}",
                self.eof_address
            )));
        }
        Ok(())
    }
}
