//! Symbol table message (type 0x0011) and symbol table node (`SNOD`)
//! decoding, used by legacy v1 groups.

use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// Cache type marking a symbol table entry as a symbolic link; the scratch
/// pad then holds the local-heap offset of the target path.
pub const CACHE_TYPE_SYMLINK: u32 = 2;

/// The symbol table message: where a v1 group keeps its link index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableMessage {
    /// v1 B-tree (type 0) over the group's links.
    pub btree_address: u64,
    /// Local heap holding the link names.
    pub local_heap_address: u64,
}

impl DecodeMessage for SymbolTableMessage {
    const MESSAGE_TYPE: MessageType = MessageType::SymbolTable;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let btree_address = cur
            .addr(superblock.offset_size)?
            .ok_or_else(|| cur.corrupt("undefined group B-tree address"))?;
        let local_heap_address = cur
            .addr(superblock.offset_size)?
            .ok_or_else(|| cur.corrupt("undefined local heap address"))?;
        Ok(SymbolTableMessage {
            btree_address,
            local_heap_address,
        })
    }
}

/// One entry of a symbol table node.
#[derive(Debug, Clone)]
pub struct SymbolTableEntry {
    /// Local-heap offset of the link name.
    pub link_name_offset: u64,
    /// Object header address of the child.
    pub object_header_address: u64,
    /// Cache type (0 = none, 1 = cached group info, 2 = symbolic link).
    pub cache_type: u32,
    /// 16-byte scratch pad, meaning depends on `cache_type`.
    pub scratch: [u8; 16],
}

impl SymbolTableEntry {
    /// For a symbolic-link entry, the local-heap offset of the target path.
    pub fn symlink_target_offset(&self) -> Option<u64> {
        if self.cache_type == CACHE_TYPE_SYMLINK {
            Some(u32::from_le_bytes([
                self.scratch[0],
                self.scratch[1],
                self.scratch[2],
                self.scratch[3],
            ]) as u64)
        } else {
            None
        }
    }
}

/// A parsed symbol table node (`SNOD`).
#[derive(Debug, Clone)]
pub struct SymbolTableNode {
    /// Entries in name order.
    pub entries: Vec<SymbolTableEntry>,
}

impl SymbolTableNode {
    /// Parse the node at `address`.
    pub fn parse(
        data: &[u8],
        address: u64,
        superblock: &Superblock,
    ) -> Result<SymbolTableNode, FormatError> {
        let site = Site::Header { address };
        let mut cur = Cursor::at(data, address as usize, site)?;

        if cur.bytes(4)? != b"SNOD" {
            return Err(site.corrupt("bad symbol table node signature"));
        }
        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "symbol table node",
                version,
            });
        }
        cur.u8()?; // reserved
        let count = cur.u16()? as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let link_name_offset = cur.uint(superblock.offset_size)?;
            let object_header_address = cur
                .addr(superblock.offset_size)?
                .ok_or_else(|| cur.corrupt("entry with undefined header address"))?;
            let cache_type = cur.u32()?;
            cur.u32()?; // reserved
            let mut scratch = [0u8; 16];
            scratch.copy_from_slice(cur.bytes(16)?);
            entries.push(SymbolTableEntry {
                link_name_offset,
                object_header_address,
                cache_type,
                scratch,
            });
        }

        Ok(SymbolTableNode { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Site;

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

    fn build_snod(entries: &[(u64, u64, u32, [u8; 16])]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"SNOD");
        buf.push(1);
        buf.push(0);
        buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for &(name_off, addr, cache_type, scratch) in entries {
            buf.extend_from_slice(&name_off.to_le_bytes());
            buf.extend_from_slice(&addr.to_le_bytes());
            buf.extend_from_slice(&cache_type.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&scratch);
        }
        buf
    }

    #[test]
    fn message_decodes_addresses() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x1000u64.to_le_bytes());
        data.extend_from_slice(&0x2000u64.to_le_bytes());
        let mut cur = Cursor::new(&data, Site::Message { msg_type: 0x0011 });
        let msg = SymbolTableMessage::decode(&mut cur, &sb()).unwrap();
        assert_eq!(msg.btree_address, 0x1000);
        assert_eq!(msg.local_heap_address, 0x2000);
    }

    #[test]
    fn snod_entries() {
        let data = build_snod(&[(0, 0x100, 0, [0; 16]), (8, 0x200, 1, [0; 16])]);
        let node = SymbolTableNode::parse(&data, 0, &sb()).unwrap();
        assert_eq!(node.entries.len(), 2);
        assert_eq!(node.entries[0].object_header_address, 0x100);
        assert_eq!(node.entries[1].link_name_offset, 8);
        assert_eq!(node.entries[1].cache_type, 1);
    }

    #[test]
    fn symlink_entry_exposes_target_offset() {
        let mut scratch = [0u8; 16];
        scratch[..4].copy_from_slice(&24u32.to_le_bytes());
        let data = build_snod(&[(0, 0x100, CACHE_TYPE_SYMLINK, scratch)]);
        let node = SymbolTableNode::parse(&data, 0, &sb()).unwrap();
        assert_eq!(node.entries[0].symlink_target_offset(), Some(24));
    }

    #[test]
    fn non_symlink_has_no_target() {
        let data = build_snod(&[(0, 0x100, 0, [0xFF; 16])]);
        let node = SymbolTableNode::parse(&data, 0, &sb()).unwrap();
        assert_eq!(node.entries[0].symlink_target_offset(), None);
    }

    #[test]
    fn bad_signature() {
        let mut data = build_snod(&[]);
        data[0] = b'X';
        let err = SymbolTableNode::parse(&data, 0, &sb()).unwrap_err();
        assert!(matches!(err, FormatError::CorruptHeader { address: 0, .. }));
    }

    #[test]
    fn bad_version() {
        let mut data = build_snod(&[]);
        data[4] = 2;
        let err = SymbolTableNode::parse(&data, 0, &sb()).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
    }

    #[test]
    fn empty_node() {
        let data = build_snod(&[]);
        let node = SymbolTableNode::parse(&data, 0, &sb()).unwrap();
        assert!(node.entries.is_empty());
    }
}
