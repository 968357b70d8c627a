//! Link info message decoding (type 0x0002).

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// A decoded link info message from a group's object header.
///
/// When `fractal_heap_address` is set the group stores its links densely:
/// link messages live in a fractal heap, indexed by the B-tree v2 structures
/// named here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfoMessage {
    /// Highest creation order used so far, when tracked.
    pub max_creation_order: Option<u64>,
    /// Fractal heap holding dense link messages, if any.
    pub fractal_heap_address: Option<u64>,
    /// B-tree v2 indexing links by name hash, if any.
    pub name_index_address: Option<u64>,
    /// B-tree v2 indexing links by creation order, if any.
    pub creation_order_index_address: Option<u64>,
}

impl DecodeMessage for LinkInfoMessage {
    const MESSAGE_TYPE: MessageType = MessageType::LinkInfo;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "link info message",
                version,
            });
        }

        let flags = cur.u8()?;
        let max_creation_order = if flags & 0x01 != 0 {
            Some(cur.u64()?)
        } else {
            None
        };

        let fractal_heap_address = cur.addr(superblock.offset_size)?;
        let name_index_address = cur.addr(superblock.offset_size)?;
        let creation_order_index_address = if flags & 0x02 != 0 {
            cur.addr(superblock.offset_size)?
        } else {
            None
        };

        Ok(LinkInfoMessage {
            max_creation_order,
            fractal_heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Site;

    fn sb() -> Superblock {
        Superblock {
            version: 2,
            offset_size: 8,
            length_size: 8,
            base_address: 0,
            eof_address: 1 << 20,
            root_group_address: 48,
            group_leaf_node_k: None,
            group_internal_node_k: None,
            indexed_storage_internal_node_k: None,
        }
    }

    fn decode(bytes: &[u8]) -> Result<LinkInfoMessage, FormatError> {
        let mut cur = Cursor::new(bytes, Site::Message { msg_type: 0x0002 });
        LinkInfoMessage::decode(&mut cur, &sb())
    }

    #[test]
    fn compact_only() {
        let mut buf = vec![0u8, 0x00];
        buf.extend_from_slice(&[0xFF; 8]); // no fractal heap
        buf.extend_from_slice(&[0xFF; 8]); // no name index
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.fractal_heap_address, None);
        assert_eq!(msg.name_index_address, None);
        assert_eq!(msg.max_creation_order, None);
        assert_eq!(msg.creation_order_index_address, None);
    }

    #[test]
    fn dense_with_tracking() {
        let mut buf = vec![0u8, 0x03];
        buf.extend_from_slice(&41u64.to_le_bytes()); // max creation order
        buf.extend_from_slice(&0x1000u64.to_le_bytes());
        buf.extend_from_slice(&0x2000u64.to_le_bytes());
        buf.extend_from_slice(&0x3000u64.to_le_bytes());
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.max_creation_order, Some(41));
        assert_eq!(msg.fractal_heap_address, Some(0x1000));
        assert_eq!(msg.name_index_address, Some(0x2000));
        assert_eq!(msg.creation_order_index_address, Some(0x3000));
    }

    #[test]
    fn bad_version() {
        let err = decode(&[1u8, 0]).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
    }

    #[test]
    fn truncated() {
        let err = decode(&[0u8, 0x00, 1, 2]).unwrap_err();
        assert!(matches!(err, FormatError::CorruptMessage { .. }));
    }
}
