//! Group info message decoding (type 0x000A).

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// A decoded group info message: storage phase-change limits and size
/// estimates for a v2 group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupInfoMessage {
    /// Links above this count move to dense storage.
    pub max_compact_links: Option<u16>,
    /// Links below this count move back to compact storage.
    pub min_dense_links: Option<u16>,
    /// Estimated number of entries.
    pub estimated_entries: Option<u16>,
    /// Estimated link name length.
    pub estimated_name_length: Option<u16>,
}

impl DecodeMessage for GroupInfoMessage {
    const MESSAGE_TYPE: MessageType = MessageType::GroupInfo;

    fn decode(cur: &mut Cursor<'_>, _superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "group info message",
                version,
            });
        }

        let flags = cur.u8()?;
        let mut msg = GroupInfoMessage::default();
        if flags & 0x01 != 0 {
            msg.max_compact_links = Some(cur.u16()?);
            msg.min_dense_links = Some(cur.u16()?);
        }
        if flags & 0x02 != 0 {
            msg.estimated_entries = Some(cur.u16()?);
            msg.estimated_name_length = Some(cur.u16()?);
        }
        Ok(msg)
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

    fn decode(bytes: &[u8]) -> Result<GroupInfoMessage, FormatError> {
        let mut cur = Cursor::new(bytes, Site::Message { msg_type: 0x000A });
        GroupInfoMessage::decode(&mut cur, &sb())
    }

    #[test]
    fn empty() {
        let msg = decode(&[0u8, 0x00]).unwrap();
        assert_eq!(msg, GroupInfoMessage::default());
    }

    #[test]
    fn phase_change_limits() {
        let mut buf = vec![0u8, 0x01];
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&6u16.to_le_bytes());
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.max_compact_links, Some(8));
        assert_eq!(msg.min_dense_links, Some(6));
    }

    #[test]
    fn estimates() {
        let mut buf = vec![0u8, 0x02];
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&12u16.to_le_bytes());
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.estimated_entries, Some(4));
        assert_eq!(msg.estimated_name_length, Some(12));
    }

    #[test]
    fn bad_version() {
        let err = decode(&[5u8, 0]).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
    }
}
