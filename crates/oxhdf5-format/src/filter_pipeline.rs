//! Filter pipeline message decoding (type 0x000B).

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// Flag bit: the writer was allowed to skip this filter.
const FLAG_OPTIONAL: u16 = 0x0001;

/// One filter entry of a pipeline, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// Filter identification code.
    pub id: u16,
    /// Filter name, present for ids ≥ 256.
    pub name: Option<String>,
    /// Filter flags.
    pub flags: u16,
    /// Client data passed to the filter.
    pub client_data: Vec<u32>,
}

impl FilterSpec {
    /// Was the filter marked optional when the dataset was written?
    pub fn optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }
}

/// A decoded filter pipeline message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPipelineMessage {
    /// Filters in the order they were applied on write.
    pub filters: Vec<FilterSpec>,
}

impl DecodeMessage for FilterPipelineMessage {
    const MESSAGE_TYPE: MessageType = MessageType::FilterPipeline;

    fn decode(cur: &mut Cursor<'_>, _superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        let count = cur.u8()? as usize;
        match version {
            1 => {
                cur.skip(6)?; // reserved
                Self::decode_entries(cur, count, true)
            }
            2 => Self::decode_entries(cur, count, false),
            other => Err(FormatError::UnsupportedVersion {
                what: "filter pipeline message",
                version: other,
            }),
        }
    }
}

impl FilterPipelineMessage {
    fn decode_entries(
        cur: &mut Cursor<'_>,
        count: usize,
        padded: bool,
    ) -> Result<Self, FormatError> {
        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let id = cur.u16()?;
            let name_length = if padded || id >= 256 {
                cur.u16()? as usize
            } else {
                0
            };
            let flags = cur.u16()?;
            let client_count = cur.u16()? as usize;

            let name = if name_length > 0 {
                let raw = cur.bytes(name_length)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let name = String::from_utf8_lossy(&raw[..end]).into_owned();
                if padded {
                    let total = name_length.div_ceil(8) * 8;
                    cur.skip(total - name_length)?;
                }
                Some(name)
            } else {
                None
            };

            let mut client_data = Vec::with_capacity(client_count);
            for _ in 0..client_count {
                client_data.push(cur.u32()?);
            }
            if padded && client_count % 2 != 0 {
                cur.skip(4)?; // pad to 8-byte multiple
            }

            filters.push(FilterSpec {
                id,
                name,
                flags,
                client_data,
            });
        }
        Ok(FilterPipelineMessage { filters })
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

    fn decode(bytes: &[u8]) -> Result<FilterPipelineMessage, FormatError> {
        let mut cur = Cursor::new(bytes, Site::Message { msg_type: 0x000B });
        FilterPipelineMessage::decode(&mut cur, &sb())
    }

    /// Version 2 message with the given `(id, flags, client_data)` entries,
    /// all ids < 256.
    pub(crate) fn build_v2(entries: &[(u16, u16, &[u32])]) -> Vec<u8> {
        let mut buf = vec![2u8, entries.len() as u8];
        for (id, flags, client) in entries {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&flags.to_le_bytes());
            buf.extend_from_slice(&(client.len() as u16).to_le_bytes());
            for value in *client {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        buf
    }

    #[test]
    fn v2_two_filters() {
        let msg = decode(&build_v2(&[(2, 0, &[8]), (1, 1, &[6])])).unwrap();
        assert_eq!(msg.filters.len(), 2);
        assert_eq!(msg.filters[0].id, 2);
        assert_eq!(msg.filters[0].client_data, vec![8]);
        assert!(!msg.filters[0].optional());
        assert_eq!(msg.filters[1].id, 1);
        assert!(msg.filters[1].optional());
    }

    #[test]
    fn v2_named_filter() {
        let mut buf = vec![2u8, 1];
        buf.extend_from_slice(&300u16.to_le_bytes()); // custom id ≥ 256
        buf.extend_from_slice(&4u16.to_le_bytes()); // name length
        buf.extend_from_slice(b"lz9\0");
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // client count
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.filters[0].name.as_deref(), Some("lz9"));
    }

    #[test]
    fn v1_padded_entries() {
        let mut buf = vec![1u8, 1];
        buf.extend_from_slice(&[0u8; 6]); // reserved
        buf.extend_from_slice(&1u16.to_le_bytes()); // deflate
        buf.extend_from_slice(&0u16.to_le_bytes()); // name length
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&1u16.to_le_bytes()); // one client value
        buf.extend_from_slice(&6u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // odd-count pad
        let msg = decode(&buf).unwrap();
        assert_eq!(msg.filters[0].id, 1);
        assert_eq!(msg.filters[0].client_data, vec![6]);
    }

    #[test]
    fn bad_version() {
        let err = decode(&[7u8, 0]).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
    }

    #[test]
    fn truncated_entry() {
        let buf = vec![2u8, 1, 1, 0];
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FormatError::CorruptMessage { .. }));
    }
}
