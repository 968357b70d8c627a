//! Attribute info message decoding (type 0x0015).

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// A decoded attribute info message.
///
/// Present when attributes moved to dense storage: the attribute messages
/// live in a fractal heap, indexed by a B-tree v2 of type-8 records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfoMessage {
    /// Highest attribute creation order used so far, when tracked.
    pub max_creation_index: Option<u16>,
    /// Fractal heap holding the attribute messages, if any.
    pub fractal_heap_address: Option<u64>,
    /// B-tree v2 indexing attributes by name hash, if any.
    pub name_index_address: Option<u64>,
    /// B-tree v2 indexing attributes by creation order, if any.
    pub creation_order_index_address: Option<u64>,
}

impl DecodeMessage for AttributeInfoMessage {
    const MESSAGE_TYPE: MessageType = MessageType::AttributeInfo;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "attribute info message",
                version,
            });
        }

        let flags = cur.u8()?;
        let max_creation_index = if flags & 0x01 != 0 {
            Some(cur.u16()?)
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

        Ok(AttributeInfoMessage {
            max_creation_index,
            fractal_heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }
}
