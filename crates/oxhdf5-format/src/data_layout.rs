//! Data layout message decoding (type 0x0008).
//!
//! Version 3 layouts only: compact, contiguous, and chunked. Version 4 and
//! virtual layouts are recognized but reported as [`FormatError::UnsupportedLayout`].

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// A decoded data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayoutMessage {
    /// Raw data stored inline in the object header.
    Compact {
        /// The element bytes.
        data: Vec<u8>,
    },
    /// Raw data stored as one contiguous file region.
    Contiguous {
        /// Data address, or `None` when storage was never allocated.
        address: Option<u64>,
        /// Region length in bytes.
        size: u64,
    },
    /// Raw data stored as B-tree-indexed chunks.
    Chunked {
        /// Chunk dimension sizes as stored: rank spatial dims plus the
        /// trailing element-size dimension.
        chunk_dimensions: Vec<u32>,
        /// v1 chunk B-tree root, or `None` when no chunk was ever written.
        btree_address: Option<u64>,
    },
}

impl DecodeMessage for DataLayoutMessage {
    const MESSAGE_TYPE: MessageType = MessageType::DataLayout;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        match version {
            3 => {}
            1 | 2 | 4 => return Err(FormatError::UnsupportedLayout),
            other => {
                return Err(FormatError::UnsupportedVersion {
                    what: "data layout message",
                    version: other,
                })
            }
        }

        let class = cur.u8()?;
        match class {
            0 => {
                let size = cur.u16()? as usize;
                Ok(DataLayoutMessage::Compact {
                    data: cur.bytes(size)?.to_vec(),
                })
            }
            1 => {
                let address = cur.addr(superblock.offset_size)?;
                let size = cur.length(superblock.length_size)?;
                Ok(DataLayoutMessage::Contiguous { address, size })
            }
            2 => {
                let dimensionality = cur.u8()? as usize;
                if dimensionality < 2 {
                    return Err(cur.corrupt(format!(
                        "chunked layout dimensionality {dimensionality} below minimum 2"
                    )));
                }
                let btree_address = cur.addr(superblock.offset_size)?;
                let mut chunk_dimensions = Vec::with_capacity(dimensionality);
                for _ in 0..dimensionality {
                    chunk_dimensions.push(cur.u32()?);
                }
                Ok(DataLayoutMessage::Chunked {
                    chunk_dimensions,
                    btree_address,
                })
            }
            _ => Err(FormatError::UnsupportedLayout),
        }
    }
}
