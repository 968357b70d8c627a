//! Dataspace message decoding (type 0x0001).

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// The kind of extent a dataspace describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceKind {
    /// A single element with no dimensions.
    Scalar,
    /// An N-dimensional rectangular extent.
    Simple,
    /// No elements at all.
    Null,
}

/// A decoded dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataspaceMessage {
    /// What kind of extent this is.
    pub kind: DataspaceKind,
    /// Current dimension sizes; empty for scalar and null spaces.
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes, when recorded. `u64::MAX` means unlimited.
    pub max_dimensions: Option<Vec<u64>>,
}

impl DataspaceMessage {
    /// Total number of elements: the dimension product, 1 for scalar, 0 for
    /// null. Fails on overflow rather than wrapping.
    pub fn element_count(&self) -> Result<u64, FormatError> {
        match self.kind {
            DataspaceKind::Null => Ok(0),
            DataspaceKind::Scalar => Ok(1),
            DataspaceKind::Simple => {
                self.dimensions
                    .iter()
                    .try_fold(1u64, |acc, &d| acc.checked_mul(d))
                    .ok_or_else(|| FormatError::CorruptMessage {
                        msg_type: MessageType::Dataspace.code(),
                        detail: "dimension product overflows".into(),
                    })
            }
        }
    }
}

impl DecodeMessage for DataspaceMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Dataspace;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        let rank = cur.u8()?;
        let flags = cur.u8()?;

        let kind = match version {
            1 => {
                cur.skip(5)?; // reserved
                if rank == 0 {
                    DataspaceKind::Scalar
                } else {
                    DataspaceKind::Simple
                }
            }
            2 => match cur.u8()? {
                0 => DataspaceKind::Scalar,
                1 => DataspaceKind::Simple,
                2 => DataspaceKind::Null,
                other => {
                    return Err(cur.corrupt(format!("invalid dataspace type {other}")));
                }
            },
            other => {
                return Err(FormatError::UnsupportedVersion {
                    what: "dataspace message",
                    version: other,
                })
            }
        };

        let mut dimensions = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            dimensions.push(cur.length(superblock.length_size)?);
        }

        let max_dimensions = if flags & 0x01 != 0 {
            let mut max = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                max.push(cur.length(superblock.length_size)?);
            }
            Some(max)
        } else {
            None
        };

        // v1 flag bit 1: permutation indices follow; nothing downstream
        // uses them.

        Ok(DataspaceMessage {
            kind,
            dimensions,
            max_dimensions,
        })
    }
}
