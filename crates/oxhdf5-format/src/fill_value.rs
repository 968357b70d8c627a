//! Fill value message decoding (types 0x0004 and 0x0005).

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// A decoded fill value: the bytes written into unallocated elements.
///
/// `None` means the file declares no fill value, in which case readers use
/// zero bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValueMessage {
    /// One element's worth of fill bytes, when defined and non-empty.
    pub value: Option<Vec<u8>>,
}

impl FillValueMessage {
    fn from_size_and_bytes(size: usize, bytes: Vec<u8>) -> Self {
        if size == 0 {
            FillValueMessage { value: None }
        } else {
            FillValueMessage { value: Some(bytes) }
        }
    }
}

impl DecodeMessage for FillValueMessage {
    const MESSAGE_TYPE: MessageType = MessageType::FillValue;

    fn decode(cur: &mut Cursor<'_>, _superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        match version {
            1 | 2 => {
                cur.u8()?; // space allocation time
                cur.u8()?; // fill value write time
                let defined = cur.u8()?;
                if version == 2 && defined == 0 {
                    return Ok(FillValueMessage { value: None });
                }
                let size = cur.u32()? as usize;
                let bytes = cur.bytes(size)?.to_vec();
                Ok(Self::from_size_and_bytes(size, bytes))
            }
            3 => {
                let flags = cur.u8()?;
                // Bit 5: fill value defined and present.
                if flags & 0x20 == 0 {
                    return Ok(FillValueMessage { value: None });
                }
                let size = cur.u32()? as usize;
                let bytes = cur.bytes(size)?.to_vec();
                Ok(Self::from_size_and_bytes(size, bytes))
            }
            other => Err(FormatError::UnsupportedVersion {
                what: "fill value message",
                version: other,
            }),
        }
    }
}

/// The deprecated fill value message (type 0x0004): just a size and bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValueOldMessage {
    /// One element's worth of fill bytes, when non-empty.
    pub value: Option<Vec<u8>>,
}

impl DecodeMessage for FillValueOldMessage {
    const MESSAGE_TYPE: MessageType = MessageType::FillValueOld;

    fn decode(cur: &mut Cursor<'_>, _superblock: &Superblock) -> Result<Self, FormatError> {
        let size = cur.u32()? as usize;
        let bytes = cur.bytes(size)?.to_vec();
        Ok(FillValueOldMessage {
            value: if size == 0 { None } else { Some(bytes) },
        })
    }
}
