//! Link message decoding (type 0x0006).

use crate::cursor::Cursor;
use crate::datatype::Charset;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// What a link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// An object header in this file.
    Hard { address: u64 },
    /// A path string resolved lazily within this file.
    Soft { target: String },
    /// An object in another file.
    External { file_name: String, target: String },
}

/// A decoded link message: one named edge out of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    /// Link name.
    pub name: String,
    /// The link's destination.
    pub target: LinkTarget,
    /// Creation order, when the group tracks it.
    pub creation_order: Option<u64>,
    /// Character set of the name.
    pub charset: Charset,
}

impl DecodeMessage for LinkMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Link;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "link message",
                version,
            });
        }

        let flags = cur.u8()?;
        let has_creation_order = flags & 0x04 != 0;
        let has_link_type = flags & 0x08 != 0;
        let has_charset = flags & 0x10 != 0;
        let name_len_width = match flags & 0x03 {
            0 => 1u8,
            1 => 2,
            2 => 4,
            _ => 8,
        };

        let link_type = if has_link_type { cur.u8()? } else { 0 };

        let creation_order = if has_creation_order {
            Some(cur.u64()?)
        } else {
            None
        };

        let charset = if has_charset {
            match cur.u8()? {
                0 => Charset::Ascii,
                1 => Charset::Utf8,
                other => {
                    return Err(cur.corrupt(format!("invalid link name character set {other}")))
                }
            }
        } else {
            Charset::Ascii
        };

        let name_len = cur.uint(name_len_width)? as usize;
        let name = String::from_utf8_lossy(cur.bytes(name_len)?).into_owned();

        let target = match link_type {
            0 => {
                let address = cur
                    .addr(superblock.offset_size)?
                    .ok_or_else(|| cur.corrupt("hard link with undefined address"))?;
                LinkTarget::Hard { address }
            }
            1 => {
                let len = cur.u16()? as usize;
                let target = String::from_utf8_lossy(cur.bytes(len)?).into_owned();
                LinkTarget::Soft { target }
            }
            64 => {
                let len = cur.u16()? as usize;
                let body = cur.bytes(len)?;
                let mut ext = Cursor::new(body, cur.site());
                ext.u8()?; // version/flags byte, always 0
                let file_name = ext.cstr()?;
                let target = ext.cstr()?;
                LinkTarget::External { file_name, target }
            }
            other => return Err(cur.corrupt(format!("invalid link type {other}"))),
        };

        Ok(LinkMessage {
            name,
            target,
            creation_order,
            charset,
        })
    }
}
