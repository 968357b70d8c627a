//! Attribute message decoding (type 0x000C).

use crate::cursor::Cursor;
use crate::dataspace::DataspaceMessage;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// A decoded attribute message: name, type, shape, and the raw value bytes.
#[derive(Debug, Clone)]
pub struct AttributeMessage {
    /// Attribute name.
    pub name: String,
    /// Value datatype.
    pub datatype: Datatype,
    /// Value dataspace.
    pub dataspace: DataspaceMessage,
    /// Raw value bytes: `element_count × datatype.size()`.
    pub data: Vec<u8>,
}

/// Round up to the next multiple of 8.
fn pad8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

impl DecodeMessage for AttributeMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Attribute;

    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError> {
        let version = cur.u8()?;
        if !(1..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                what: "attribute message",
                version,
            });
        }
        cur.u8()?; // v1: reserved; v2/v3: flags (shared type/space unsupported)

        let name_size = cur.u16()? as usize;
        let datatype_size = cur.u16()? as usize;
        let dataspace_size = cur.u16()? as usize;
        if version == 3 {
            cur.u8()?; // name character set
        }

        // v1 pads each of the three regions to 8 bytes; v2/v3 pack them.
        let padded = |n: usize| if version == 1 { pad8(n) } else { n };

        let name_raw = cur.bytes(padded(name_size))?;
        let name_end = name_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_size.min(name_raw.len()));
        let name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();

        let dt_raw = cur.bytes(padded(datatype_size))?;
        let mut dt_cur = Cursor::new(&dt_raw[..datatype_size], cur.site());
        let datatype = Datatype::parse(&mut dt_cur)?;

        let ds_raw = cur.bytes(padded(dataspace_size))?;
        let mut ds_cur = Cursor::new(&ds_raw[..dataspace_size], cur.site());
        let dataspace = DataspaceMessage::decode(&mut ds_cur, superblock)?;

        let elements = dataspace.element_count()?;
        let value_len = elements
            .checked_mul(datatype.size() as u64)
            .ok_or_else(|| cur.corrupt("attribute value size overflows"))?;
        let value_len = usize::try_from(value_len)
            .map_err(|_| cur.corrupt("attribute value size exceeds platform limits"))?;
        let take = value_len.min(cur.remaining());
        let data = cur.bytes(take)?.to_vec();

        Ok(AttributeMessage {
            name,
            datatype,
            dataspace,
            data,
        })
    }
}
