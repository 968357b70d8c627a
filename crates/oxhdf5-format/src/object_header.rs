//! Object header parsing (versions 1 and 2) and typed message access.
//!
//! Headers are parsed into raw `(type, flags, creation order, bytes)`
//! entries; continuation messages are followed during parsing so the
//! resulting message list covers all header blocks. Typed decoding happens
//! on demand through the [`DecodeMessage`] trait.

use crate::checksum::jenkins_lookup3;
use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::message::MessageType;
use crate::superblock::Superblock;

const OHDR_SIGNATURE: &[u8; 4] = b"OHDR";
const OCHK_SIGNATURE: &[u8; 4] = b"OCHK";

/// Message flag bit: the creator required this message to be understood.
const FLAG_MUST_UNDERSTAND: u8 = 0x08;

/// A single raw header message entry.
#[derive(Debug, Clone)]
pub struct HeaderMessage {
    /// Decoded message type tag.
    pub msg_type: MessageType,
    /// Message flags byte.
    pub flags: u8,
    /// Creation order (v2 headers with tracking enabled).
    pub creation_order: Option<u16>,
    /// Raw message body.
    pub data: Vec<u8>,
}

/// A parsed object header: its version and all non-NIL messages.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    /// Header version (1 or 2).
    pub version: u8,
    /// File address this header was parsed from.
    pub address: u64,
    /// All messages, in on-disk order across continuation blocks.
    pub messages: Vec<HeaderMessage>,
}

/// A typed decoder for one message type.
///
/// Implementations are pure functions of the message bytes plus the
/// superblock's addressing parameters; the only permitted side effect is the
/// construction of filter descriptors by the filter pipeline message.
pub trait DecodeMessage: Sized {
    /// The on-disk message type this decoder handles.
    const MESSAGE_TYPE: MessageType;

    /// Decode one message body.
    fn decode(cur: &mut Cursor<'_>, superblock: &Superblock) -> Result<Self, FormatError>;
}

impl ObjectHeader {
    /// Parse the object header at `address` (an absolute offset into
    /// `data`).
    pub fn parse(
        data: &[u8],
        address: u64,
        superblock: &Superblock,
    ) -> Result<ObjectHeader, FormatError> {
        let site = Site::Header { address };
        let mut cur = Cursor::at(data, address as usize, site)?;
        let lead = cur.bytes(4)?;
        if lead == OHDR_SIGNATURE {
            Self::parse_v2(data, address, superblock)
        } else {
            Self::parse_v1(data, address, superblock)
        }
    }

    /// Does the header contain at least one message of `msg_type`?
    pub fn has_message_type(&self, msg_type: MessageType) -> bool {
        self.messages.iter().any(|m| m.msg_type == msg_type)
    }

    /// Decode the first message of type `M`, if present.
    pub fn first_message<M: DecodeMessage>(
        &self,
        superblock: &Superblock,
    ) -> Result<Option<M>, FormatError> {
        for msg in &self.messages {
            if msg.msg_type == M::MESSAGE_TYPE {
                let mut cur = Cursor::new(
                    &msg.data,
                    Site::Message {
                        msg_type: M::MESSAGE_TYPE.code(),
                    },
                );
                return M::decode(&mut cur, superblock).map(Some);
            }
        }
        Ok(None)
    }

    /// Decode every message of type `M`, in header order.
    pub fn messages_of<M: DecodeMessage>(
        &self,
        superblock: &Superblock,
    ) -> Result<Vec<M>, FormatError> {
        let mut out = Vec::new();
        for msg in &self.messages {
            if msg.msg_type == M::MESSAGE_TYPE {
                let mut cur = Cursor::new(
                    &msg.data,
                    Site::Message {
                        msg_type: M::MESSAGE_TYPE.code(),
                    },
                );
                out.push(M::decode(&mut cur, superblock)?);
            }
        }
        Ok(out)
    }

    // ----- version 1 -----

    fn parse_v1(
        data: &[u8],
        address: u64,
        superblock: &Superblock,
    ) -> Result<ObjectHeader, FormatError> {
        let site = Site::Header { address };
        let mut cur = Cursor::at(data, address as usize, site)?;

        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "object header",
                version,
            });
        }
        cur.u8()?; // reserved
        let num_messages = cur.u16()?;
        cur.u32()?; // object reference count
        let header_data_size = cur.u32()? as usize;
        cur.skip(4)?; // pad the 12-byte prefix to 8-byte alignment

        let block_start = cur.position();
        let mut messages = Vec::with_capacity(num_messages as usize);
        let mut remaining = num_messages as usize;
        Self::parse_v1_block(
            data,
            block_start,
            header_data_size,
            site,
            superblock,
            &mut remaining,
            &mut messages,
            0,
        )?;

        Ok(ObjectHeader {
            version: 1,
            address,
            messages,
        })
    }

    /// Parse one v1 message block (the header's own block or a continuation
    /// region, which has no signature of its own).
    #[allow(clippy::too_many_arguments)]
    fn parse_v1_block(
        data: &[u8],
        start: usize,
        len: usize,
        site: Site,
        superblock: &Superblock,
        remaining: &mut usize,
        messages: &mut Vec<HeaderMessage>,
        depth: usize,
    ) -> Result<(), FormatError> {
        if depth > 32 {
            return Err(site.corrupt("header continuations nested deeper than 32 levels"));
        }
        let mut cur = Cursor::at(data, start, site)?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| site.corrupt("v1 block length overflows"))?;
        if end > data.len() {
            return Err(site.corrupt("v1 block extends past end of file"));
        }

        while *remaining > 0 && cur.position() + 8 <= end {
            let code = cur.u16()?;
            let size = cur.u16()? as usize;
            let flags = cur.u8()?;
            cur.skip(3)?; // reserved
            if cur.position() + size > end {
                return Err(site.corrupt(format!(
                    "message body ({size} bytes) overruns header block at {:#x}",
                    cur.position()
                )));
            }
            let body = cur.bytes(size)?.to_vec();
            *remaining -= 1;

            let msg_type = MessageType::from_code(code);
            if let MessageType::Unknown(id) = msg_type {
                if flags & FLAG_MUST_UNDERSTAND != 0 {
                    return Err(site.corrupt(format!(
                        "unknown must-understand message type {id:#06x}"
                    )));
                }
            }

            if msg_type == MessageType::ObjectHeaderContinuation {
                let (cont_addr, cont_len) = decode_continuation(&body, superblock)?;
                Self::parse_v1_block(
                    data,
                    resolve(cont_addr, superblock, site)?,
                    cont_len as usize,
                    site,
                    superblock,
                    remaining,
                    messages,
                    depth + 1,
                )?;
            } else if msg_type != MessageType::Nil {
                messages.push(HeaderMessage {
                    msg_type,
                    flags,
                    creation_order: None,
                    data: body,
                });
            }
        }

        Ok(())
    }

    // ----- version 2 -----

    fn parse_v2(
        data: &[u8],
        address: u64,
        superblock: &Superblock,
    ) -> Result<ObjectHeader, FormatError> {
        let site = Site::Header { address };
        let mut cur = Cursor::at(data, address as usize, site)?;
        cur.bytes(4)?; // OHDR, checked by caller

        let version = cur.u8()?;
        if version != 2 {
            return Err(FormatError::UnsupportedVersion {
                what: "object header",
                version,
            });
        }
        let flags = cur.u8()?;

        // Timestamps (flags bit 2) are also the signal that messages carry
        // creation order fields.
        let track_times = flags & 0x04 != 0;
        if track_times {
            cur.skip(16)?; // access/modification/change/birth times
        }
        if flags & 0x10 != 0 {
            cur.skip(4)?; // max compact / min dense attribute counts
        }

        let size_width = match flags & 0x03 {
            0 => 1u8,
            1 => 2,
            2 => 4,
            _ => 8,
        };
        let block_size = cur.uint(size_width)? as usize;

        let msg_start = cur.position();
        let msg_end = msg_start
            .checked_add(block_size)
            .ok_or_else(|| site.corrupt("v2 header block size overflows"))?;
        verify_block_checksum(data, address as usize, msg_end, address)?;

        let mut messages = Vec::new();
        let mut continuations = Vec::new();
        Self::parse_v2_messages(
            data,
            msg_start,
            msg_end,
            track_times,
            site,
            superblock,
            &mut messages,
            &mut continuations,
        )?;

        let mut visited = std::collections::HashSet::new();
        while let Some((cont_addr, cont_len)) = continuations.pop() {
            if !visited.insert(cont_addr) {
                return Err(site.corrupt(format!(
                    "continuation cycle through {cont_addr:#x}"
                )));
            }
            let cont_start = resolve(cont_addr, superblock, site)?;
            let cont_site = Site::Header {
                address: cont_start as u64,
            };
            let mut ccur = Cursor::at(data, cont_start, cont_site)?;
            if cont_len < 8 {
                return Err(cont_site.corrupt("continuation block too small"));
            }
            if ccur.bytes(4)? != OCHK_SIGNATURE {
                return Err(cont_site.corrupt("bad continuation block signature"));
            }
            let cont_end = cont_start + cont_len as usize - 4;
            verify_block_checksum(data, cont_start, cont_end, cont_start as u64)?;
            Self::parse_v2_messages(
                data,
                cont_start + 4,
                cont_end,
                track_times,
                cont_site,
                superblock,
                &mut messages,
                &mut continuations,
            )?;
        }

        Ok(ObjectHeader {
            version: 2,
            address,
            messages,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_v2_messages(
        data: &[u8],
        start: usize,
        end: usize,
        track_creation_order: bool,
        site: Site,
        superblock: &Superblock,
        messages: &mut Vec<HeaderMessage>,
        continuations: &mut Vec<(u64, u64)>,
    ) -> Result<(), FormatError> {
        if end > data.len() {
            return Err(site.corrupt("v2 message block extends past end of file"));
        }
        let head = if track_creation_order { 6 } else { 4 };
        let mut cur = Cursor::at(data, start, site)?;

        while cur.position() + head <= end {
            let code = cur.u8()? as u16;
            let size = cur.u16()? as usize;
            let flags = cur.u8()?;
            let creation_order = if track_creation_order {
                Some(cur.u16()?)
            } else {
                None
            };
            if cur.position() + size > end {
                // Trailing bytes smaller than a message header are padding.
                break;
            }
            let body = cur.bytes(size)?.to_vec();

            let msg_type = MessageType::from_code(code);
            if let MessageType::Unknown(id) = msg_type {
                if flags & FLAG_MUST_UNDERSTAND != 0 {
                    return Err(site.corrupt(format!(
                        "unknown must-understand message type {id:#06x}"
                    )));
                }
            }

            if msg_type == MessageType::ObjectHeaderContinuation {
                continuations.push(decode_continuation(&body, superblock)?);
            } else if msg_type != MessageType::Nil {
                messages.push(HeaderMessage {
                    msg_type,
                    flags,
                    creation_order,
                    data: body,
                });
            }
        }

        Ok(())
    }
}

/// Decode a continuation message body: target address + block length.
fn decode_continuation(body: &[u8], superblock: &Superblock) -> Result<(u64, u64), FormatError> {
    let mut cur = Cursor::new(
        body,
        Site::Message {
            msg_type: MessageType::ObjectHeaderContinuation.code(),
        },
    );
    let address = cur
        .addr(superblock.offset_size)?
        .ok_or_else(|| cur.corrupt("undefined continuation address"))?;
    let length = cur.length(superblock.length_size)?;
    Ok((address, length))
}

/// Resolve a file-relative address against the superblock base, checked.
fn resolve(addr: u64, superblock: &Superblock, site: Site) -> Result<usize, FormatError> {
    let abs = superblock
        .base_address
        .checked_add(addr)
        .ok_or_else(|| site.corrupt("address overflows"))?;
    usize::try_from(abs).map_err(|_| site.corrupt("address exceeds platform pointer width"))
}

/// Verify the lookup3 checksum stored at `end` over `data[start..end]`.
fn verify_block_checksum(
    data: &[u8],
    start: usize,
    end: usize,
    report_address: u64,
) -> Result<(), FormatError> {
    let site = Site::Header {
        address: report_address,
    };
    if end + 4 > data.len() || start > end {
        return Err(site.corrupt("checksummed block extends past end of file"));
    }
    let stored = u32::from_le_bytes([data[end], data[end + 1], data[end + 2], data[end + 3]]);
    let computed = jenkins_lookup3(&data[start..end]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch {
            address: report_address,
        });
    }
    Ok(())
}
