//! Datatype message decoding (type 0x0003).
//!
//! Covers the classes a read path needs: fixed-point, floating-point,
//! string, opaque, reference, compound, enumeration, variable-length, and
//! array. Time and bit-field classes surface as [`FormatError::UnsupportedDatatype`].

use crate::cursor::Cursor;
use crate::error::FormatError;
use crate::message::MessageType;
use crate::object_header::DecodeMessage;
use crate::superblock::Superblock;

/// Byte order of a numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Padding convention for fixed-length strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPad {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set of string data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Ascii,
    Utf8,
}

/// What a reference type points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Object,
    DatasetRegion,
}

/// One member of a compound type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    pub byte_offset: u64,
    pub datatype: Datatype,
}

/// One named value of an enumeration type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    /// Raw value bytes, `base` type size each.
    pub value: Vec<u8>,
}

/// A decoded datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Class 0: integers.
    FixedPoint {
        size: u32,
        byte_order: ByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: IEEE-style floats.
    FloatingPoint {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 3: fixed-length strings.
    String {
        size: u32,
        padding: StringPad,
        charset: Charset,
    },
    /// Class 5: opaque blobs with an ASCII tag.
    Opaque { size: u32, tag: String },
    /// Class 7: object or region references.
    Reference { size: u32, kind: ReferenceKind },
    /// Class 6: compound records.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 8: enumerations over an integer base type.
    Enumeration {
        size: u32,
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9: variable-length sequences or strings.
    VariableLength {
        size: u32,
        is_string: bool,
        padding: Option<StringPad>,
        charset: Option<Charset>,
        base: Box<Datatype>,
    },
    /// Class 10: fixed-size multi-dimensional arrays of a base type.
    Array {
        size: u32,
        base: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

impl Datatype {
    /// The on-disk size of one element of this type, in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. }
            | Datatype::Array { size, .. } => *size,
        }
    }

    /// Is this a variable-length string type?
    pub fn is_vlen_string(&self) -> bool {
        matches!(self, Datatype::VariableLength { is_string: true, .. })
    }

    /// Parse one datatype encoding from the cursor, which is left positioned
    /// after it (used recursively for compound/enum/vlen/array bases).
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Datatype, FormatError> {
        let class_and_version = cur.u8()?;
        let class = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        if !(1..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                what: "datatype",
                version,
            });
        }

        let b0 = cur.u8()?;
        let b1 = cur.u8()?;
        let b2 = cur.u8()?;
        let bits = u32::from(b0) | u32::from(b1) << 8 | u32::from(b2) << 16;
        let size = cur.u32()?;

        match class {
            0 => Self::parse_fixed(cur, bits, size),
            1 => Self::parse_float(cur, bits, size),
            3 => Self::parse_string(cur, bits, size),
            5 => Self::parse_opaque(cur, bits, size),
            6 => Self::parse_compound(cur, version, bits, size),
            7 => Self::parse_reference(bits, size),
            8 => Self::parse_enum(cur, version, bits, size),
            9 => Self::parse_vlen(cur, bits, size),
            10 => Self::parse_array(cur, version, size),
            2 => Err(FormatError::UnsupportedDatatype("time (class 2)".into())),
            4 => Err(FormatError::UnsupportedDatatype(
                "bit field (class 4)".into(),
            )),
            other => Err(FormatError::UnsupportedDatatype(format!(
                "unknown class {other}"
            ))),
        }
    }

    fn parse_fixed(cur: &mut Cursor<'_>, bits: u32, size: u32) -> Result<Datatype, FormatError> {
        let byte_order = if bits & 0x01 == 0 {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        };
        let signed = bits & 0x08 != 0;
        let bit_offset = cur.u16()?;
        let bit_precision = cur.u16()?;
        Ok(Datatype::FixedPoint {
            size,
            byte_order,
            signed,
            bit_offset,
            bit_precision,
        })
    }

    fn parse_float(cur: &mut Cursor<'_>, bits: u32, size: u32) -> Result<Datatype, FormatError> {
        let byte_order = match (bits & 0x01, bits & 0x40) {
            (0, 0) => ByteOrder::LittleEndian,
            (1, 0) => ByteOrder::BigEndian,
            _ => {
                return Err(FormatError::UnsupportedDatatype(
                    "VAX byte order".into(),
                ))
            }
        };
        let bit_offset = cur.u16()?;
        let bit_precision = cur.u16()?;
        let exponent_location = cur.u8()?;
        let exponent_size = cur.u8()?;
        let mantissa_location = cur.u8()?;
        let mantissa_size = cur.u8()?;
        let exponent_bias = cur.u32()?;
        Ok(Datatype::FloatingPoint {
            size,
            byte_order,
            bit_offset,
            bit_precision,
            exponent_location,
            exponent_size,
            mantissa_location,
            mantissa_size,
            exponent_bias,
        })
    }

    fn parse_string(cur: &mut Cursor<'_>, bits: u32, size: u32) -> Result<Datatype, FormatError> {
        let padding = string_pad((bits & 0x0F) as u8, cur)?;
        let charset = charset(((bits >> 4) & 0x0F) as u8, cur)?;
        Ok(Datatype::String {
            size,
            padding,
            charset,
        })
    }

    fn parse_opaque(cur: &mut Cursor<'_>, bits: u32, size: u32) -> Result<Datatype, FormatError> {
        let tag_len = (bits & 0xFF) as usize;
        let raw = cur.bytes(tag_len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let tag = String::from_utf8_lossy(&raw[..end]).into_owned();
        Ok(Datatype::Opaque { size, tag })
    }

    fn parse_reference(bits: u32, size: u32) -> Result<Datatype, FormatError> {
        let kind = match bits & 0x0F {
            0 => ReferenceKind::Object,
            1 => ReferenceKind::DatasetRegion,
            other => {
                return Err(FormatError::UnsupportedDatatype(format!(
                    "reference type {other}"
                )))
            }
        };
        Ok(Datatype::Reference { size, kind })
    }

    fn parse_compound(
        cur: &mut Cursor<'_>,
        version: u8,
        bits: u32,
        size: u32,
    ) -> Result<Datatype, FormatError> {
        let member_count = (bits & 0xFFFF) as usize;
        let mut members = Vec::with_capacity(member_count);

        for _ in 0..member_count {
            let name = if version < 3 {
                read_padded_name(cur)?
            } else {
                cur.cstr()?
            };

            let byte_offset = match version {
                1 | 2 => cur.u32()? as u64,
                _ => cur.uint(offset_width(size))?,
            };

            if version == 1 {
                // dimensionality, reserved, permutation, reserved, 4 dim sizes
                cur.u8()?;
                cur.skip(3)?;
                cur.u32()?;
                cur.u32()?;
                cur.skip(16)?;
            }

            let datatype = Datatype::parse(cur)?;
            members.push(CompoundMember {
                name,
                byte_offset,
                datatype,
            });
        }

        Ok(Datatype::Compound { size, members })
    }

    fn parse_enum(
        cur: &mut Cursor<'_>,
        version: u8,
        bits: u32,
        size: u32,
    ) -> Result<Datatype, FormatError> {
        let member_count = (bits & 0xFFFF) as usize;
        let base = Box::new(Datatype::parse(cur)?);
        let base_size = base.size() as usize;

        let mut names = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            let name = if version < 3 {
                read_padded_name(cur)?
            } else {
                cur.cstr()?
            };
            names.push(name);
        }

        let mut members = Vec::with_capacity(member_count);
        for name in names {
            let value = cur.bytes(base_size)?.to_vec();
            members.push(EnumMember { name, value });
        }

        Ok(Datatype::Enumeration {
            size,
            base,
            members,
        })
    }

    fn parse_vlen(cur: &mut Cursor<'_>, bits: u32, size: u32) -> Result<Datatype, FormatError> {
        let is_string = match bits & 0x0F {
            0 => false,
            1 => true,
            other => {
                return Err(FormatError::UnsupportedDatatype(format!(
                    "variable-length type {other}"
                )))
            }
        };
        let (padding, cs) = if is_string {
            (
                Some(string_pad(((bits >> 4) & 0x0F) as u8, cur)?),
                Some(charset(((bits >> 8) & 0x0F) as u8, cur)?),
            )
        } else {
            (None, None)
        };
        let base = Box::new(Datatype::parse(cur)?);
        Ok(Datatype::VariableLength {
            size,
            is_string,
            padding,
            charset: cs,
            base,
        })
    }

    fn parse_array(cur: &mut Cursor<'_>, version: u8, size: u32) -> Result<Datatype, FormatError> {
        let rank = cur.u8()? as usize;
        if version == 2 {
            cur.skip(3)?; // reserved
        }
        let mut dimensions = Vec::with_capacity(rank);
        for _ in 0..rank {
            dimensions.push(cur.u32()?);
        }
        if version == 2 {
            cur.skip(4 * rank)?; // permutation indices
        }
        let base = Box::new(Datatype::parse(cur)?);
        Ok(Datatype::Array {
            size,
            base,
            dimensions,
        })
    }
}

impl DecodeMessage for Datatype {
    const MESSAGE_TYPE: MessageType = MessageType::Datatype;

    fn decode(cur: &mut Cursor<'_>, _superblock: &Superblock) -> Result<Self, FormatError> {
        Datatype::parse(cur)
    }
}

/// Bytes needed to express a byte offset inside a compound of `size` bytes
/// (v3 member encoding).
fn offset_width(size: u32) -> u8 {
    if size <= 0xFF {
        1
    } else if size <= 0xFFFF {
        2
    } else {
        4
    }
}

/// Read a NUL-terminated name padded out to a multiple of 8 bytes.
fn read_padded_name(cur: &mut Cursor<'_>) -> Result<String, FormatError> {
    let start = cur.position();
    let name = cur.cstr()?;
    let consumed = cur.position() - start;
    let padded = consumed.div_ceil(8) * 8;
    cur.skip(padded - consumed)?;
    Ok(name)
}

fn string_pad(val: u8, cur: &Cursor<'_>) -> Result<StringPad, FormatError> {
    match val {
        0 => Ok(StringPad::NullTerminate),
        1 => Ok(StringPad::NullPad),
        2 => Ok(StringPad::SpacePad),
        other => Err(cur.corrupt(format!("invalid string padding {other}"))),
    }
}

fn charset(val: u8, cur: &Cursor<'_>) -> Result<Charset, FormatError> {
    match val {
        0 => Ok(Charset::Ascii),
        1 => Ok(Charset::Utf8),
        other => Err(cur.corrupt(format!("invalid character set {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Site;

    fn decode(bytes: &[u8]) -> Result<Datatype, FormatError> {
        let mut cur = Cursor::new(bytes, Site::Message { msg_type: 0x0003 });
        Datatype::parse(&mut cur)
    }

    /// Little-endian i32 encoding (class 0, version 1).
    fn i32_le() -> Vec<u8> {
        let mut buf = vec![0x10, 0x08, 0x00, 0x00]; // v1 class0; signed
        buf.extend_from_slice(&4u32.to_le_bytes()); // size
        buf.extend_from_slice(&0u16.to_le_bytes()); // bit offset
        buf.extend_from_slice(&32u16.to_le_bytes()); // bit precision
        buf
    }

    /// Little-endian f64 encoding (class 1, version 1).
    fn f64_le() -> Vec<u8> {
        let mut buf = vec![0x11, 0x20, 0x3F, 0x00]; // v1 class1; sign bit 63
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // bit offset
        buf.extend_from_slice(&64u16.to_le_bytes()); // bit precision
        buf.push(52); // exponent location
        buf.push(11); // exponent size
        buf.push(0); // mantissa location
        buf.push(52); // mantissa size
        buf.extend_from_slice(&1023u32.to_le_bytes()); // bias
        buf
    }

    #[test]
    fn fixed_point_i32() {
        let dt = decode(&i32_le()).unwrap();
        assert_eq!(
            dt,
            Datatype::FixedPoint {
                size: 4,
                byte_order: ByteOrder::LittleEndian,
                signed: true,
                bit_offset: 0,
                bit_precision: 32,
            }
        );
        assert_eq!(dt.size(), 4);
    }

    #[test]
    fn fixed_point_big_endian_unsigned() {
        let mut buf = vec![0x10, 0x01, 0x00, 0x00];
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        let dt = decode(&buf).unwrap();
        assert!(matches!(
            dt,
            Datatype::FixedPoint {
                byte_order: ByteOrder::BigEndian,
                signed: false,
                ..
            }
        ));
    }

    #[test]
    fn floating_point_f64() {
        let dt = decode(&f64_le()).unwrap();
        match dt {
            Datatype::FloatingPoint {
                size,
                byte_order,
                exponent_size,
                mantissa_size,
                exponent_bias,
                ..
            } => {
                assert_eq!(size, 8);
                assert_eq!(byte_order, ByteOrder::LittleEndian);
                assert_eq!(exponent_size, 11);
                assert_eq!(mantissa_size, 52);
                assert_eq!(exponent_bias, 1023);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fixed_string() {
        let mut buf = vec![0x13, 0x00, 0x00, 0x00]; // null-terminated, ASCII
        buf.extend_from_slice(&7u32.to_le_bytes());
        let dt = decode(&buf).unwrap();
        assert_eq!(
            dt,
            Datatype::String {
                size: 7,
                padding: StringPad::NullTerminate,
                charset: Charset::Ascii,
            }
        );
    }

    #[test]
    fn utf8_string() {
        let mut buf = vec![0x13, 0x11, 0x00, 0x00]; // null-pad, UTF-8
        buf.extend_from_slice(&3u32.to_le_bytes());
        let dt = decode(&buf).unwrap();
        assert_eq!(
            dt,
            Datatype::String {
                size: 3,
                padding: StringPad::NullPad,
                charset: Charset::Utf8,
            }
        );
    }

    #[test]
    fn opaque_tag() {
        let mut buf = vec![0x15, 0x08, 0x00, 0x00]; // tag length 8
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(b"blob\0\0\0\0");
        let dt = decode(&buf).unwrap();
        assert_eq!(
            dt,
            Datatype::Opaque {
                size: 16,
                tag: "blob".into()
            }
        );
    }

    #[test]
    fn object_reference() {
        let mut buf = vec![0x17, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&8u32.to_le_bytes());
        let dt = decode(&buf).unwrap();
        assert_eq!(
            dt,
            Datatype::Reference {
                size: 8,
                kind: ReferenceKind::Object
            }
        );
    }

    #[test]
    fn compound_v3_two_members() {
        let mut buf = vec![0x36, 0x02, 0x00, 0x00]; // v3 compound, 2 members
        buf.extend_from_slice(&12u32.to_le_bytes()); // total size 12
        // member "x" at offset 0: name, 1-byte offset, i32
        buf.extend_from_slice(b"x\0");
        buf.push(0);
        buf.extend_from_slice(&i32_le());
        // member "y" at offset 4: f64
        buf.extend_from_slice(b"y\0");
        buf.push(4);
        buf.extend_from_slice(&f64_le());

        let dt = decode(&buf).unwrap();
        match dt {
            Datatype::Compound { size, members } => {
                assert_eq!(size, 12);
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].name, "x");
                assert_eq!(members[0].byte_offset, 0);
                assert_eq!(members[1].name, "y");
                assert_eq!(members[1].byte_offset, 4);
                assert!(matches!(members[1].datatype, Datatype::FloatingPoint { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn enumeration_v3() {
        let mut buf = vec![0x38, 0x02, 0x00, 0x00]; // v3 enum, 2 members
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&i32_le()); // base
        buf.extend_from_slice(b"OFF\0ON\0");
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        let dt = decode(&buf).unwrap();
        match dt {
            Datatype::Enumeration { members, .. } => {
                assert_eq!(members[0].name, "OFF");
                assert_eq!(members[1].name, "ON");
                assert_eq!(members[1].value, 1i32.to_le_bytes());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn vlen_string() {
        let mut buf = vec![0x19, 0x01, 0x01, 0x00]; // string, utf8 charset
        buf.extend_from_slice(&16u32.to_le_bytes());
        // base: 1-byte unsigned int
        buf.extend_from_slice(&[0x10, 0x00, 0x00, 0x00]);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());

        let dt = decode(&buf).unwrap();
        assert!(dt.is_vlen_string());
        assert_eq!(dt.size(), 16);
    }

    #[test]
    fn array_v3() {
        let mut buf = vec![0x3A, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&24u32.to_le_bytes()); // 2*3 i32 = 24 bytes
        buf.push(2); // rank
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&i32_le());
        let dt = decode(&buf).unwrap();
        match dt {
            Datatype::Array {
                dimensions, base, ..
            } => {
                assert_eq!(dimensions, vec![2, 3]);
                assert!(matches!(*base, Datatype::FixedPoint { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn time_class_unsupported() {
        let mut buf = vec![0x12, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&4u32.to_le_bytes());
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedDatatype(_)));
    }

    #[test]
    fn unknown_class_unsupported() {
        let mut buf = vec![0x1E, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&4u32.to_le_bytes());
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedDatatype(_)));
    }

    #[test]
    fn bad_version() {
        let mut buf = vec![0x00, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&4u32.to_le_bytes());
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
    }

    #[test]
    fn truncated() {
        let err = decode(&[0x10, 0x08]).unwrap_err();
        assert!(matches!(err, FormatError::CorruptMessage { .. }));
    }
}
