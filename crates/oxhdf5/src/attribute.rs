//! Attribute handles.

use std::sync::Arc;

use oxhdf5_format::attribute::AttributeMessage;
use oxhdf5_format::datatype::{Datatype, StringPad};
use oxhdf5_format::vlen;

use crate::error::Error;
use crate::file::FileInner;

/// One attribute of a group or dataset.
///
/// Holds the decoded message (shared with its node's attribute map) plus
/// the file handle needed to resolve variable-length payloads.
#[derive(Clone)]
pub struct Attribute {
    file: Arc<FileInner>,
    messages: Arc<Vec<AttributeMessage>>,
    index: usize,
}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute").field("index", &self.index).finish()
    }
}

impl Attribute {
    pub(crate) fn new(
        file: Arc<FileInner>,
        messages: Arc<Vec<AttributeMessage>>,
        index: usize,
    ) -> Attribute {
        Attribute {
            file,
            messages,
            index,
        }
    }

    fn message(&self) -> &AttributeMessage {
        &self.messages[self.index]
    }

    /// The attribute's name.
    pub fn name(&self) -> &str {
        &self.message().name
    }

    /// The attribute's datatype.
    pub fn datatype(&self) -> &Datatype {
        &self.message().datatype
    }

    /// The attribute's dimensions; empty for a scalar.
    pub fn dimensions(&self) -> &[u64] {
        &self.message().dataspace.dimensions
    }

    /// Number of elements in the value.
    pub fn element_count(&self) -> Result<u64, Error> {
        Ok(self.message().dataspace.element_count()?)
    }

    /// The raw value bytes as stored.
    pub fn bytes(&self) -> &[u8] {
        &self.message().data
    }

    /// The value as a string, for fixed-length and variable-length string
    /// datatypes. Multi-element values yield the first element.
    pub fn string_value(&self) -> Result<String, Error> {
        let message = self.message();
        match &message.datatype {
            Datatype::String { size, padding, .. } => {
                let raw = message.data.get(..*size as usize).unwrap_or(&message.data);
                Ok(trim_fixed_string(raw, *padding))
            }
            dt if dt.is_vlen_string() => {
                if message.dataspace.element_count()? == 0 {
                    return Ok(String::new());
                }
                let bytes = self.file.channel.bytes()?;
                let mut strings = vlen::read_vlen_strings(
                    &bytes,
                    &message.data,
                    1,
                    self.file.superblock(),
                )?;
                Ok(strings.pop().unwrap_or_default())
            }
            other => Err(Error::Format(
                oxhdf5_format::FormatError::UnsupportedDatatype(format!(
                    "attribute {:?} is not a string type",
                    other
                )),
            )),
        }
    }

    /// All elements of a variable-length string attribute.
    pub fn string_values(&self) -> Result<Vec<String>, Error> {
        let message = self.message();
        if !message.datatype.is_vlen_string() {
            return Err(Error::Format(
                oxhdf5_format::FormatError::UnsupportedDatatype(
                    "not a variable-length string attribute".into(),
                ),
            ));
        }
        let bytes = self.file.channel.bytes()?;
        let count = message.dataspace.element_count()?;
        Ok(vlen::read_vlen_strings(
            &bytes,
            &message.data,
            count,
            self.file.superblock(),
        )?)
    }
}

fn trim_fixed_string(raw: &[u8], padding: StringPad) -> String {
    let end = match padding {
        StringPad::NullTerminate | StringPad::NullPad => {
            raw.iter().position(|&b| b == 0).unwrap_or(raw.len())
        }
        StringPad::SpacePad => raw
            .iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |pos| pos + 1),
    };
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_null_terminated() {
        assert_eq!(
            trim_fixed_string(b"meters\0\0", StringPad::NullTerminate),
            "meters"
        );
    }

    #[test]
    fn trims_space_padded() {
        assert_eq!(trim_fixed_string(b"km   ", StringPad::SpacePad), "km");
        assert_eq!(trim_fixed_string(b"     ", StringPad::SpacePad), "");
    }

    #[test]
    fn unterminated_uses_full_width() {
        assert_eq!(trim_fixed_string(b"abc", StringPad::NullPad), "abc");
    }
}
