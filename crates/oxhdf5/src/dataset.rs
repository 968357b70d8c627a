//! Dataset handles and the payload read path.

use std::collections::HashMap;
use std::sync::Arc;

use oxhdf5_format::data_layout::DataLayoutMessage;
use oxhdf5_format::dataspace::DataspaceMessage;
use oxhdf5_format::datatype::Datatype;
use oxhdf5_format::fill_value::{FillValueMessage, FillValueOldMessage};
use oxhdf5_format::filter_pipeline::FilterPipelineMessage;
use oxhdf5_format::filters::DecodePipeline;
use oxhdf5_format::FormatError;

use crate::attribute::Attribute;
use crate::chunks::{self, ChunkDecoder, ChunkStore};
use crate::error::Error;
use crate::file::FileInner;
use crate::node::{attributes_of, Group, NodeRecord};

/// A dataset handle.
///
/// Carries the dataset's decoded-chunk cache, which lives as long as this
/// handle (and its clones); metadata is fetched lazily through the shared
/// file caches.
#[derive(Clone)]
pub struct Dataset {
    file: Arc<FileInner>,
    record: Arc<NodeRecord>,
    chunks: Arc<ChunkStore>,
}

impl Dataset {
    pub(crate) fn new(file: Arc<FileInner>, record: Arc<NodeRecord>) -> Dataset {
        Dataset {
            file,
            record,
            chunks: Arc::new(ChunkStore::new()),
        }
    }

    /// The dataset's name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The dataset's absolute path.
    pub fn path(&self) -> String {
        self.record.path()
    }

    /// The dataset's object header address.
    pub fn address(&self) -> u64 {
        self.record.address
    }

    /// The parent group.
    pub fn parent(&self) -> Option<Group> {
        self.record
            .parent
            .as_ref()
            .map(|p| Group::new(Arc::clone(&self.file), Arc::clone(p)))
    }

    /// The dataset's attributes, keyed by name.
    pub fn attributes(&self) -> Result<HashMap<String, Attribute>, Error> {
        attributes_of(&self.file, self.record.address)
    }

    /// One attribute by name.
    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>, Error> {
        Ok(self.attributes()?.remove(name))
    }

    /// The dataset's dimensions; empty for a scalar.
    pub fn dimensions(&self) -> Result<Vec<u64>, Error> {
        self.file.ensure_open()?;
        Ok(self.dataspace()?.dimensions)
    }

    /// The dataset's datatype.
    pub fn datatype(&self) -> Result<Datatype, Error> {
        self.file.ensure_open()?;
        let header = self.file.header(self.record.address)?;
        header
            .first_message::<Datatype>(self.file.superblock())?
            .ok_or_else(|| self.missing("datatype"))
    }

    /// Number of decoded chunks currently held by this handle's cache.
    pub fn cached_chunk_count(&self) -> usize {
        self.chunks.cached_count()
    }

    /// Is the chunk with the given origin decoded in this handle's cache?
    pub fn chunk_is_cached(&self, origin: &[u64]) -> bool {
        self.chunks.is_cached(origin)
    }

    /// Read the full payload as raw little-endian bytes in row-major
    /// element order. The buffer holds `element count × element size`
    /// bytes.
    pub fn read_raw(&self) -> Result<Vec<u8>, Error> {
        self.file.ensure_open()?;
        let header = self.file.header(self.record.address)?;
        let superblock = self.file.superblock();

        let dataspace = self.dataspace()?;
        let datatype = self.datatype()?;
        let layout = header
            .first_message::<DataLayoutMessage>(superblock)?
            .ok_or_else(|| self.missing("data layout"))?;

        let elements = dataspace.element_count()?;
        let elem_size = datatype.size() as u64;
        let expected = elements.checked_mul(elem_size).ok_or_else(|| {
            Error::Format(FormatError::CorruptHeader {
                address: self.record.address,
                detail: "payload size overflows".into(),
            })
        })?;

        log::debug!(
            "reading dataset {}: {elements} × {elem_size} bytes",
            self.path()
        );

        match layout {
            DataLayoutMessage::Compact { data } => {
                if (data.len() as u64) < expected {
                    return Err(Error::Format(FormatError::CorruptHeader {
                        address: self.record.address,
                        detail: format!(
                            "compact payload holds {} bytes, expected {expected}",
                            data.len()
                        ),
                    }));
                }
                Ok(data[..expected as usize].to_vec())
            }
            DataLayoutMessage::Contiguous { address, size } => match address {
                Some(address) => {
                    let take = expected.min(size);
                    let mut out = self
                        .file
                        .channel
                        .read_at(self.file.channel.resolve(address)?, take as usize)?;
                    // Storage shorter than the extent (never written past
                    // `size`) pads with the fill value.
                    if (out.len() as u64) < expected {
                        let fill = self.fill_value(&header, elem_size as usize)?;
                        pad_with_fill(&mut out, expected as usize, &fill, elem_size as usize);
                    }
                    Ok(out)
                }
                None => {
                    // Storage never allocated: the whole extent is fill.
                    let fill = self.fill_value(&header, elem_size as usize)?;
                    let mut out = vec![0u8; expected as usize];
                    pad_with_fill(&mut out, expected as usize, &fill, elem_size as usize);
                    Ok(out)
                }
            },
            DataLayoutMessage::Chunked {
                chunk_dimensions,
                btree_address,
            } => {
                // The layout stores rank+1 dimensions; the trailing entry
                // is the element size.
                if chunk_dimensions.len() != dataspace.dimensions.len() + 1 {
                    return Err(Error::Format(FormatError::CorruptMessage {
                        msg_type: 0x0008,
                        detail: format!(
                            "chunk dimensionality {} does not fit rank {}",
                            chunk_dimensions.len(),
                            dataspace.dimensions.len()
                        ),
                    }));
                }
                let spatial: Vec<u64> = chunk_dimensions
                    [..chunk_dimensions.len() - 1]
                    .iter()
                    .map(|&d| d as u64)
                    .collect();

                let pipeline = header
                    .first_message::<FilterPipelineMessage>(superblock)?
                    .map(|msg| DecodePipeline::new(msg, Arc::clone(&self.file.registry)));
                let decoder = PipelineDecoder { pipeline };
                let fill = self.fill_value(&header, elem_size as usize)?;

                chunks::read_chunked(
                    &self.file.channel,
                    &self.chunks,
                    &decoder,
                    &dataspace.dimensions,
                    &spatial,
                    elem_size as usize,
                    btree_address,
                    &fill,
                )
            }
        }
    }

    fn dataspace(&self) -> Result<DataspaceMessage, Error> {
        let header = self.file.header(self.record.address)?;
        header
            .first_message::<DataspaceMessage>(self.file.superblock())?
            .ok_or_else(|| self.missing("dataspace"))
    }

    /// One element's fill bytes; empty means zero-fill.
    fn fill_value(
        &self,
        header: &oxhdf5_format::object_header::ObjectHeader,
        elem_size: usize,
    ) -> Result<Vec<u8>, Error> {
        let superblock = self.file.superblock();
        let value = match header.first_message::<FillValueMessage>(superblock)? {
            Some(FillValueMessage { value: Some(v) }) => Some(v),
            _ => header
                .first_message::<FillValueOldMessage>(superblock)?
                .and_then(|m| m.value),
        };
        match value {
            Some(v) if v.len() == elem_size => Ok(v),
            Some(v) => Err(Error::Format(FormatError::CorruptMessage {
                msg_type: 0x0005,
                detail: format!(
                    "fill value holds {} bytes for {elem_size}-byte elements",
                    v.len()
                ),
            })),
            None => Ok(Vec::new()),
        }
    }

    fn missing(&self, what: &str) -> Error {
        Error::Format(FormatError::CorruptHeader {
            address: self.record.address,
            detail: format!("dataset without a {what} message"),
        })
    }
}

/// Extend `out` to `expected` bytes using the fill pattern (zeroes when the
/// pattern is empty).
fn pad_with_fill(out: &mut Vec<u8>, expected: usize, fill: &[u8], elem_size: usize) {
    let start = out.len();
    out.resize(expected, 0);
    if fill.is_empty() || fill.iter().all(|&b| b == 0) || elem_size == 0 {
        return;
    }
    // Fill whole elements from the first untouched element boundary.
    let first_element = start.div_ceil(elem_size);
    for element in out[first_element * elem_size..].chunks_mut(elem_size) {
        let n = fill.len().min(element.len());
        element[..n].copy_from_slice(&fill[..n]);
    }
}

/// The production chunk decoder: the dataset's filter pipeline, or a pass-
/// through when the dataset is unfiltered.
struct PipelineDecoder {
    pipeline: Option<DecodePipeline>,
}

impl ChunkDecoder for PipelineDecoder {
    fn decode(&self, encoded: Vec<u8>, filter_mask: u32) -> Result<Vec<u8>, Error> {
        match &self.pipeline {
            Some(pipeline) => Ok(pipeline.decode(encoded, filter_mask)?),
            None => Ok(encoded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_with_fill_zero_pattern() {
        let mut out = vec![1u8, 2];
        pad_with_fill(&mut out, 6, &[], 2);
        assert_eq!(out, vec![1, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn pad_with_fill_pattern() {
        let mut out = vec![1u8, 2];
        pad_with_fill(&mut out, 6, &[0xAB, 0xCD], 2);
        assert_eq!(out, vec![1, 2, 0xAB, 0xCD, 0xAB, 0xCD]);
    }

    #[test]
    fn pad_with_fill_partial_element_boundary() {
        // Started mid-element: only whole untouched elements get the
        // pattern.
        let mut out = vec![9u8; 3];
        pad_with_fill(&mut out, 8, &[0x11, 0x22], 2);
        assert_eq!(out, vec![9, 9, 9, 0, 0x11, 0x22, 0x11, 0x22]);
    }
}
