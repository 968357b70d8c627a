//! The file handle and the per-file caches.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use oxhdf5_format::attribute::AttributeMessage;
use oxhdf5_format::attribute_info::AttributeInfoMessage;
use oxhdf5_format::btree_v2::{BTreeV2, Record};
use oxhdf5_format::cursor::{Cursor, Site};
use oxhdf5_format::filters::FilterRegistry;
use oxhdf5_format::fractal_heap::FractalHeap;
use oxhdf5_format::object_header::{DecodeMessage, ObjectHeader};
use oxhdf5_format::{MessageType, Superblock};
use oxhdf5_io::{ByteSource, FileSource, MemorySource, MmapSource};

use crate::channel::FileChannel;
use crate::error::Error;
use crate::lazy::Lazy;
use crate::node::{Group, NodeRecord};

/// Shared state behind every node and dataset handle.
pub(crate) struct FileInner {
    pub(crate) channel: FileChannel,
    pub(crate) registry: Arc<FilterRegistry>,
    headers: Mutex<HashMap<u64, Arc<Lazy<ObjectHeader, Error>>>>,
    attributes: Mutex<HashMap<u64, Arc<Lazy<Vec<AttributeMessage>, Error>>>>,
}

impl FileInner {
    pub(crate) fn superblock(&self) -> &Superblock {
        self.channel.superblock()
    }

    /// Fail with [`Error::Closed`] once the channel is closed, even for
    /// operations that could be answered from caches.
    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        if self.channel.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// The object header at a file-relative address, parsed at most once.
    pub(crate) fn header(&self, address: u64) -> Result<Arc<ObjectHeader>, Error> {
        let cell = {
            let mut map = self.headers.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(address).or_default().clone()
        };
        cell.get(|| {
            log::trace!("parsing object header at {address:#x}");
            let abs = self.channel.resolve(address)?;
            let bytes = self.channel.bytes()?;
            ObjectHeader::parse(&bytes, abs, self.superblock()).map_err(Error::from)
        })
    }

    /// The attribute messages of the object at `address`, combining inline
    /// messages with dense storage, materialized at most once.
    pub(crate) fn attribute_messages(
        &self,
        address: u64,
    ) -> Result<Arc<Vec<AttributeMessage>>, Error> {
        let cell = {
            let mut map = self
                .attributes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            map.entry(address).or_default().clone()
        };
        cell.get(|| {
            log::trace!("materializing attributes for object at {address:#x}");
            let header = self.header(address)?;
            self.collect_attribute_messages(&header)
        })
    }

    fn collect_attribute_messages(
        &self,
        header: &ObjectHeader,
    ) -> Result<Vec<AttributeMessage>, Error> {
        let superblock = self.superblock();
        let mut messages: Vec<AttributeMessage> = header.messages_of(superblock)?;

        // Dense storage: attribute messages in a fractal heap, indexed by a
        // B-tree v2 of type-8 records.
        if let Some(info) = header.first_message::<AttributeInfoMessage>(superblock)? {
            if let Some(heap_address) = info.fractal_heap_address {
                let index_address = info
                    .name_index_address
                    .or(info.creation_order_index_address)
                    .ok_or_else(|| {
                        Error::Format(oxhdf5_format::FormatError::CorruptHeader {
                            address: header.address,
                            detail: "dense attributes without an index B-tree".into(),
                        })
                    })?;

                let bytes = self.channel.bytes()?;
                let heap =
                    FractalHeap::parse(&bytes, self.channel.resolve(heap_address)?, superblock)?;
                let index =
                    BTreeV2::parse(&bytes, self.channel.resolve(index_address)?, superblock)?;

                for record in index.records(&bytes, superblock)? {
                    if let Record::AttributeName { heap_id, .. } = record {
                        let raw = heap.read_object(&bytes, &heap_id, superblock)?;
                        let mut cur = Cursor::new(
                            &raw,
                            Site::Message {
                                msg_type: MessageType::Attribute.code(),
                            },
                        );
                        messages.push(AttributeMessage::decode(&mut cur, superblock)?);
                    }
                }
            }
        }

        Ok(messages)
    }
}

/// An open, read-only HDF5 file.
///
/// Cheap to clone; all clones and every node handle derived from them share
/// one channel and one set of caches. [`Hdf5File::close`] releases the
/// backing mapping for all of them at once.
#[derive(Clone)]
pub struct Hdf5File {
    inner: Arc<FileInner>,
}

impl Hdf5File {
    /// Open `path` through a read-only memory mapping.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Hdf5File, Error> {
        let source = MmapSource::open(path).map_err(|e| Error::io_at(0, e))?;
        Self::from_source(Box::new(source), FilterRegistry::builtin())
    }

    /// Open `path` by reading it fully into memory.
    pub fn open_buffered<P: AsRef<Path>>(path: P) -> Result<Hdf5File, Error> {
        let source = FileSource::open(path).map_err(|e| Error::io_at(0, e))?;
        Self::from_source(Box::new(source), FilterRegistry::builtin())
    }

    /// Open an in-memory HDF5 image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Hdf5File, Error> {
        Self::from_source(Box::new(MemorySource::new(data)), FilterRegistry::builtin())
    }

    /// Open `path` with a caller-provided filter registry.
    pub fn open_with_registry<P: AsRef<Path>>(
        path: P,
        registry: FilterRegistry,
    ) -> Result<Hdf5File, Error> {
        let source = MmapSource::open(path).map_err(|e| Error::io_at(0, e))?;
        Self::from_source(Box::new(source), registry)
    }

    /// Open an in-memory image with a caller-provided filter registry.
    pub fn from_bytes_with_registry(
        data: Vec<u8>,
        registry: FilterRegistry,
    ) -> Result<Hdf5File, Error> {
        Self::from_source(Box::new(MemorySource::new(data)), registry)
    }

    fn from_source(
        source: Box<dyn ByteSource>,
        registry: FilterRegistry,
    ) -> Result<Hdf5File, Error> {
        let channel = FileChannel::open(source)?;
        Ok(Hdf5File {
            inner: Arc::new(FileInner {
                channel,
                registry: Arc::new(registry),
                headers: Mutex::new(HashMap::new()),
                attributes: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The parsed superblock.
    pub fn superblock(&self) -> &Superblock {
        self.inner.superblock()
    }

    /// Total file size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.channel.size()
    }

    /// Release the backing mapping. Every node or dataset handle derived
    /// from this file (or any clone) subsequently fails with
    /// [`Error::Closed`].
    pub fn close(&self) {
        self.inner.channel.close();
    }

    /// The root group.
    pub fn root_group(&self) -> Group {
        Group::new(
            Arc::clone(&self.inner),
            Arc::new(NodeRecord::root(self.superblock().root_group_address)),
        )
    }
}

impl std::fmt::Debug for Hdf5File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5File")
            .field("size", &self.size())
            .field("superblock_version", &self.superblock().version)
            .field("closed", &self.inner.channel.is_closed())
            .finish()
    }
}
