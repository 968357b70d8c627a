//! The lazy node tree: groups, datasets, and links.
//!
//! Node handles are cheap: an `Arc` of the shared file state plus an `Arc`
//! of an immutable record (address, name, parent chain). Parents are
//! reached through upward `Arc`s only, so there are no reference cycles;
//! children are materialized on demand and owned by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use oxhdf5_format::btree_v1;
use oxhdf5_format::btree_v2::{BTreeV2, Record};
use oxhdf5_format::cursor::{Cursor, Site};
use oxhdf5_format::fractal_heap::FractalHeap;
use oxhdf5_format::link_info::LinkInfoMessage;
use oxhdf5_format::link_message::{LinkMessage, LinkTarget};
use oxhdf5_format::local_heap::LocalHeap;
use oxhdf5_format::object_header::{DecodeMessage, ObjectHeader};
use oxhdf5_format::symbol_table::{SymbolTableMessage, SymbolTableNode};
use oxhdf5_format::{FormatError, MessageType};

use crate::attribute::Attribute;
use crate::dataset::Dataset;
use crate::error::Error;
use crate::file::FileInner;

/// Immutable identity of a node: its address, name, and parent chain.
pub(crate) struct NodeRecord {
    pub(crate) address: u64,
    pub(crate) name: String,
    pub(crate) parent: Option<Arc<NodeRecord>>,
}

impl NodeRecord {
    pub(crate) fn root(address: u64) -> NodeRecord {
        NodeRecord {
            address,
            name: String::new(),
            parent: None,
        }
    }

    pub(crate) fn child(parent: &Arc<NodeRecord>, name: &str, address: u64) -> NodeRecord {
        NodeRecord {
            address,
            name: name.to_string(),
            parent: Some(Arc::clone(parent)),
        }
    }

    /// Absolute path: `/` for the root, else the parent path joined with
    /// this node's name.
    pub(crate) fn path(&self) -> String {
        match &self.parent {
            None => "/".to_string(),
            Some(parent) => {
                let base = parent.path();
                if base == "/" {
                    format!("/{}", self.name)
                } else {
                    format!("{base}/{}", self.name)
                }
            }
        }
    }
}

/// Any member of the hierarchy.
pub enum Node {
    Group(Group),
    Dataset(Dataset),
    SoftLink(SoftLink),
    ExternalLink(ExternalLink),
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Group(_) => write!(f, "Node::Group"),
            Node::Dataset(_) => write!(f, "Node::Dataset"),
            Node::SoftLink(_) => write!(f, "Node::SoftLink"),
            Node::ExternalLink(_) => write!(f, "Node::ExternalLink"),
        }
    }
}

impl Node {
    /// The node's name; empty for the root group.
    pub fn name(&self) -> &str {
        match self {
            Node::Group(n) => n.name(),
            Node::Dataset(n) => n.name(),
            Node::SoftLink(n) => n.name(),
            Node::ExternalLink(n) => n.name(),
        }
    }

    /// The node's absolute path.
    pub fn path(&self) -> String {
        match self {
            Node::Group(n) => n.path(),
            Node::Dataset(n) => n.path(),
            Node::SoftLink(n) => n.path(),
            Node::ExternalLink(n) => n.path(),
        }
    }

    /// The object header address; `None` for soft and external links,
    /// which have no object of their own.
    pub fn address(&self) -> Option<u64> {
        match self {
            Node::Group(n) => Some(n.address()),
            Node::Dataset(n) => Some(n.address()),
            Node::SoftLink(_) | Node::ExternalLink(_) => None,
        }
    }

    /// The parent group; `None` only for the root.
    pub fn parent(&self) -> Option<Group> {
        match self {
            Node::Group(n) => n.parent(),
            Node::Dataset(n) => n.parent(),
            Node::SoftLink(n) => n.parent(),
            Node::ExternalLink(n) => n.parent(),
        }
    }

    /// The node's attributes; empty for links.
    pub fn attributes(&self) -> Result<HashMap<String, Attribute>, Error> {
        match self {
            Node::Group(n) => n.attributes(),
            Node::Dataset(n) => n.attributes(),
            Node::SoftLink(_) | Node::ExternalLink(_) => Ok(HashMap::new()),
        }
    }

    /// One attribute by name; `None` when absent (always for links).
    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>, Error> {
        match self {
            Node::Group(n) => n.attribute(name),
            Node::Dataset(n) => n.attribute(name),
            Node::SoftLink(_) | Node::ExternalLink(_) => Ok(None),
        }
    }
}

/// One named edge out of a group, before the child node is built.
struct LinkEntry {
    name: String,
    creation_order: Option<u64>,
    target: LinkTarget,
}

/// A group handle.
#[derive(Clone)]
pub struct Group {
    file: Arc<FileInner>,
    record: Arc<NodeRecord>,
}

impl Group {
    pub(crate) fn new(file: Arc<FileInner>, record: Arc<NodeRecord>) -> Group {
        Group { file, record }
    }

    /// The group's name; empty for the root.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The group's absolute path.
    pub fn path(&self) -> String {
        self.record.path()
    }

    /// The group's object header address.
    pub fn address(&self) -> u64 {
        self.record.address
    }

    /// The parent group; `None` for the root.
    pub fn parent(&self) -> Option<Group> {
        self.record
            .parent
            .as_ref()
            .map(|p| Group::new(Arc::clone(&self.file), Arc::clone(p)))
    }

    /// The group's attributes, keyed by name.
    pub fn attributes(&self) -> Result<HashMap<String, Attribute>, Error> {
        attributes_of(&self.file, self.record.address)
    }

    /// One attribute by name.
    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>, Error> {
        Ok(self.attributes()?.remove(name))
    }

    /// Materialize the group's children.
    ///
    /// Ordered by link creation order when every link carries one, else by
    /// name.
    pub fn children(&self) -> Result<Vec<Node>, Error> {
        self.file.ensure_open()?;
        let header = self.file.header(self.record.address)?;
        let mut entries = self.collect_entries(&header)?;

        if !entries.is_empty() && entries.iter().all(|e| e.creation_order.is_some()) {
            entries.sort_by_key(|e| e.creation_order);
        } else {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
        }

        log::trace!("group {} has {} children", self.path(), entries.len());
        entries
            .into_iter()
            .map(|entry| self.build_child(entry))
            .collect()
    }

    /// One child by name, or [`Error::NotFound`] with the child's path.
    pub fn child(&self, name: &str) -> Result<Node, Error> {
        self.file.ensure_open()?;
        let header = self.file.header(self.record.address)?;
        let entries = self.collect_entries(&header)?;
        let entry = entries
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                Error::NotFound(
                    NodeRecord::child(&self.record, name, 0).path(),
                )
            })?;
        self.build_child(entry)
    }

    fn build_child(&self, entry: LinkEntry) -> Result<Node, Error> {
        let record = Arc::new(NodeRecord::child(
            &self.record,
            &entry.name,
            match entry.target {
                LinkTarget::Hard { address } => address,
                _ => 0,
            },
        ));

        match entry.target {
            LinkTarget::Hard { address } => {
                let header = self.file.header(address)?;
                if header.has_message_type(MessageType::DataLayout) {
                    Ok(Node::Dataset(Dataset::new(
                        Arc::clone(&self.file),
                        record,
                    )))
                } else {
                    Ok(Node::Group(Group::new(Arc::clone(&self.file), record)))
                }
            }
            LinkTarget::Soft { target } => Ok(Node::SoftLink(SoftLink {
                file: Arc::clone(&self.file),
                record,
                target,
            })),
            LinkTarget::External { file_name, target } => {
                Ok(Node::ExternalLink(ExternalLink {
                    file: Arc::clone(&self.file),
                    record,
                    file_name,
                    target,
                }))
            }
        }
    }

    /// Gather the group's links from whichever storage flavor it uses.
    fn collect_entries(&self, header: &ObjectHeader) -> Result<Vec<LinkEntry>, Error> {
        let superblock = self.file.superblock();
        let mut entries = Vec::new();

        // Legacy v1 groups: symbol table B-tree plus local heap.
        if let Some(symbol_table) = header.first_message::<SymbolTableMessage>(superblock)? {
            entries.extend(self.collect_symbol_table_entries(&symbol_table)?);
        }

        // Modern compact groups: inline link messages.
        for link in header.messages_of::<LinkMessage>(superblock)? {
            entries.push(LinkEntry {
                name: link.name,
                creation_order: link.creation_order,
                target: link.target,
            });
        }

        // Modern dense groups: link messages in a fractal heap, indexed by
        // a B-tree v2.
        if let Some(info) = header.first_message::<LinkInfoMessage>(superblock)? {
            if let Some(heap_address) = info.fractal_heap_address {
                entries.extend(self.collect_dense_entries(&info, heap_address)?);
            }
        }

        Ok(entries)
    }

    fn collect_symbol_table_entries(
        &self,
        symbol_table: &SymbolTableMessage,
    ) -> Result<Vec<LinkEntry>, Error> {
        let superblock = self.file.superblock();
        let channel = &self.file.channel;
        let bytes = channel.bytes()?;

        let heap = LocalHeap::parse(
            &bytes,
            channel.resolve(symbol_table.local_heap_address)?,
            superblock,
        )?;

        let mut entries = Vec::new();
        let node_addresses = btree_v1::collect_group_nodes(
            &bytes,
            channel.resolve(symbol_table.btree_address)?,
            superblock,
        )?;
        for node_address in node_addresses {
            let node =
                SymbolTableNode::parse(&bytes, channel.resolve(node_address)?, superblock)?;
            for entry in &node.entries {
                let name = heap.string_at(&bytes, entry.link_name_offset)?;
                let target = match entry.symlink_target_offset() {
                    Some(offset) => LinkTarget::Soft {
                        target: heap.string_at(&bytes, offset)?,
                    },
                    None => LinkTarget::Hard {
                        address: entry.object_header_address,
                    },
                };
                entries.push(LinkEntry {
                    name,
                    creation_order: None,
                    target,
                });
            }
        }
        Ok(entries)
    }

    fn collect_dense_entries(
        &self,
        info: &LinkInfoMessage,
        heap_address: u64,
    ) -> Result<Vec<LinkEntry>, Error> {
        let superblock = self.file.superblock();
        let channel = &self.file.channel;
        let bytes = channel.bytes()?;

        let index_address = info
            .name_index_address
            .or(info.creation_order_index_address)
            .ok_or_else(|| {
                Error::Format(FormatError::CorruptHeader {
                    address: self.record.address,
                    detail: "dense links without an index B-tree".into(),
                })
            })?;

        let heap = FractalHeap::parse(&bytes, channel.resolve(heap_address)?, superblock)?;
        let index = BTreeV2::parse(&bytes, channel.resolve(index_address)?, superblock)?;

        let mut entries = Vec::new();
        for record in index.records(&bytes, superblock)? {
            let heap_id = match record {
                Record::LinkName { heap_id, .. } => heap_id,
                Record::LinkCreationOrder { heap_id, .. } => heap_id,
                _ => continue,
            };
            let raw = heap.read_object(&bytes, &heap_id, superblock)?;
            let mut cur = Cursor::new(
                &raw,
                Site::Message {
                    msg_type: MessageType::Link.code(),
                },
            );
            let link = LinkMessage::decode(&mut cur, superblock)?;
            entries.push(LinkEntry {
                name: link.name,
                creation_order: link.creation_order,
                target: link.target,
            });
        }
        Ok(entries)
    }
}

/// A soft (symbolic) link: a path string resolved by the caller.
pub struct SoftLink {
    file: Arc<FileInner>,
    record: Arc<NodeRecord>,
    target: String,
}

impl SoftLink {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn path(&self) -> String {
        self.record.path()
    }

    pub fn parent(&self) -> Option<Group> {
        self.record
            .parent
            .as_ref()
            .map(|p| Group::new(Arc::clone(&self.file), Arc::clone(p)))
    }

    /// The link's target path within this file.
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// An external link: a file name plus a path within that file.
pub struct ExternalLink {
    file: Arc<FileInner>,
    record: Arc<NodeRecord>,
    file_name: String,
    target: String,
}

impl ExternalLink {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn path(&self) -> String {
        self.record.path()
    }

    pub fn parent(&self) -> Option<Group> {
        self.record
            .parent
            .as_ref()
            .map(|p| Group::new(Arc::clone(&self.file), Arc::clone(p)))
    }

    /// The target file's name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The target path within the external file.
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Shared attribute-map materialization for groups and datasets.
pub(crate) fn attributes_of(
    file: &Arc<FileInner>,
    address: u64,
) -> Result<HashMap<String, Attribute>, Error> {
    file.ensure_open()?;
    let messages = file.attribute_messages(address)?;
    let mut map = HashMap::with_capacity(messages.len());
    for index in 0..messages.len() {
        let attribute = Attribute::new(Arc::clone(file), Arc::clone(&messages), index);
        map.insert(attribute.name().to_string(), attribute);
    }
    Ok(map)
}
