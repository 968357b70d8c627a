//! B-tree v2 traversal (`BTHD` / `BTIN` / `BTLF`).
//!
//! Every node image carries a Jenkins lookup3 checksum over its used bytes;
//! verification is unconditional and a mismatch aborts with the failing
//! node's address. Record types decoded: 5 (link name), 6 (link creation
//! order), 8 (attribute name).

use crate::checksum::jenkins_lookup3;
use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::superblock::Superblock;

/// Record type: links indexed by name hash.
pub const RECORD_LINK_NAME: u8 = 5;
/// Record type: links indexed by creation order.
pub const RECORD_LINK_CREATION_ORDER: u8 = 6;
/// Record type: attribute names for dense attribute storage.
pub const RECORD_ATTRIBUTE_NAME: u8 = 8;

/// A typed B-tree v2 record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Type 5: lookup3 hash of the link name plus the fractal heap id of
    /// the link message.
    LinkName { name_hash: u32, heap_id: Vec<u8> },
    /// Type 6: link creation order plus the heap id of the link message.
    LinkCreationOrder { creation_order: u64, heap_id: Vec<u8> },
    /// Type 8: heap id of the attribute message plus its flags, creation
    /// order, and name hash.
    AttributeName {
        heap_id: Vec<u8>,
        flags: u8,
        creation_order: u32,
        name_hash: u32,
    },
    /// Any record type without a dedicated decoding.
    Other(Vec<u8>),
}

/// A parsed B-tree v2 header.
#[derive(Debug, Clone)]
pub struct BTreeV2 {
    /// File address of the header.
    pub address: u64,
    /// Record type stored in this tree.
    pub record_type: u8,
    /// Size of every node image in bytes.
    pub node_size: u32,
    /// Size of one record in bytes.
    pub record_size: u16,
    /// Tree depth; 0 means the root is a leaf.
    pub depth: u16,
    /// Root node address.
    pub root_address: u64,
    /// Record count in the root node.
    pub root_records: u16,
    /// Record count over the whole tree.
    pub total_records: u64,
}

impl BTreeV2 {
    /// Parse and checksum-verify the header at `address`.
    pub fn parse(data: &[u8], address: u64, superblock: &Superblock) -> Result<Self, FormatError> {
        let site = Site::BTree { address };
        let mut cur = Cursor::at(data, address as usize, site)?;

        if cur.bytes(4)? != b"BTHD" {
            return Err(site.corrupt("bad B-tree v2 header signature"));
        }
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "B-tree v2 header",
                version,
            });
        }
        let record_type = cur.u8()?;
        let node_size = cur.u32()?;
        let record_size = cur.u16()?;
        let depth = cur.u16()?;
        cur.u8()?; // split percent
        cur.u8()?; // merge percent
        let root_address = cur
            .addr(superblock.offset_size)?
            .unwrap_or(u64::MAX);
        let root_records = cur.u16()?;
        let total_records = cur.length(superblock.length_size)?;

        let checksum_pos = cur.position();
        let stored = cur.u32()?;
        let computed = jenkins_lookup3(&data[address as usize..checksum_pos]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch { address });
        }

        if node_size < 16 || record_size == 0 {
            return Err(site.corrupt(format!(
                "implausible node size {node_size} / record size {record_size}"
            )));
        }
        if depth > 64 {
            return Err(site.corrupt(format!("implausible tree depth {depth}")));
        }

        Ok(BTreeV2 {
            address,
            record_type,
            node_size,
            record_size,
            depth,
            root_address,
            root_records,
            total_records,
        })
    }

    /// Collect every record by full traversal, in key order.
    pub fn records(
        &self,
        data: &[u8],
        superblock: &Superblock,
    ) -> Result<Vec<Record>, FormatError> {
        if self.total_records == 0 || self.root_address == u64::MAX {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        self.walk(
            data,
            self.root_address,
            self.root_records as u64,
            self.depth,
            superblock,
            &mut out,
        )?;
        Ok(out)
    }

    fn walk(
        &self,
        data: &[u8],
        address: u64,
        num_records: u64,
        depth: u16,
        superblock: &Superblock,
        out: &mut Vec<Record>,
    ) -> Result<(), FormatError> {
        if depth == 0 {
            self.read_leaf(data, address, num_records, out)
        } else {
            self.read_internal(data, address, num_records, depth, superblock, out)
        }
    }

    fn read_leaf(
        &self,
        data: &[u8],
        address: u64,
        num_records: u64,
        out: &mut Vec<Record>,
    ) -> Result<(), FormatError> {
        let site = Site::BTree { address };
        let mut cur = Cursor::at(data, address as usize, site)?;
        if cur.bytes(4)? != b"BTLF" {
            return Err(site.corrupt("bad leaf node signature"));
        }
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "B-tree v2 leaf node",
                version,
            });
        }
        if cur.u8()? != self.record_type {
            return Err(site.corrupt("leaf node record type differs from header"));
        }

        let mut records = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let raw = cur.bytes(self.record_size as usize)?;
            records.push(self.decode_record(raw, &cur)?);
        }

        verify_node_checksum(data, address, cur.position())?;
        out.extend(records);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_internal(
        &self,
        data: &[u8],
        address: u64,
        num_records: u64,
        depth: u16,
        superblock: &Superblock,
        out: &mut Vec<Record>,
    ) -> Result<(), FormatError> {
        let site = Site::BTree { address };
        let mut cur = Cursor::at(data, address as usize, site)?;
        if cur.bytes(4)? != b"BTIN" {
            return Err(site.corrupt("bad internal node signature"));
        }
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "B-tree v2 internal node",
                version,
            });
        }
        if cur.u8()? != self.record_type {
            return Err(site.corrupt("internal node record type differs from header"));
        }

        let mut records = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let raw = cur.bytes(self.record_size as usize)?;
            records.push(self.decode_record(raw, &cur)?);
        }

        // Child pointers: address + child record count + (for depth > 1) the
        // child subtree's total record count, both variable width.
        let child_depth = depth - 1;
        let (child_max, child_total_max) = self.node_capacity(child_depth, superblock);
        let nrec_width = width_for(child_max);
        let total_width = if child_depth > 0 {
            width_for(child_total_max)
        } else {
            0
        };

        let mut children = Vec::with_capacity(num_records as usize + 1);
        for _ in 0..=num_records {
            let child_address = cur
                .addr(superblock.offset_size)?
                .ok_or_else(|| cur.corrupt("undefined child node address"))?;
            let child_records = cur.var_uint(nrec_width)?;
            if total_width > 0 {
                cur.var_uint(total_width)?;
            }
            children.push((child_address, child_records));
        }

        verify_node_checksum(data, address, cur.position())?;

        // Key order: child 0, record 0, child 1, record 1, ...
        for (i, (child_address, child_records)) in children.into_iter().enumerate() {
            self.walk(data, child_address, child_records, child_depth, superblock, out)?;
            if i < records.len() {
                out.push(records[i].clone());
            }
        }
        Ok(())
    }

    fn decode_record(&self, raw: &[u8], cur: &Cursor<'_>) -> Result<Record, FormatError> {
        let mut rec = Cursor::new(raw, cur.site());
        match self.record_type {
            RECORD_LINK_NAME => {
                let name_hash = rec.u32()?;
                let heap_id = rec.bytes(rec.remaining())?.to_vec();
                Ok(Record::LinkName { name_hash, heap_id })
            }
            RECORD_LINK_CREATION_ORDER => {
                let creation_order = rec.u64()?;
                let heap_id = rec.bytes(rec.remaining())?.to_vec();
                Ok(Record::LinkCreationOrder {
                    creation_order,
                    heap_id,
                })
            }
            RECORD_ATTRIBUTE_NAME => {
                // heap id takes whatever precedes flags(1) + order(4) + hash(4).
                let fixed_tail = 9usize;
                let id_len = raw
                    .len()
                    .checked_sub(fixed_tail)
                    .ok_or_else(|| cur.corrupt("attribute name record too small"))?;
                let heap_id = rec.bytes(id_len)?.to_vec();
                let flags = rec.u8()?;
                let creation_order = rec.u32()?;
                let name_hash = rec.u32()?;
                Ok(Record::AttributeName {
                    heap_id,
                    flags,
                    creation_order,
                    name_hash,
                })
            }
            _ => Ok(Record::Other(raw.to_vec())),
        }
    }

    /// Maximum records a node at `depth` can hold, and the maximum total
    /// records of a subtree rooted there. Determines the variable field
    /// widths in internal child pointers.
    fn node_capacity(&self, depth: u16, superblock: &Superblock) -> (u64, u64) {
        // Node overhead: signature(4) + version(1) + type(1) + checksum(4).
        let usable = self.node_size.saturating_sub(10) as u64;
        let record = self.record_size as u64;
        if depth == 0 {
            let m = usable / record.max(1);
            return (m, m);
        }
        let (child_max, child_total) = self.node_capacity(depth - 1, superblock);
        let nrec_width = width_for(child_max) as u64;
        let total_width = if depth > 1 {
            width_for(child_total) as u64
        } else {
            0
        };
        let pointer = superblock.offset_size as u64 + nrec_width + total_width;
        let m = usable.saturating_sub(pointer) / (record + pointer).max(1);
        let total = m.saturating_add(m.saturating_add(1).saturating_mul(child_total));
        (m, total)
    }
}

/// Bytes needed to hold values up to `max` (at least 1).
fn width_for(max: u64) -> usize {
    let bits = 64 - max.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Verify the lookup3 checksum stored at `end` over the node's used prefix.
fn verify_node_checksum(data: &[u8], address: u64, end: usize) -> Result<(), FormatError> {
    let site = Site::BTree { address };
    if end + 4 > data.len() {
        return Err(site.corrupt("node checksum past end of file"));
    }
    let stored = u32::from_le_bytes([data[end], data[end + 1], data[end + 2], data[end + 3]]);
    let computed = jenkins_lookup3(&data[address as usize..end]);
    if stored != computed {
        return Err(FormatError::ChecksumMismatch { address });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sb() -> Superblock {
        Superblock {
            version: 2,
            offset_size: 8,
            length_size: 8,
            base_address: 0,
            eof_address: 1 << 20,
            root_group_address: 48,
            group_leaf_node_k: None,
            group_internal_node_k: None,
            indexed_storage_internal_node_k: None,
        }
    }

    fn build_header(
        record_type: u8,
        node_size: u32,
        record_size: u16,
        depth: u16,
        root_address: u64,
        root_records: u16,
        total_records: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BTHD");
        buf.push(0);
        buf.push(record_type);
        buf.extend_from_slice(&node_size.to_le_bytes());
        buf.extend_from_slice(&record_size.to_le_bytes());
        buf.extend_from_slice(&depth.to_le_bytes());
        buf.push(85);
        buf.push(40);
        buf.extend_from_slice(&root_address.to_le_bytes());
        buf.extend_from_slice(&root_records.to_le_bytes());
        buf.extend_from_slice(&total_records.to_le_bytes());
        let checksum = jenkins_lookup3(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn build_leaf(record_type: u8, records: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BTLF");
        buf.push(0);
        buf.push(record_type);
        for rec in records {
            buf.extend_from_slice(rec);
        }
        let checksum = jenkins_lookup3(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn link_name_record(hash: u32, heap_id: &[u8; 7]) -> Vec<u8> {
        let mut rec = Vec::new();
        rec.extend_from_slice(&hash.to_le_bytes());
        rec.extend_from_slice(heap_id);
        rec
    }

    #[test]
    fn header_fields() {
        let data = build_header(5, 512, 11, 0, 0x1000, 3, 3);
        let tree = BTreeV2::parse(&data, 0, &sb()).unwrap();
        assert_eq!(tree.record_type, 5);
        assert_eq!(tree.node_size, 512);
        assert_eq!(tree.record_size, 11);
        assert_eq!(tree.depth, 0);
        assert_eq!(tree.root_address, 0x1000);
        assert_eq!(tree.total_records, 3);
    }

    #[test]
    fn header_checksum_mismatch() {
        let mut data = build_header(5, 512, 11, 0, 0x1000, 3, 3);
        data[6] ^= 0xFF;
        let err = BTreeV2::parse(&data, 0, &sb()).unwrap_err();
        assert_eq!(err, FormatError::ChecksumMismatch { address: 0 });
    }

    #[test]
    fn header_bad_signature() {
        let mut data = build_header(5, 512, 11, 0, 0, 0, 0);
        data[0] = b'Z';
        assert!(matches!(
            BTreeV2::parse(&data, 0, &sb()).unwrap_err(),
            FormatError::CorruptBTree { .. }
        ));
    }

    #[test]
    fn empty_tree() {
        let data = build_header(5, 512, 11, 0, u64::MAX, 0, 0);
        let tree = BTreeV2::parse(&data, 0, &sb()).unwrap();
        assert!(tree.records(&data, &sb()).unwrap().is_empty());
    }

    #[test]
    fn leaf_records_decoded() {
        let rec1 = link_name_record(0x1111, b"AAAAAAA");
        let rec2 = link_name_record(0x2222, b"BBBBBBB");
        let leaf = build_leaf(5, &[rec1, rec2]);

        let leaf_at = 256usize;
        let header = build_header(5, 512, 11, 0, leaf_at as u64, 2, 2);
        let mut file = vec![0u8; 1024];
        file[..header.len()].copy_from_slice(&header);
        file[leaf_at..leaf_at + leaf.len()].copy_from_slice(&leaf);

        let tree = BTreeV2::parse(&file, 0, &sb()).unwrap();
        let records = tree.records(&file, &sb()).unwrap();
        assert_eq!(
            records,
            vec![
                Record::LinkName {
                    name_hash: 0x1111,
                    heap_id: b"AAAAAAA".to_vec()
                },
                Record::LinkName {
                    name_hash: 0x2222,
                    heap_id: b"BBBBBBB".to_vec()
                },
            ]
        );
    }

    #[test]
    fn leaf_corruption_localized() {
        let rec = link_name_record(0x1111, b"AAAAAAA");
        let leaf = build_leaf(5, &[rec]);
        let leaf_at = 256usize;
        let header = build_header(5, 512, 11, 0, leaf_at as u64, 1, 1);
        let mut file = vec![0u8; 1024];
        file[..header.len()].copy_from_slice(&header);
        file[leaf_at..leaf_at + leaf.len()].copy_from_slice(&leaf);

        // Flip one byte inside the leaf's record area.
        file[leaf_at + 8] ^= 0x01;

        let tree = BTreeV2::parse(&file, 0, &sb()).unwrap();
        let err = tree.records(&file, &sb()).unwrap_err();
        assert_eq!(
            err,
            FormatError::ChecksumMismatch {
                address: leaf_at as u64
            }
        );
    }

    #[test]
    fn attribute_record_decoded() {
        let mut rec = Vec::new();
        rec.extend_from_slice(b"HEAPID!8"); // 8-byte heap id
        rec.push(0x02); // flags
        rec.extend_from_slice(&7u32.to_le_bytes()); // creation order
        rec.extend_from_slice(&0xCAFEu32.to_le_bytes()); // name hash
        let leaf = build_leaf(8, &[rec]);

        let leaf_at = 128usize;
        let header = build_header(8, 512, 17, 0, leaf_at as u64, 1, 1);
        let mut file = vec![0u8; 512];
        file[..header.len()].copy_from_slice(&header);
        file[leaf_at..leaf_at + leaf.len()].copy_from_slice(&leaf);

        let tree = BTreeV2::parse(&file, 0, &sb()).unwrap();
        let records = tree.records(&file, &sb()).unwrap();
        assert_eq!(
            records,
            vec![Record::AttributeName {
                heap_id: b"HEAPID!8".to_vec(),
                flags: 0x02,
                creation_order: 7,
                name_hash: 0xCAFE,
            }]
        );
    }

    #[test]
    fn internal_node_traversal() {
        // Depth-1 tree: internal root with 1 record and 2 leaf children.
        let node_size = 512u32;
        let record_size = 11u16;
        let tree_hdr = build_header(5, node_size, record_size, 1, 1024, 1, 3);

        let leaf1 = build_leaf(5, &[link_name_record(1, b"1111111")]);
        let leaf2 = build_leaf(5, &[link_name_record(3, b"3333333")]);

        let mut file = vec![0u8; 4096];
        file[..tree_hdr.len()].copy_from_slice(&tree_hdr);
        file[2048..2048 + leaf1.len()].copy_from_slice(&leaf1);
        file[3072..3072 + leaf2.len()].copy_from_slice(&leaf2);

        // Internal node: BTIN, 1 record, 2 child pointers.
        // max leaf records = (512-10)/11 = 45 → nrec width 1 byte.
        let mut internal = Vec::new();
        internal.extend_from_slice(b"BTIN");
        internal.push(0);
        internal.push(5);
        internal.extend_from_slice(&link_name_record(2, b"2222222"));
        internal.extend_from_slice(&2048u64.to_le_bytes());
        internal.push(1); // child 0 record count
        internal.extend_from_slice(&3072u64.to_le_bytes());
        internal.push(1); // child 1 record count
        let checksum = jenkins_lookup3(&internal);
        internal.extend_from_slice(&checksum.to_le_bytes());
        file[1024..1024 + internal.len()].copy_from_slice(&internal);

        let tree = BTreeV2::parse(&file, 0, &sb()).unwrap();
        let records = tree.records(&file, &sb()).unwrap();
        let hashes: Vec<u32> = records
            .iter()
            .map(|r| match r {
                Record::LinkName { name_hash, .. } => *name_hash,
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(hashes, vec![1, 2, 3]);
    }

    #[test]
    fn width_helper() {
        assert_eq!(width_for(0), 1);
        assert_eq!(width_for(45), 1);
        assert_eq!(width_for(255), 1);
        assert_eq!(width_for(256), 2);
        assert_eq!(width_for(u64::MAX), 8);
    }
}
