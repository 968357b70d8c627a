//! Global heap collection decoding (`GCOL`), the store for variable-length
//! data referenced by `(collection address, object index)` pairs.

use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::superblock::Superblock;

/// One object in a global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    /// 1-based object index within the collection.
    pub index: u16,
    /// Number of references held to this object.
    pub reference_count: u16,
    /// Object payload.
    pub data: Vec<u8>,
}

/// A parsed global heap collection.
#[derive(Debug, Clone)]
pub struct GlobalHeapCollection {
    /// File address of the collection.
    pub address: u64,
    /// Objects in on-disk order.
    pub objects: Vec<GlobalHeapObject>,
}

fn pad8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

impl GlobalHeapCollection {
    /// Parse the collection at `address`.
    pub fn parse(
        data: &[u8],
        address: u64,
        superblock: &Superblock,
    ) -> Result<GlobalHeapCollection, FormatError> {
        let site = Site::Heap { address };
        let mut cur = Cursor::at(data, address as usize, site)?;

        if cur.bytes(4)? != b"GCOL" {
            return Err(site.corrupt("bad global heap signature"));
        }
        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "global heap collection",
                version,
            });
        }
        cur.skip(3)?; // reserved

        let collection_size = cur.length(superblock.length_size)? as usize;
        let end = (address as usize)
            .checked_add(collection_size)
            .ok_or_else(|| site.corrupt("collection size overflows"))?;
        if end > data.len() {
            return Err(site.corrupt("collection extends past end of file"));
        }

        let mut objects = Vec::new();
        while cur.position() + 2 <= end {
            let index = cur.u16()?;
            if index == 0 {
                break; // free space marker
            }
            let reference_count = cur.u16()?;
            cur.u32()?; // reserved
            let object_size = cur.length(superblock.length_size)? as usize;
            let payload = cur.bytes(object_size)?.to_vec();
            cur.skip(pad8(object_size) - object_size)?;
            objects.push(GlobalHeapObject {
                index,
                reference_count,
                data: payload,
            });
        }

        Ok(GlobalHeapCollection { address, objects })
    }

    /// Look up an object by its 1-based index.
    pub fn object(&self, index: u16) -> Option<&GlobalHeapObject> {
        self.objects.iter().find(|o| o.index == index)
    }
}
