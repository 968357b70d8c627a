//! Variable-length data resolution through the global heap.
//!
//! A variable-length element is stored as `length (4) + collection address
//! (offset size) + object index (4)`; the payload lives in a `GCOL`
//! collection.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::cursor::{Cursor, Site};
use crate::error::FormatError;
use crate::global_heap::GlobalHeapCollection;
use crate::superblock::Superblock;

/// Resolve `count` variable-length string elements from `raw`.
///
/// `raw` is the dataset or attribute payload holding the references;
/// `data` is the whole file, needed to reach the heap collections.
pub fn read_vlen_strings(
    data: &[u8],
    raw: &[u8],
    count: u64,
    superblock: &Superblock,
) -> Result<Vec<String>, FormatError> {
    let mut collections: HashMap<u64, GlobalHeapCollection> = HashMap::new();
    let site = Site::Heap { address: 0 };
    let mut cur = Cursor::new(raw, site);

    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let length = cur.u32()? as usize;
        let collection_address = cur
            .addr(superblock.offset_size)?
            .ok_or_else(|| cur.corrupt("undefined global heap address"))?;
        let index = cur.u32()? as u16;

        let collection = match collections.entry(collection_address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => {
                let abs = superblock
                    .base_address
                    .checked_add(collection_address)
                    .ok_or_else(|| Site::Heap { address: 0 }.corrupt("global heap address overflows"))?;
                slot.insert(GlobalHeapCollection::parse(data, abs, superblock)?)
            }
        };

        let object = collection.object(index).ok_or_else(|| {
            Site::Heap {
                address: collection.address,
            }
            .corrupt(format!("missing global heap object {index}"))
        })?;
        let bytes = object.data.get(..length).unwrap_or(&object.data);
        out.push(String::from_utf8_lossy(bytes).into_owned());
    }

    Ok(out)
}
