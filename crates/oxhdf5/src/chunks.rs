//! The chunked-dataset read engine.
//!
//! A chunked dataset's payload is assembled from B-tree-indexed tiles. The
//! engine builds the chunk lookup once (a full B-tree traversal), decodes
//! each referenced chunk at most once into a monotonic per-dataset cache,
//! and scatters decoded tiles into the dense C-order output buffer as one
//! contiguous copy per valid row. Chunk origins with no B-tree entry were
//! never written and take the dataset's fill value.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use oxhdf5_format::btree_v1;
use oxhdf5_format::{FormatError, Superblock};

use crate::channel::FileChannel;
use crate::error::Error;
use crate::lazy::Lazy;

/// Cache and lookup key: a chunk's origin in element space, with its hash
/// computed once up front.
#[derive(Debug, Clone)]
pub(crate) struct ChunkKey {
    offsets: Vec<u64>,
    hash: u64,
}

impl ChunkKey {
    pub(crate) fn new(offsets: Vec<u64>) -> ChunkKey {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        offsets.hash(&mut hasher);
        let hash = hasher.finish();
        ChunkKey { offsets, hash }
    }

    pub(crate) fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}

impl PartialEq for ChunkKey {
    fn eq(&self, other: &Self) -> bool {
        self.offsets == other.offsets
    }
}

impl Eq for ChunkKey {}

impl Hash for ChunkKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Where one written chunk lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkLocation {
    pub address: u64,
    pub size: u32,
    pub filter_mask: u32,
}

/// Decodes one encoded chunk; the real implementation wraps the filter
/// pipeline, tests substitute counting or marking decoders.
pub(crate) trait ChunkDecoder: Send + Sync {
    fn decode(&self, encoded: Vec<u8>, filter_mask: u32) -> Result<Vec<u8>, Error>;
}

/// Per-dataset chunk state: the lazily built lookup map and the monotonic
/// decoded-chunk cache.
///
/// Both sides go through [`Lazy`], so concurrent readers of one dataset
/// traverse the B-tree once and decode each chunk exactly once.
pub(crate) struct ChunkStore {
    lookup: Lazy<HashMap<ChunkKey, ChunkLocation>, Error>,
    decoded: Mutex<HashMap<ChunkKey, Arc<Lazy<Vec<u8>, Error>>>>,
}

impl ChunkStore {
    pub(crate) fn new() -> ChunkStore {
        ChunkStore {
            lookup: Lazy::new(),
            decoded: Mutex::new(HashMap::new()),
        }
    }

    /// The chunk lookup map, built on first use.
    fn lookup_map<F>(&self, build: F) -> Result<Arc<HashMap<ChunkKey, ChunkLocation>>, Error>
    where
        F: FnOnce() -> Result<HashMap<ChunkKey, ChunkLocation>, Error>,
    {
        self.lookup.get(build)
    }

    /// The decoded bytes for `key`, decoding at most once across threads.
    fn decoded_chunk<F>(&self, key: &ChunkKey, decode: F) -> Result<Arc<Vec<u8>>, Error>
    where
        F: FnOnce() -> Result<Vec<u8>, Error>,
    {
        let cell = {
            let mut map = self.decoded.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.clone()).or_default().clone()
        };
        cell.get(decode)
    }

    /// Number of chunks currently decoded into the cache.
    pub(crate) fn cached_count(&self) -> usize {
        self.decoded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.is_ready())
            .count()
    }

    /// Is the chunk at `origin` decoded in the cache?
    pub(crate) fn is_cached(&self, origin: &[u64]) -> bool {
        let key = ChunkKey::new(origin.to_vec());
        self.decoded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .is_some_and(|cell| cell.is_ready())
    }
}

/// Read a whole chunked dataset into a dense row-major buffer.
///
/// `chunk_dims` holds the rank spatial chunk dimensions (the layout
/// message's trailing element-size dimension already stripped); `fill` is
/// one element's fill bytes, empty meaning zero.
#[allow(clippy::too_many_arguments)]
pub(crate) fn read_chunked(
    channel: &FileChannel,
    store: &ChunkStore,
    decoder: &dyn ChunkDecoder,
    dims: &[u64],
    chunk_dims: &[u64],
    elem_size: usize,
    btree_address: Option<u64>,
    fill: &[u8],
) -> Result<Vec<u8>, Error> {
    let rank = dims.len();
    if rank == 0 || elem_size == 0 || chunk_dims.len() != rank || chunk_dims.iter().any(|&c| c == 0) {
        return Err(Error::Format(FormatError::CorruptMessage {
            msg_type: 0x0008,
            detail: format!(
                "chunk rank {} does not match dataspace rank {rank}",
                chunk_dims.len()
            ),
        }));
    }

    let total_elements = dims
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(elem_size as u64))
        .ok_or_else(|| {
            Error::Format(FormatError::CorruptMessage {
                msg_type: 0x0001,
                detail: "dataset size overflows".into(),
            })
        })?;
    let total_bytes = usize::try_from(total_elements).map_err(|_| {
        Error::Format(FormatError::CorruptMessage {
            msg_type: 0x0001,
            detail: "dataset too large for this platform".into(),
        })
    })?;

    let mut output = vec![0u8; total_bytes];
    prefill(&mut output, fill, elem_size);

    let superblock = channel.superblock().clone();
    let lookup = store.lookup_map(|| build_lookup(channel, &superblock, btree_address, rank))?;

    let chunk_elements: u64 = chunk_dims.iter().product();
    let chunk_bytes = (chunk_elements as usize)
        .checked_mul(elem_size)
        .ok_or_else(|| {
            Error::Format(FormatError::CorruptMessage {
                msg_type: 0x0008,
                detail: "chunk size overflows".into(),
            })
        })?;

    // Walk the full chunk grid; written chunks are decoded and scattered,
    // unwritten origins keep the fill already in the output.
    let mut origin = vec![0u64; rank];
    loop {
        let key = ChunkKey::new(origin.clone());
        if let Some(location) = lookup.get(&key) {
            let location = *location;
            let decoded = store.decoded_chunk(&key, || {
                log::trace!("decoding chunk at {:?}", key.offsets());
                let encoded =
                    channel.read_at(channel.resolve(location.address)?, location.size as usize)?;
                decoder
                    .decode(encoded, location.filter_mask)
                    .map_err(|e| pin_to_chunk(e, location.address))
            })?;
            if decoded.len() < chunk_bytes {
                return Err(Error::Format(FormatError::CorruptHeader {
                    address: location.address,
                    detail: format!(
                        "decoded chunk holds {} bytes, expected {chunk_bytes}",
                        decoded.len()
                    ),
                }));
            }
            scatter_chunk(&mut output, &decoded, &origin, dims, chunk_dims, elem_size);
        }

        if !advance_origin(&mut origin, dims, chunk_dims) {
            break;
        }
    }

    Ok(output)
}

/// Filters report corruption without knowing where their bytes came from;
/// attach the chunk's file address to such errors.
fn pin_to_chunk(error: Error, chunk_address: u64) -> Error {
    match error {
        Error::Format(FormatError::CorruptHeader { address: 0, detail }) => {
            Error::Format(FormatError::CorruptHeader {
                address: chunk_address,
                detail,
            })
        }
        Error::Format(FormatError::ChecksumMismatch { address: 0 }) => {
            Error::Format(FormatError::ChecksumMismatch {
                address: chunk_address,
            })
        }
        other => other,
    }
}

/// Build the chunk lookup by one full traversal of the chunk B-tree.
fn build_lookup(
    channel: &FileChannel,
    superblock: &Superblock,
    btree_address: Option<u64>,
    rank: usize,
) -> Result<HashMap<ChunkKey, ChunkLocation>, Error> {
    let Some(address) = btree_address else {
        // Never-written dataset: every chunk takes the fill value.
        return Ok(HashMap::new());
    };

    let bytes = channel.bytes()?;
    let raw = btree_v1::collect_chunks(&bytes, channel.resolve(address)?, rank + 1, superblock)?;
    log::debug!("chunk B-tree at {address:#x} holds {} chunks", raw.len());

    let mut map = HashMap::with_capacity(raw.len());
    for chunk in raw {
        // The trailing offset element is the within-element byte offset;
        // spatial coordinates are the first `rank` values.
        let key = ChunkKey::new(chunk.offsets[..rank].to_vec());
        map.insert(
            key,
            ChunkLocation {
                address: chunk.address,
                size: chunk.size,
                filter_mask: chunk.filter_mask,
            },
        );
    }
    Ok(map)
}

/// Write the fill pattern across the whole output buffer.
fn prefill(output: &mut [u8], fill: &[u8], elem_size: usize) {
    if elem_size == 0 || fill.is_empty() || fill.iter().all(|&b| b == 0) {
        return; // the buffer is already zeroed
    }
    let pattern = if fill.len() == elem_size {
        fill
    } else {
        &fill[..fill.len().min(elem_size)]
    };
    for element in output.chunks_mut(elem_size) {
        let n = pattern.len().min(element.len());
        element[..n].copy_from_slice(&pattern[..n]);
    }
}

/// Copy one decoded chunk into the output: one contiguous copy per valid
/// row of the innermost dimension, skipping rows outside the dataset.
fn scatter_chunk(
    output: &mut [u8],
    decoded: &[u8],
    origin: &[u64],
    dims: &[u64],
    chunk_dims: &[u64],
    elem_size: usize,
) {
    let rank = dims.len();
    let inner = rank - 1;

    let inner_valid = if origin[inner] >= dims[inner] {
        0
    } else {
        chunk_dims[inner].min(dims[inner] - origin[inner]) as usize
    };
    if inner_valid == 0 {
        return;
    }
    let row_bytes = inner_valid * elem_size;

    // Row-major strides over the dataset and over one chunk.
    let mut dataset_strides = vec![1u64; rank];
    let mut chunk_strides = vec![1u64; rank];
    for d in (0..rank.saturating_sub(1)).rev() {
        dataset_strides[d] = dataset_strides[d + 1] * dims[d + 1];
        chunk_strides[d] = chunk_strides[d + 1] * chunk_dims[d + 1];
    }

    if inner == 0 {
        // 1-D dataset: a single row copy.
        let dst = origin[0] as usize * elem_size;
        output[dst..dst + row_bytes].copy_from_slice(&decoded[..row_bytes]);
        return;
    }

    let mut row = vec![0u64; inner];
    'rows: loop {
        let mut in_bounds = true;
        let mut src = 0u64;
        let mut dst = 0u64;
        for d in 0..inner {
            let coordinate = origin[d] + row[d];
            if coordinate >= dims[d] {
                in_bounds = false;
                break;
            }
            src += row[d] * chunk_strides[d];
            dst += coordinate * dataset_strides[d];
        }

        if in_bounds {
            let src = src as usize * elem_size;
            let dst = (dst + origin[inner]) as usize * elem_size;
            output[dst..dst + row_bytes].copy_from_slice(&decoded[src..src + row_bytes]);
        }

        // Odometer over the outer chunk coordinates.
        for d in (0..inner).rev() {
            row[d] += 1;
            if row[d] < chunk_dims[d] {
                continue 'rows;
            }
            row[d] = 0;
        }
        break;
    }
}

/// Step `origin` to the next chunk of the grid; false when exhausted.
fn advance_origin(origin: &mut [u64], dims: &[u64], chunk_dims: &[u64]) -> bool {
    for d in (0..origin.len()).rev() {
        origin[d] += chunk_dims[d];
        if origin[d] < dims[d] {
            return true;
        }
        origin[d] = 0;
    }
    false
}
