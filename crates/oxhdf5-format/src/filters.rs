//! Chunk filters: the `Filter` trait, the registry, and the decode
//! pipeline.
//!
//! Filters were applied in pipeline order on write, so decoding runs them
//! in reverse. Each chunk carries a filter mask; bit *i* set means filter
//! *i* was skipped for that chunk and must be skipped on decode too.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FormatError;
use crate::filter_pipeline::{FilterPipelineMessage, FilterSpec};

/// Filter id: zlib deflate.
pub const FILTER_DEFLATE: u16 = 1;
/// Filter id: byte shuffle.
pub const FILTER_SHUFFLE: u16 = 2;
/// Filter id: fletcher32 checksum.
pub const FILTER_FLETCHER32: u16 = 3;

/// A byte-to-byte chunk decoder.
///
/// Implementations are stateless across invocations and shared between
/// threads.
pub trait Filter: Send + Sync {
    /// The on-disk filter identification code.
    fn id(&self) -> u16;

    /// A short display name.
    fn name(&self) -> &'static str;

    /// Undo this filter. `client_data` comes from the pipeline message.
    fn decode(&self, data: Vec<u8>, client_data: &[u32]) -> Result<Vec<u8>, FormatError>;
}

/// An immutable set of available filters, keyed by id.
///
/// Built once before the file is opened; lookups are lock-free afterwards.
pub struct FilterRegistry {
    filters: HashMap<u16, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// The built-in set: shuffle and fletcher32, plus deflate when the
    /// `deflate` feature is enabled.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "deflate")]
        registry.register(Arc::new(DeflateFilter));
        registry.register(Arc::new(ShuffleFilter));
        registry.register(Arc::new(Fletcher32Filter));
        registry
    }

    /// Add a filter; replaces any previous filter with the same id.
    pub fn register(&mut self, filter: Arc<dyn Filter>) {
        self.filters.insert(filter.id(), filter);
    }

    /// Look up a filter by id.
    pub fn get(&self, id: u16) -> Option<&Arc<dyn Filter>> {
        self.filters.get(&id)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A dataset's decode pipeline: its filter specs bound to a registry.
pub struct DecodePipeline {
    specs: Vec<FilterSpec>,
    registry: Arc<FilterRegistry>,
}

impl DecodePipeline {
    /// Bind a pipeline message to a registry.
    pub fn new(message: FilterPipelineMessage, registry: Arc<FilterRegistry>) -> Self {
        Self {
            specs: message.filters,
            registry,
        }
    }

    /// Number of filters in the pipeline.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Is the pipeline empty?
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Decode one chunk: apply filters in reverse order, skipping those
    /// masked out by `filter_mask`.
    ///
    /// An unknown filter id fails with [`FormatError::UnsupportedFilter`]
    /// whether or not the filter was optional on write; a filter that the
    /// mask skips is never resolved at all.
    pub fn decode(&self, data: Vec<u8>, filter_mask: u32) -> Result<Vec<u8>, FormatError> {
        let mut data = data;
        for (index, spec) in self.specs.iter().enumerate().rev() {
            let mask_bit = 1u32.checked_shl(index as u32).unwrap_or(0);
            if filter_mask & mask_bit != 0 {
                continue;
            }
            let filter = self
                .registry
                .get(spec.id)
                .ok_or(FormatError::UnsupportedFilter { id: spec.id })?;
            data = filter.decode(data, &spec.client_data)?;
        }
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// Built-in filters
// ---------------------------------------------------------------------------

/// Zlib deflate (filter id 1).
#[cfg(feature = "deflate")]
pub struct DeflateFilter;

#[cfg(feature = "deflate")]
impl Filter for DeflateFilter {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn decode(&self, data: Vec<u8>, _client_data: &[u32]) -> Result<Vec<u8>, FormatError> {
        use std::io::Read;
        let mut decoder = flate2::read::ZlibDecoder::new(data.as_slice());
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| FormatError::CorruptHeader {
                address: 0,
                detail: format!("deflate: {e}"),
            })?;
        Ok(out)
    }
}

/// Byte shuffle (filter id 2): bytes were transposed so that the i-th byte
/// of every element is stored together. `client_data[0]` is the element
/// size.
pub struct ShuffleFilter;

impl Filter for ShuffleFilter {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn decode(&self, data: Vec<u8>, client_data: &[u32]) -> Result<Vec<u8>, FormatError> {
        let element = client_data.first().copied().unwrap_or(1) as usize;
        if element <= 1 || data.len() % element != 0 {
            return Ok(data);
        }
        let count = data.len() / element;
        let mut out = vec![0u8; data.len()];
        for byte in 0..element {
            let plane = &data[byte * count..(byte + 1) * count];
            for (i, &b) in plane.iter().enumerate() {
                out[i * element + byte] = b;
            }
        }
        Ok(out)
    }
}

/// Fletcher32 (filter id 3): a 4-byte checksum appended to the chunk;
/// decoding verifies and strips it.
pub struct Fletcher32Filter;

impl Filter for Fletcher32Filter {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &'static str {
        "fletcher32"
    }

    fn decode(&self, data: Vec<u8>, _client_data: &[u32]) -> Result<Vec<u8>, FormatError> {
        if data.len() < 4 {
            return Err(FormatError::CorruptHeader {
                address: 0,
                detail: "fletcher32: chunk shorter than its checksum".into(),
            });
        }
        let (payload, tail) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let computed = fletcher32(payload);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch { address: 0 });
        }
        Ok(payload.to_vec())
    }
}

/// The fletcher32 checksum as computed by the HDF5 filter: 16-bit words
/// assembled big-endian, an odd trailing byte used as the high byte.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    let mut words = data.chunks_exact(2);
    for pair in &mut words {
        sum1 = (sum1 + (u32::from(pair[0]) << 8 | u32::from(pair[1]))) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    if let [last] = words.remainder() {
        sum1 = (sum1 + (u32::from(*last) << 8)) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }

    (sum2 << 16) | sum1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_pipeline::FilterSpec;

    fn pipeline(specs: Vec<FilterSpec>, registry: FilterRegistry) -> DecodePipeline {
        DecodePipeline::new(
            FilterPipelineMessage { filters: specs },
            Arc::new(registry),
        )
    }

    fn spec(id: u16, client_data: Vec<u32>) -> FilterSpec {
        FilterSpec {
            id,
            name: None,
            flags: 0,
            client_data,
        }
    }

    /// A test filter that appends a marker byte on decode.
    struct Appender {
        id: u16,
        marker: u8,
    }

    impl Filter for Appender {
        fn id(&self) -> u16 {
            self.id
        }
        fn name(&self) -> &'static str {
            "appender"
        }
        fn decode(&self, mut data: Vec<u8>, _c: &[u32]) -> Result<Vec<u8>, FormatError> {
            data.push(self.marker);
            Ok(data)
        }
    }

    fn appender_registry() -> FilterRegistry {
        let mut registry = FilterRegistry::empty();
        registry.register(Arc::new(Appender {
            id: 100,
            marker: b'a',
        }));
        registry.register(Arc::new(Appender {
            id: 101,
            marker: b'b',
        }));
        registry
    }

    #[test]
    fn reverse_order() {
        // Pipeline [F1, F2]: decode must run F2 first, then F1, so the
        // output ends with F2's marker then F1's.
        let p = pipeline(
            vec![spec(100, vec![]), spec(101, vec![])],
            appender_registry(),
        );
        let out = p.decode(b"data".to_vec(), 0).unwrap();
        assert_eq!(out, b"databa");
    }

    #[test]
    fn mask_skips_filter() {
        // Bit 0 masks out the first filter; only F2 runs.
        let p = pipeline(
            vec![spec(100, vec![]), spec(101, vec![])],
            appender_registry(),
        );
        let out = p.decode(b"data".to_vec(), 0b01).unwrap();
        assert_eq!(out, b"datab");
    }

    #[test]
    fn unknown_filter_errors() {
        let p = pipeline(vec![spec(77, vec![])], FilterRegistry::empty());
        let err = p.decode(vec![0], 0).unwrap_err();
        assert_eq!(err, FormatError::UnsupportedFilter { id: 77 });
    }

    #[test]
    fn unknown_optional_filter_still_errors() {
        let mut s = spec(77, vec![]);
        s.flags = 0x0001;
        let p = pipeline(vec![s], FilterRegistry::empty());
        assert!(p.decode(vec![0], 0).is_err());
    }

    #[test]
    fn masked_unknown_filter_is_ignored() {
        let p = pipeline(vec![spec(77, vec![])], FilterRegistry::empty());
        let out = p.decode(vec![1, 2], 0b01).unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let p = pipeline(vec![], FilterRegistry::empty());
        assert!(p.is_empty());
        assert_eq!(p.decode(vec![9, 9], 0).unwrap(), vec![9, 9]);
    }

    #[test]
    fn shuffle_reverses_transpose() {
        // Four i32 values shuffled: all byte-0s, then byte-1s, ...
        let values = [1i32, 2, 3, 4];
        let plain: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let count = values.len();
        let mut shuffled = vec![0u8; plain.len()];
        for (i, chunk) in plain.chunks_exact(4).enumerate() {
            for (byte, &b) in chunk.iter().enumerate() {
                shuffled[byte * count + i] = b;
            }
        }

        let out = ShuffleFilter.decode(shuffled, &[4]).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn shuffle_with_element_size_one_is_identity() {
        let data = vec![5u8, 6, 7];
        assert_eq!(ShuffleFilter.decode(data.clone(), &[1]).unwrap(), data);
    }

    #[test]
    fn fletcher32_roundtrip() {
        let payload = b"fletcher test payload".to_vec();
        let mut stored = payload.clone();
        stored.extend_from_slice(&fletcher32(&payload).to_le_bytes());
        let out = Fletcher32Filter.decode(stored, &[]).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn fletcher32_detects_corruption() {
        let payload = b"fletcher test payload".to_vec();
        let mut stored = payload.clone();
        stored.extend_from_slice(&fletcher32(&payload).to_le_bytes());
        stored[3] ^= 0xFF;
        assert!(matches!(
            Fletcher32Filter.decode(stored, &[]).unwrap_err(),
            FormatError::ChecksumMismatch { .. }
        ));
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn deflate_roundtrip() {
        use std::io::Write;
        let payload: Vec<u8> = (0..200u16).flat_map(|v| v.to_le_bytes()).collect();
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let out = DeflateFilter.decode(compressed, &[]).unwrap();
        assert_eq!(out, payload);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn deflate_rejects_garbage() {
        assert!(DeflateFilter.decode(vec![1, 2, 3], &[]).is_err());
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn builtin_registry_contents() {
        let registry = FilterRegistry::builtin();
        assert!(registry.get(FILTER_DEFLATE).is_some());
        assert!(registry.get(FILTER_SHUFFLE).is_some());
        assert!(registry.get(FILTER_FLETCHER32).is_some());
        assert!(registry.get(999).is_none());
    }
}
