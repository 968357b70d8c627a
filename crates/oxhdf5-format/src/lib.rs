//! On-disk HDF5 structure decoding.
//!
//! This crate is the pure middle layer of the `oxhdf5` reader: every
//! function here is a deterministic decoder over a byte slice plus the
//! superblock's addressing parameters. No I/O happens in this crate; the
//! caller hands in the (usually memory-mapped) file bytes.
//!
//! Structure coverage:
//!
//! - superblock versions 0–3 ([`superblock`])
//! - object headers v1/v2 with continuations and typed message access
//!   ([`object_header`])
//! - per-message decoders ([`dataspace`], [`datatype`], [`data_layout`],
//!   [`fill_value`], [`link_message`], [`link_info`], [`group_info`],
//!   [`attribute`], [`attribute_info`], [`symbol_table`],
//!   [`filter_pipeline`])
//! - B-trees v1 and v2 ([`btree_v1`], [`btree_v2`])
//! - fractal, local, and global heaps ([`fractal_heap`], [`local_heap`],
//!   [`global_heap`])
//! - the chunk filter machinery ([`filters`])
//!
//! All multi-byte integers are little-endian; metadata checksums are
//! Jenkins lookup3 ([`checksum`]).

pub mod attribute;
pub mod attribute_info;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod cursor;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod fill_value;
pub mod filter_pipeline;
pub mod filters;
pub mod fractal_heap;
pub mod global_heap;
pub mod group_info;
pub mod link_info;
pub mod link_message;
pub mod local_heap;
pub mod message;
pub mod object_header;
pub mod signature;
pub mod superblock;
pub mod symbol_table;
pub mod vlen;

pub use error::FormatError;
pub use message::MessageType;
pub use superblock::Superblock;
