//! Read-only HDF5 library.
//!
//! Opens an HDF5 file (superblock versions 0–3) and exposes its hierarchy
//! of groups, datasets, and links as a lazily materialized tree. Dataset
//! payloads come back as raw little-endian bytes plus shape and datatype;
//! compact, contiguous, and chunked (v3) layouts are supported, with
//! deflate/shuffle/fletcher32 filter pipelines and a per-dataset decoded-
//! chunk cache.
//!
//! ```no_run
//! use oxhdf5::{Hdf5File, Node};
//!
//! let file = Hdf5File::open("data.h5")?;
//! let root = file.root_group();
//! for child in root.children()? {
//!     println!("{}", child.path());
//! }
//! if let Node::Dataset(ds) = root.child("temperature")? {
//!     let shape = ds.dimensions()?;
//!     let bytes = ds.read_raw()?;
//!     println!("{shape:?}: {} bytes", bytes.len());
//! }
//! # Ok::<(), oxhdf5::Error>(())
//! ```
//!
//! The library is safe for concurrent reads: all lazy state (object
//! headers, attribute maps, chunk lookups, decoded chunks) initializes at
//! most once across threads, and [`Hdf5File::close`] cleanly invalidates
//! every outstanding handle.

pub mod attribute;
pub mod channel;
mod chunks;
pub mod dataset;
pub mod error;
pub mod file;
pub mod lazy;
pub mod node;

pub use attribute::Attribute;
pub use dataset::Dataset;
pub use error::Error;
pub use file::Hdf5File;
pub use lazy::Lazy;
pub use node::{ExternalLink, Group, Node, SoftLink};

// The format layer is part of the public contract for callers that need
// datatype details or custom filters.
pub use oxhdf5_format::datatype::Datatype;
pub use oxhdf5_format::filters::{Filter, FilterRegistry};
pub use oxhdf5_format::{FormatError, Superblock};
