//! Streaming reader for the subset of HDF5 that NISAR GCOV products
//! use: chunked and contiguous N-dimensional numeric datasets reached
//! through byte-range I/O.
//!
//! The crate never loads a whole file. Opening parses the superblock,
//! path lookups walk group B-trees lazily, and region reads touch only
//! the chunks that intersect the request. Nothing here writes HDF5; the
//! [`testing`] module builds small in-memory containers for tests only.

mod chunk_index;
mod cursor;
mod dataset;
mod file;
mod filters;
mod group;
mod object_header;

pub mod checksum;
pub mod messages;
pub mod superblock;
pub mod testing;

pub use chunk_index::{ChunkExtent, ChunkIndex};
pub use dataset::{DatasetMeta, Hdf5Dataset, Region2D, RegionRequest};
pub use file::{Hdf5File, Hdf5Options};
pub use filters::{FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_LZF, FILTER_SHUFFLE, decode_chunk};
pub use messages::{AttrValue, Datatype, DatatypeClass, FilterSpec, Layout};
