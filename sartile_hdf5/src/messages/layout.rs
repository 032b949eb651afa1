//! Data layout message (0x0008), version 3.
//!
//! Version 4 (HDF5 1.10 chunk indexes) is reported as unsupported; the
//! GCOV archive is written in the 1.8 format.

use crate::cursor::SliceReader;
use crate::superblock::Sizes;
use sartile_core::{EngineError, Result};

/// Where a dataset's raw bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
	/// Raw data stored inline in the object header.
	Compact { data: Vec<u8> },
	/// One unfiltered extent.
	Contiguous {
		/// `None` until space is allocated; reads see fill values.
		address: Option<u64>,
		size: u64,
	},
	/// Filtered bricks indexed by a v1 B-tree.
	Chunked {
		/// `None` for a dataset that was never written.
		btree: Option<u64>,
		/// Chunk shape in elements, one entry per dataset dimension.
		chunk_dims: Vec<u64>,
		/// Element size as recorded in the layout, in bytes.
		element_size: u32,
	},
}

impl Layout {
	pub fn parse(cursor: &mut SliceReader, sizes: Sizes) -> Result<Self> {
		let version = cursor.read_u8()?;
		if version != 3 {
			return Err(EngineError::UnsupportedFormat(format!("data layout message v{version}")));
		}

		match cursor.read_u8()? {
			0 => {
				let size = cursor.read_u16()? as usize;
				Ok(Layout::Compact {
					data: cursor.read_bytes(size)?.to_vec(),
				})
			}
			1 => {
				let address = cursor.read_offset(sizes.offset)?;
				let size = cursor.read_sized(sizes.length)?;
				Ok(Layout::Contiguous { address, size })
			}
			2 => {
				// Dimensionality counts one extra entry: the trailing
				// "dimension" is the element size in bytes.
				let dimensionality = cursor.read_u8()? as usize;
				if dimensionality < 2 {
					return Err(EngineError::UnsupportedFormat(format!(
						"chunked layout with dimensionality {dimensionality}"
					)));
				}
				let btree = cursor.read_offset(sizes.offset)?;
				let mut chunk_dims = Vec::with_capacity(dimensionality - 1);
				for _ in 0..dimensionality - 1 {
					chunk_dims.push(u64::from(cursor.read_u32()?));
				}
				let element_size = cursor.read_u32()?;
				Ok(Layout::Chunked {
					btree,
					chunk_dims,
					element_size,
				})
			}
			other => Err(EngineError::UnsupportedFormat(format!("data layout class {other}"))),
		}
	}
}
