//! Dataspace message (0x0001): the extent of a dataset.

use crate::cursor::SliceReader;
use crate::superblock::Sizes;
use sartile_core::{EngineError, Result};

/// A simple dataspace: current dimension sizes. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
	pub dims: Vec<u64>,
}

impl Dataspace {
	pub fn rank(&self) -> usize {
		self.dims.len()
	}

	/// Total number of elements; 1 for scalars.
	pub fn element_count(&self) -> u64 {
		self.dims.iter().product()
	}

	pub fn parse(cursor: &mut SliceReader, sizes: Sizes) -> Result<Self> {
		let version = cursor.read_u8()?;
		let rank = cursor.read_u8()? as usize;
		let flags = cursor.read_u8()?;
		match version {
			1 => cursor.skip(5)?, // reserved
			2 => cursor.skip(1)?, // dataspace type
			other => {
				return Err(EngineError::UnsupportedFormat(format!("dataspace message v{other}")));
			}
		}

		let mut dims = Vec::with_capacity(rank);
		for _ in 0..rank {
			dims.push(cursor.read_sized(sizes.length)?);
		}
		if flags & 0x01 != 0 {
			cursor.skip(rank * sizes.length as usize)?; // max dims
		}
		Ok(Dataspace { dims })
	}
}
