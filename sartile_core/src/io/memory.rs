//! In-memory backend: the reference implementation of the read
//! contract, and the substrate for every synthetic-container test.

use super::{RangeReader, check_bounds};
use crate::{ByteRange, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// A byte buffer served through the range-read contract.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
	name: String,
	data: Bytes,
}

impl MemoryRangeReader {
	pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
		Self {
			name: name.into(),
			data: data.into(),
		}
	}
}

#[async_trait]
impl RangeReader for MemoryRangeReader {
	async fn read_range(&self, range: &ByteRange) -> Result<Bytes> {
		check_bounds(range, self.data.len() as u64, &self.name)?;
		Ok(self.data.slice(range.as_range_usize()))
	}

	fn size(&self) -> u64 {
		self.data.len() as u64
	}

	fn name(&self) -> &str {
		&self.name
	}
}
