//! Local-filesystem backend, used for `file://` URLs and tests.

use super::{RangeReader, check_bounds};
use crate::{ByteRange, EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A regular file exposed through the byte-range contract.
///
/// Reads run on the blocking pool so a slow disk never stalls the
/// async workers.
#[derive(Debug)]
pub struct FileRangeReader {
	name: String,
	file: File,
	size: u64,
}

impl FileRangeReader {
	pub fn open(path: &Path) -> Result<FileRangeReader> {
		if !path.is_file() {
			return Err(EngineError::Io(format!("'{}' is not a readable file", path.display())));
		}

		let file = File::open(path)?;
		let size = file.metadata()?.len();

		Ok(FileRangeReader {
			name: path.display().to_string(),
			file,
			size,
		})
	}
}

#[async_trait]
impl RangeReader for FileRangeReader {
	async fn read_range(&self, range: &ByteRange) -> Result<Bytes> {
		check_bounds(range, self.size, &self.name)?;

		let mut file = self.file.try_clone()?;
		let range = *range;
		let buffer = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
			let mut buffer = vec![0u8; range.length as usize];
			file.seek(SeekFrom::Start(range.offset))?;
			file.read_exact(&mut buffer)?;
			Ok(buffer)
		})
		.await
		.map_err(|e| EngineError::Io(format!("read task failed: {e}")))??;

		Ok(Bytes::from(buffer))
	}

	fn size(&self) -> u64 {
		self.size
	}

	fn name(&self) -> &str {
		&self.name
	}
}
