//! Filter pipeline message (0x000B), versions 1 and 2.

use crate::cursor::SliceReader;
use sartile_core::{EngineError, Result};

/// One entry of a dataset's filter chain, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
	pub id: u16,
	/// Bit 0: the filter is optional.
	pub flags: u16,
	/// Filter-specific parameters (e.g. element size for shuffle,
	/// compression level for deflate).
	pub client_data: Vec<u32>,
	pub name: String,
}

impl FilterSpec {
	pub fn is_optional(&self) -> bool {
		self.flags & 0x01 != 0
	}
}

pub fn parse(cursor: &mut SliceReader) -> Result<Vec<FilterSpec>> {
	let version = cursor.read_u8()?;
	let count = cursor.read_u8()? as usize;
	match version {
		1 => cursor.skip(6)?, // reserved
		2 => (),
		other => {
			return Err(EngineError::UnsupportedFormat(format!("filter pipeline message v{other}")));
		}
	}

	let mut filters = Vec::with_capacity(count);
	for _ in 0..count {
		let id = cursor.read_u16()?;
		let name_length = if version == 1 || id >= 0x100 {
			cursor.read_u16()? as usize
		} else {
			0
		};
		let flags = cursor.read_u16()?;
		let value_count = cursor.read_u16()? as usize;

		let name = if name_length > 0 {
			let raw = cursor.read_bytes(name_length)?;
			String::from_utf8_lossy(raw.split(|b| *b == 0).next().unwrap_or(raw)).into_owned()
		} else {
			String::new()
		};

		let mut client_data = Vec::with_capacity(value_count);
		for _ in 0..value_count {
			client_data.push(cursor.read_u32()?);
		}
		if version == 1 && value_count % 2 == 1 {
			cursor.skip(4)?; // v1 pads odd client data to 8 bytes
		}

		filters.push(FilterSpec {
			id,
			flags,
			client_data,
			name,
		});
	}
	Ok(filters)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_v1_shuffle_deflate() {
		let mut body = vec![1u8, 2, 0, 0, 0, 0, 0, 0];
		// shuffle: id 2, no name, 1 client value (element size)
		body.extend_from_slice(&2u16.to_le_bytes());
		body.extend_from_slice(&0u16.to_le_bytes());
		body.extend_from_slice(&0u16.to_le_bytes());
		body.extend_from_slice(&1u16.to_le_bytes());
		body.extend_from_slice(&4u32.to_le_bytes());
		body.extend_from_slice(&0u32.to_le_bytes()); // odd-count padding
		// deflate: id 1, no name, 1 client value (level)
		body.extend_from_slice(&1u16.to_le_bytes());
		body.extend_from_slice(&0u16.to_le_bytes());
		body.extend_from_slice(&1u16.to_le_bytes()); // optional
		body.extend_from_slice(&1u16.to_le_bytes());
		body.extend_from_slice(&6u32.to_le_bytes());
		body.extend_from_slice(&0u32.to_le_bytes());

		let filters = parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(filters.len(), 2);
		assert_eq!(filters[0].id, 2);
		assert_eq!(filters[0].client_data, vec![4]);
		assert!(!filters[0].is_optional());
		assert_eq!(filters[1].id, 1);
		assert!(filters[1].is_optional());
	}

	#[test]
	fn parses_v2_without_padding() {
		let mut body = vec![2u8, 1];
		body.extend_from_slice(&3u16.to_le_bytes()); // fletcher32
		body.extend_from_slice(&0u16.to_le_bytes());
		body.extend_from_slice(&0u16.to_le_bytes());

		let filters = parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(filters.len(), 1);
		assert_eq!(filters[0].id, 3);
		assert!(filters[0].client_data.is_empty());
	}

	#[test]
	fn parses_v2_registered_filter_with_name() {
		let mut body = vec![2u8, 1];
		body.extend_from_slice(&32000u16.to_le_bytes()); // lzf
		body.extend_from_slice(&3u16.to_le_bytes()); // name length
		body.extend_from_slice(&0u16.to_le_bytes()); // flags
		body.extend_from_slice(&0u16.to_le_bytes()); // client values
		body.extend_from_slice(b"lzf");

		let filters = parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(filters[0].id, 32000);
		assert_eq!(filters[0].name, "lzf");
	}
}
