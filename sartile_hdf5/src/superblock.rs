//! Superblock parsing, versions 0 through 3.
//!
//! The superblock sits at offset 0 (or a power-of-two offset past a
//! user block) and fixes the two field widths everything else depends
//! on. Its end-of-file address is validated against the real resource
//! size up front, so truncated downloads fail at open instead of deep
//! inside a tile read.

use crate::checksum::jenkins_lookup3;
use crate::cursor::SliceReader;
use sartile_core::io::RangeReader;
use sartile_core::{ByteRange, EngineError, Result};

const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Field widths declared by the superblock, threaded through every
/// metadata parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
	/// Bytes per file offset.
	pub offset: u8,
	/// Bytes per length field.
	pub length: u8,
}

/// The decoded superblock.
#[derive(Debug, Clone)]
pub struct Superblock {
	pub version: u8,
	pub sizes: Sizes,
	pub base_address: u64,
	pub end_of_file: u64,
	/// Object header address of the root group.
	pub root_address: u64,
	/// Group B-tree fan-out, v0/v1 only (v2+ files use defaults).
	pub group_leaf_k: u16,
	pub group_internal_k: u16,
}

/// Locates and parses the superblock of an open resource.
pub async fn read_superblock(reader: &dyn RangeReader) -> Result<Superblock> {
	let size = reader.size();
	if size < SIGNATURE.len() as u64 {
		return Err(EngineError::TruncatedFile(format!(
			"'{}' is only {size} bytes",
			reader.name()
		)));
	}

	// Offset 0, then doubling from 512 past any user block.
	let mut candidate = 0u64;
	loop {
		let window = ByteRange::new(candidate, 1024.min(size - candidate));
		let bytes = reader.read_range(&window).await?;
		if bytes.len() >= SIGNATURE.len() && bytes[..8] == SIGNATURE {
			let superblock = parse_superblock(&bytes, candidate)?;
			if superblock.end_of_file > size {
				return Err(EngineError::TruncatedFile(format!(
					"superblock declares {} bytes but '{}' has {size}",
					superblock.end_of_file,
					reader.name()
				)));
			}
			log::debug!(
				"superblock v{} at offset {candidate} of '{}'",
				superblock.version,
				reader.name()
			);
			return Ok(superblock);
		}

		candidate = if candidate == 0 { 512 } else { candidate * 2 };
		if candidate + SIGNATURE.len() as u64 > size {
			return Err(EngineError::UnsupportedFormat(format!(
				"'{}' carries no HDF5 signature",
				reader.name()
			)));
		}
	}
}

/// Parses a superblock from a buffer starting at its signature.
pub fn parse_superblock(bytes: &[u8], base_offset: u64) -> Result<Superblock> {
	let mut cursor = SliceReader::new(bytes);
	cursor.skip(SIGNATURE.len())?;

	let version = cursor.read_u8()?;
	match version {
		0 | 1 => parse_v0_v1(&mut cursor, version),
		2 | 3 => parse_v2_v3(bytes, &mut cursor, version, base_offset),
		other => Err(EngineError::UnsupportedFormat(format!("superblock v{other}"))),
	}
}

fn read_sizes(cursor: &mut SliceReader) -> Result<Sizes> {
	let offset = cursor.read_u8()?;
	let length = cursor.read_u8()?;
	for size in [offset, length] {
		if size != 4 && size != 8 {
			return Err(EngineError::UnsupportedFormat(format!("{size}-byte offsets/lengths")));
		}
	}
	Ok(Sizes { offset, length })
}

fn parse_v0_v1(cursor: &mut SliceReader, version: u8) -> Result<Superblock> {
	let freespace_version = cursor.read_u8()?;
	let root_group_version = cursor.read_u8()?;
	cursor.skip(1)?; // reserved
	let shared_header_version = cursor.read_u8()?;
	if freespace_version != 0 || root_group_version != 0 || shared_header_version != 0 {
		return Err(EngineError::UnsupportedFormat(
			"non-zero free-space / symbol-table / shared-header versions".to_string(),
		));
	}

	let sizes = read_sizes(cursor)?;
	cursor.skip(1)?; // reserved
	let group_leaf_k = cursor.read_u16()?;
	let group_internal_k = cursor.read_u16()?;
	cursor.skip(4)?; // file consistency flags
	if version == 1 {
		cursor.skip(4)?; // indexed storage k + reserved
	}

	let base_address = cursor.read_offset(sizes.offset)?.unwrap_or(0);
	cursor.read_offset(sizes.offset)?; // free space address
	let end_of_file = cursor
		.read_offset(sizes.offset)?
		.ok_or_else(|| EngineError::UnsupportedFormat("undefined end-of-file address".to_string()))?;
	cursor.read_offset(sizes.offset)?; // driver information address

	// Root group symbol table entry: name offset, header address, cache.
	cursor.read_offset(sizes.offset)?;
	let root_address = cursor
		.read_offset(sizes.offset)?
		.ok_or_else(|| EngineError::UnsupportedFormat("undefined root group address".to_string()))?;

	Ok(Superblock {
		version,
		sizes,
		base_address,
		end_of_file,
		root_address,
		group_leaf_k,
		group_internal_k,
	})
}

fn parse_v2_v3(bytes: &[u8], cursor: &mut SliceReader, version: u8, base_offset: u64) -> Result<Superblock> {
	let sizes = read_sizes(cursor)?;
	cursor.skip(1)?; // file consistency flags

	let base_address = cursor.read_offset(sizes.offset)?.unwrap_or(base_offset);
	cursor.read_offset(sizes.offset)?; // superblock extension address
	let end_of_file = cursor
		.read_offset(sizes.offset)?
		.ok_or_else(|| EngineError::UnsupportedFormat("undefined end-of-file address".to_string()))?;
	let root_address = cursor
		.read_offset(sizes.offset)?
		.ok_or_else(|| EngineError::UnsupportedFormat("undefined root group address".to_string()))?;

	let checksum_offset = cursor.position();
	let stored = cursor.read_u32()?;
	let computed = jenkins_lookup3(&bytes[..checksum_offset], 0);
	if stored != computed {
		return Err(EngineError::InvalidChecksum(format!(
			"superblock v{version} (stored {stored:#010x}, computed {computed:#010x})"
		)));
	}

	Ok(Superblock {
		version,
		sizes,
		base_address,
		end_of_file,
		root_address,
		// v2+ files default these; only old-style group B-trees use them.
		group_leaf_k: 4,
		group_internal_k: 16,
	})
}
