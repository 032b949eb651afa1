//! Group traversal: old-style symbol tables (group B-tree + SNOD +
//! local heap) and new-style compact link messages.

use crate::cursor::SliceReader;
use crate::object_header::ObjectHeader;
use crate::superblock::Superblock;
use sartile_core::io::RangeReader;
use sartile_core::{ByteRange, EngineError, Result};

const TREE_SIGNATURE: &[u8; 4] = b"TREE";
const SNOD_SIGNATURE: &[u8; 4] = b"SNOD";
const HEAP_SIGNATURE: &[u8; 4] = b"HEAP";

/// Lists the children of a group object as `(name, header address)`.
///
/// The group's own object header decides the flavor: a symbol table
/// message means old-style B-tree storage, link messages mean new-style
/// compact storage. Dense (fractal heap) storage is not part of the
/// supported subset.
pub async fn list_children(
	reader: &dyn RangeReader,
	header: &ObjectHeader,
	superblock: &Superblock,
) -> Result<Vec<(String, u64)>> {
	if let Some((btree, heap)) = header.symbol_table() {
		list_symbol_table(reader, btree, heap, superblock).await
	} else {
		Ok(header.links())
	}
}

async fn list_symbol_table(
	reader: &dyn RangeReader,
	btree_address: u64,
	heap_address: u64,
	superblock: &Superblock,
) -> Result<Vec<(String, u64)>> {
	let heap = LocalHeap::read(reader, heap_address, superblock).await?;
	let sizes = superblock.sizes;
	let offset_size = u64::from(sizes.offset);
	let length_size = u64::from(sizes.length);

	// Upper bounds on node sizes from the fan-out constants.
	let entries_max = u64::from(superblock.group_internal_k) * 2;
	let node_bytes = 8 + 2 * offset_size + (entries_max + 1) * length_size + entries_max * offset_size;
	let leaf_entries_max = u64::from(superblock.group_leaf_k) * 2;
	let entry_bytes = 2 * offset_size + 8 + 16;
	let snod_bytes = 8 + leaf_entries_max * entry_bytes;

	let mut children = Vec::new();
	let mut nodes = vec![btree_address];
	let mut visited = 0usize;

	while let Some(address) = nodes.pop() {
		visited += 1;
		if visited > 1 << 20 {
			return Err(EngineError::UnsupportedFormat("unreasonably deep group b-tree".to_string()));
		}

		let window = clipped_window(reader, address, node_bytes)?;
		let block = reader.read_range(&window).await?;
		let mut cursor = SliceReader::new(&block);

		let signature = cursor.read_bytes(4)?;
		if signature != TREE_SIGNATURE {
			return Err(EngineError::UnsupportedFormat(format!(
				"group b-tree node at {address} without TREE signature"
			)));
		}
		let node_type = cursor.read_u8()?;
		if node_type != 0 {
			return Err(EngineError::UnsupportedFormat(format!(
				"b-tree node type {node_type} inside a group"
			)));
		}
		let level = cursor.read_u8()?;
		let entries_used = cursor.read_u16()? as usize;
		cursor.read_offset(sizes.offset)?; // left sibling
		cursor.read_offset(sizes.offset)?; // right sibling

		for _ in 0..entries_used {
			cursor.read_sized(sizes.length)?; // key: heap offset of a name
			let child = cursor
				.read_offset(sizes.offset)?
				.ok_or_else(|| EngineError::UnsupportedFormat("b-tree child at undefined address".to_string()))?;
			if level == 0 {
				collect_snod(reader, child, snod_bytes, &heap, superblock, &mut children).await?;
			} else {
				nodes.push(child);
			}
		}
	}

	children.sort_by(|a, b| a.0.cmp(&b.0));
	Ok(children)
}

async fn collect_snod(
	reader: &dyn RangeReader,
	address: u64,
	snod_bytes: u64,
	heap: &LocalHeap,
	superblock: &Superblock,
	children: &mut Vec<(String, u64)>,
) -> Result<()> {
	let sizes = superblock.sizes;
	let window = clipped_window(reader, address, snod_bytes)?;
	let block = reader.read_range(&window).await?;
	let mut cursor = SliceReader::new(&block);

	let signature = cursor.read_bytes(4)?;
	if signature != SNOD_SIGNATURE {
		return Err(EngineError::UnsupportedFormat(format!(
			"symbol table node at {address} without SNOD signature"
		)));
	}
	cursor.skip(2)?; // version, reserved
	let count = cursor.read_u16()? as usize;

	for _ in 0..count {
		let name_offset = cursor.read_sized(sizes.offset)?;
		let header_address = cursor
			.read_offset(sizes.offset)?
			.ok_or_else(|| EngineError::UnsupportedFormat("symbol table entry without object header".to_string()))?;
		cursor.skip(8 + 16)?; // cache type, reserved, scratch pad
		children.push((heap.name_at(name_offset)?, header_address));
	}
	Ok(())
}

/// A group's local heap: the name storage for symbol table entries.
struct LocalHeap {
	data: Vec<u8>,
}

impl LocalHeap {
	async fn read(reader: &dyn RangeReader, address: u64, superblock: &Superblock) -> Result<LocalHeap> {
		let sizes = superblock.sizes;
		let header_bytes = 8 + 2 * u64::from(sizes.length) + u64::from(sizes.offset);
		let block = reader.read_range(&ByteRange::new(address, header_bytes)).await?;
		let mut cursor = SliceReader::new(&block);

		let signature = cursor.read_bytes(4)?;
		if signature != HEAP_SIGNATURE {
			return Err(EngineError::UnsupportedFormat(format!(
				"local heap at {address} without HEAP signature"
			)));
		}
		cursor.skip(4)?; // version, reserved
		let segment_size = cursor.read_sized(sizes.length)?;
		cursor.read_sized(sizes.length)?; // free list head
		let segment_address = cursor
			.read_offset(sizes.offset)?
			.ok_or_else(|| EngineError::UnsupportedFormat("local heap without data segment".to_string()))?;

		let data = reader
			.read_range(&ByteRange::new(segment_address, segment_size))
			.await?
			.to_vec();
		Ok(LocalHeap { data })
	}

	fn name_at(&self, offset: u64) -> Result<String> {
		let start = offset as usize;
		if start >= self.data.len() {
			return Err(EngineError::TruncatedFile(format!(
				"heap name offset {offset} outside {}-byte segment",
				self.data.len()
			)));
		}
		let mut cursor = SliceReader::new(&self.data[start..]);
		cursor.read_nul_string()
	}
}

fn clipped_window(reader: &dyn RangeReader, address: u64, wanted: u64) -> Result<ByteRange> {
	let available = reader
		.size()
		.checked_sub(address)
		.ok_or_else(|| EngineError::TruncatedFile(format!("metadata node at {address} past end of file")))?;
	Ok(ByteRange::new(address, wanted.min(available)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestFileBuilder;
	use sartile_core::io::MemoryRangeReader;

	// Group traversal is exercised end-to-end through the in-memory
	// writer: nested groups with several datasets each.
	#[tokio::test]
	async fn walks_symbol_table_groups() {
		let file = TestFileBuilder::new()
			.dataset("/science/LSAR/GCOV/grids/frequencyA/HHHH", &[4, 4], None, &[1.0f32; 16])
			.dataset("/science/LSAR/GCOV/grids/frequencyA/HVHV", &[4, 4], None, &[2.0f32; 16])
			.dataset("/other/unrelated", &[2, 2], None, &[0.0f32; 4])
			.build();

		let reader = MemoryRangeReader::new("mem", file);
		let hdf5 = crate::Hdf5File::open(std::sync::Arc::new(reader)).await.unwrap();

		let names = hdf5.list_children("/science/LSAR/GCOV/grids/frequencyA").await.unwrap();
		assert_eq!(names, vec!["HHHH".to_string(), "HVHV".to_string()]);

		let root = hdf5.list_children("/").await.unwrap();
		assert_eq!(root, vec!["other".to_string(), "science".to_string()]);
	}
}
