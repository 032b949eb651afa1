//! The chunk index: a v1 B-tree mapping chunk element coordinates to
//! byte extents.
//!
//! Nodes are fetched on demand through the range reader and kept in a
//! small per-dataset LRU; a tile request touching a loaded region costs
//! no further index I/O.

use crate::cursor::SliceReader;
use crate::superblock::Sizes;
use itertools::iproduct;
use parking_lot::Mutex;
use sartile_core::cache::LimitedCache;
use sartile_core::io::SharedRangeReader;
use sartile_core::{ByteRange, EngineError, Result};
use std::ops::Range;
use std::sync::Arc;

const TREE_SIGNATURE: &[u8; 4] = b"TREE";
const NODE_CACHE_ENTRIES: usize = 64;

/// Where a chunk's filtered bytes live, plus which pipeline entries
/// were applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkExtent {
	pub range: ByteRange,
	/// Bit i set means filter i of the pipeline was skipped for this
	/// chunk.
	pub filter_mask: u32,
}

struct Key {
	coords: Vec<u64>,
	size: u32,
	filter_mask: u32,
}

struct Node {
	level: u8,
	/// `children.len() + 1` keys; key i lower-bounds child i.
	keys: Vec<Key>,
	children: Vec<u64>,
}

/// Lazily loaded chunk B-tree of one dataset.
pub struct ChunkIndex {
	reader: SharedRangeReader,
	root: Option<u64>,
	/// Stored key width: dataset rank plus the trailing element-size
	/// coordinate (always zero).
	key_dims: usize,
	sizes: Sizes,
	cache: Mutex<LimitedCache<u64, Arc<Node>>>,
}

impl ChunkIndex {
	pub fn new(reader: SharedRangeReader, root: Option<u64>, rank: usize, sizes: Sizes) -> Self {
		Self {
			reader,
			root,
			key_dims: rank + 1,
			sizes,
			cache: Mutex::new(LimitedCache::new(NODE_CACHE_ENTRIES)),
		}
	}

	/// Looks up one chunk by its element-coordinate origin (without the
	/// trailing zero).
	pub async fn lookup(&self, origin: &[u64]) -> Result<Option<ChunkExtent>> {
		let Some(root) = self.root else {
			return Ok(None); // dataset never written
		};
		if origin.len() + 1 != self.key_dims {
			return Err(EngineError::Decode(format!(
				"chunk lookup with {} coordinates against a rank-{} index",
				origin.len(),
				self.key_dims - 1
			)));
		}
		let mut target: Vec<u64> = origin.to_vec();
		target.push(0);

		let mut address = root;
		loop {
			let node = self.node(address).await?;
			if node.level == 0 {
				let found = node
					.keys
					.iter()
					.zip(&node.children)
					.find(|(key, _)| key.coords == target)
					.map(|(key, child)| ChunkExtent {
						range: ByteRange::new(*child, u64::from(key.size)),
						filter_mask: key.filter_mask,
					});
				return Ok(found);
			}

			// Child i holds chunks in [key[i], key[i+1]).
			let position = node.keys.iter().take(node.children.len()).rposition(|key| key.coords.as_slice() <= target.as_slice());
			match position {
				Some(index) => address = node.children[index],
				None => return Ok(None),
			}
		}
	}

	/// Enumerates allocated chunks whose footprint intersects the given
	/// element window. `prefix` carries the leading element coordinates
	/// of higher dimensions (the plane of a rank-3 dataset). Chunks the
	/// index does not know are unallocated and simply absent.
	pub async fn range(
		&self,
		prefix: &[u64],
		rows: Range<u64>,
		cols: Range<u64>,
		chunk_height: u64,
		chunk_width: u64,
	) -> Result<Vec<(Vec<u64>, ChunkExtent)>> {
		let row_chunks = (rows.start / chunk_height)..rows.end.div_ceil(chunk_height);
		let col_chunks = (cols.start / chunk_width)..cols.end.div_ceil(chunk_width);

		let mut found = Vec::new();
		for (chunk_row, chunk_col) in iproduct!(row_chunks, col_chunks) {
			let mut origin = prefix.to_vec();
			origin.push(chunk_row * chunk_height);
			origin.push(chunk_col * chunk_width);
			if let Some(extent) = self.lookup(&origin).await? {
				found.push((origin, extent));
			}
		}
		Ok(found)
	}

	async fn node(&self, address: u64) -> Result<Arc<Node>> {
		if let Some(node) = self.cache.lock().get(&address) {
			return Ok(node);
		}

		let key_bytes = 8 + 8 * self.key_dims as u64;
		let offset_size = u64::from(self.sizes.offset);

		// Speculative read covers typical nodes in one round trip.
		let available = self
			.reader
			.size()
			.checked_sub(address)
			.ok_or_else(|| EngineError::TruncatedFile(format!("chunk b-tree node at {address} past end of file")))?;
		let mut block = self
			.reader
			.read_range(&ByteRange::new(address, 4096.min(available)))
			.await?;

		let entries_used = parse_node_header(&block, address)?;
		let needed = 8 + 2 * offset_size + (entries_used as u64 + 1) * key_bytes + entries_used as u64 * offset_size;
		if needed > block.len() as u64 {
			block = self.reader.read_range(&ByteRange::new(address, needed.min(available))).await?;
		}

		let node = Arc::new(self.parse_node(&block, address)?);
		self.cache.lock().insert(address, node.clone());
		Ok(node)
	}

	fn parse_node(&self, block: &[u8], address: u64) -> Result<Node> {
		let mut cursor = SliceReader::new(block);
		cursor.skip(4)?; // signature, checked in parse_node_header
		cursor.skip(1)?; // node type, checked in parse_node_header
		let level = cursor.read_u8()?;
		let entries_used = cursor.read_u16()? as usize;
		cursor.read_offset(self.sizes.offset)?; // left sibling
		cursor.read_offset(self.sizes.offset)?; // right sibling

		let mut keys = Vec::with_capacity(entries_used + 1);
		let mut children = Vec::with_capacity(entries_used);
		for index in 0..=entries_used {
			let size = cursor.read_u32()?;
			let filter_mask = cursor.read_u32()?;
			let mut coords = Vec::with_capacity(self.key_dims);
			for _ in 0..self.key_dims {
				coords.push(cursor.read_u64()?);
			}
			keys.push(Key {
				coords,
				size,
				filter_mask,
			});

			if index < entries_used {
				let child = cursor.read_offset(self.sizes.offset)?.ok_or_else(|| {
					EngineError::TruncatedFile(format!("b-tree node at {address} with undefined child address"))
				})?;
				children.push(child);
			}
		}

		Ok(Node {
			level,
			keys,
			children,
		})
	}
}

fn parse_node_header(block: &[u8], address: u64) -> Result<u16> {
	let mut cursor = SliceReader::new(block);
	let signature = cursor.read_bytes(4)?;
	if signature != TREE_SIGNATURE {
		return Err(EngineError::UnsupportedFormat(format!(
			"chunk b-tree node at {address} without TREE signature"
		)));
	}
	let node_type = cursor.read_u8()?;
	if node_type != 1 {
		return Err(EngineError::UnsupportedFormat(format!(
			"b-tree node type {node_type} inside a chunk index"
		)));
	}
	cursor.skip(1)?; // level
	cursor.read_u16()
}

impl std::fmt::Debug for ChunkIndex {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChunkIndex")
			.field("root", &self.root)
			.field("key_dims", &self.key_dims)
			.finish()
	}
}
