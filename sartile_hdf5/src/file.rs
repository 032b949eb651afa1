//! The open file: superblock, path resolution and dataset construction.

use crate::chunk_index::ChunkIndex;
use crate::dataset::{DatasetMeta, Hdf5Dataset, SharedChunkCache, convert_to_f32};
use crate::group;
use crate::messages::Layout;
use crate::object_header::ObjectHeader;
use crate::superblock::{Superblock, read_superblock};
use parking_lot::Mutex;
use sartile_core::cache::WeightedCache;
use sartile_core::io::{SharedRangeReader, open_range_reader};
use sartile_core::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Tunables threaded down from the session.
#[derive(Debug, Clone)]
pub struct Hdf5Options {
	/// Byte budget of the decoded-chunk cache shared by all datasets of
	/// this file.
	pub chunk_cache_bytes: usize,
	/// Concurrent chunk decodes per region read.
	pub decode_parallelism: usize,
}

impl Default for Hdf5Options {
	fn default() -> Self {
		Self {
			chunk_cache_bytes: 128 * 1024 * 1024,
			decode_parallelism: 4,
		}
	}
}

/// An open HDF5 container over a byte-range source.
///
/// The parse tree is built lazily: opening reads only the superblock;
/// groups and object headers are fetched on first traversal and then
/// cached for the life of the file.
pub struct Hdf5File {
	reader: SharedRangeReader,
	superblock: Superblock,
	options: Hdf5Options,
	chunk_cache: SharedChunkCache,
	path_cache: Mutex<HashMap<String, u64>>,
	header_cache: Mutex<HashMap<u64, Arc<ObjectHeader>>>,
}

impl Hdf5File {
	/// Opens a container over an already-open range reader.
	pub async fn open(reader: SharedRangeReader) -> Result<Hdf5File> {
		Self::open_with(reader, Hdf5Options::default()).await
	}

	pub async fn open_with(reader: SharedRangeReader, options: Hdf5Options) -> Result<Hdf5File> {
		let superblock = read_superblock(reader.as_ref()).await?;
		Ok(Hdf5File {
			chunk_cache: Arc::new(Mutex::new(WeightedCache::new(options.chunk_cache_bytes))),
			reader,
			superblock,
			options,
			path_cache: Mutex::new(HashMap::new()),
			header_cache: Mutex::new(HashMap::new()),
		})
	}

	/// Opens a container by URL (`http(s)://`, `file://` or a path).
	pub async fn open_url(url: &str) -> Result<Hdf5File> {
		Self::open(open_range_reader(url).await?).await
	}

	pub fn name(&self) -> &str {
		self.reader.name()
	}

	pub fn size(&self) -> u64 {
		self.reader.size()
	}

	pub fn superblock(&self) -> &Superblock {
		&self.superblock
	}

	async fn header_at(&self, address: u64) -> Result<Arc<ObjectHeader>> {
		if let Some(header) = self.header_cache.lock().get(&address) {
			return Ok(header.clone());
		}
		let header = Arc::new(ObjectHeader::read(self.reader.as_ref(), address, self.superblock.sizes).await?);
		self.header_cache.lock().insert(address, header.clone());
		Ok(header)
	}

	/// Resolves an absolute path to an object header address.
	///
	/// # Errors
	/// `NotFound` when any component is absent.
	pub async fn resolve(&self, path: &str) -> Result<u64> {
		let normalized = normalize_path(path);
		if let Some(address) = self.path_cache.lock().get(&normalized) {
			return Ok(*address);
		}

		let mut address = self.superblock.root_address;
		let mut walked = String::new();
		for component in normalized.split('/').filter(|c| !c.is_empty()) {
			let header = self.header_at(address).await?;
			let children = group::list_children(self.reader.as_ref(), &header, &self.superblock).await?;
			address = children
				.iter()
				.find(|(name, _)| name == component)
				.map(|(_, address)| *address)
				.ok_or_else(|| EngineError::NotFound(format!("'{walked}/{component}' in '{}'", self.name())))?;
			walked.push('/');
			walked.push_str(component);
			self.path_cache.lock().insert(walked.clone(), address);
		}
		Ok(address)
	}

	/// True if the path resolves to any object.
	pub async fn exists(&self, path: &str) -> bool {
		self.resolve(path).await.is_ok()
	}

	/// Child names of a group, sorted.
	pub async fn list_children(&self, path: &str) -> Result<Vec<String>> {
		let address = self.resolve(path).await?;
		let header = self.header_at(address).await?;
		let children = group::list_children(self.reader.as_ref(), &header, &self.superblock).await?;
		Ok(children.into_iter().map(|(name, _)| name).collect())
	}

	/// Drops decoded chunks of one dataset from the shared cache.
	pub fn invalidate_chunks(&self, path: &str) {
		self.chunk_cache.lock().purge(|(dataset, _)| dataset.as_ref() == path);
	}

	/// Opens a dataset, building its metadata record and chunk index.
	pub async fn dataset(&self, path: &str) -> Result<Hdf5Dataset> {
		let normalized = normalize_path(path);
		let address = self.resolve(&normalized).await?;
		let header = self.header_at(address).await?;

		let (Some(dataspace), Some(datatype), Some(layout)) = (header.dataspace(), header.datatype(), header.layout())
		else {
			return Err(EngineError::NotFound(format!("'{normalized}' is not a dataset")));
		};

		let filters = header.filters();
		let fill_value = match header.fill_value() {
			Some(bytes) => convert_to_f32(bytes, datatype, true)?.first().copied().unwrap_or(0.0),
			None => 0.0,
		};

		let (chunk_dims, index) = match layout {
			Layout::Chunked { btree, chunk_dims, .. } => {
				let index = ChunkIndex::new(
					self.reader.clone(),
					*btree,
					dataspace.rank(),
					self.superblock.sizes,
				);
				(Some(chunk_dims.clone()), Some(index))
			}
			_ => (None, None),
		};

		let meta = DatasetMeta {
			path: normalized,
			shape: dataspace.dims.clone(),
			chunk_dims,
			datatype: *datatype,
			filters,
			fill_value,
			attributes: header.attributes().cloned().collect(),
		};
		log::debug!(
			"opened dataset '{}' shape {:?} chunks {:?}",
			meta.path,
			meta.shape,
			meta.chunk_dims
		);

		Ok(Hdf5Dataset::new(
			meta,
			layout.clone(),
			self.reader.clone(),
			index,
			self.chunk_cache.clone(),
			self.options.decode_parallelism,
		))
	}
}

impl std::fmt::Debug for Hdf5File {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Hdf5File")
			.field("name", &self.name())
			.field("size", &self.size())
			.field("superblock", &self.superblock.version)
			.finish()
	}
}

fn normalize_path(path: &str) -> String {
	let mut normalized = String::with_capacity(path.len() + 1);
	if !path.starts_with('/') {
		normalized.push('/');
	}
	normalized.push_str(path.trim_end_matches('/'));
	if normalized.is_empty() {
		normalized.push('/');
	}
	normalized
}
