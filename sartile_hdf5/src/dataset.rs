//! Dataset region reads: pixel window in, contiguous `f32` buffer out.
//!
//! A region read enumerates the chunks under the window, fetches the
//! missing ones through one coalesced multi-range request, decodes them
//! concurrently on the blocking pool, and assembles the output in a
//! fixed chunk order so equal requests produce byte-identical buffers.

use crate::chunk_index::ChunkIndex;
use crate::filters::decode_chunk;
use crate::messages::{Attribute, Datatype, DatatypeClass, FilterSpec, Layout};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use futures::StreamExt;
use parking_lot::Mutex;
use sartile_core::cache::WeightedCache;
use sartile_core::io::SharedRangeReader;
use sartile_core::utils::CancelToken;
use sartile_core::{ByteRange, EngineError, Result};
use std::sync::Arc;

/// Immutable description of one dataset, built from its object header.
#[derive(Debug, Clone)]
pub struct DatasetMeta {
	pub path: String,
	pub shape: Vec<u64>,
	/// `None` for contiguous and compact layouts.
	pub chunk_dims: Option<Vec<u64>>,
	pub datatype: Datatype,
	pub filters: Vec<FilterSpec>,
	/// Fill value converted to `f32`; zero when the file defines none.
	pub fill_value: f32,
	pub attributes: Vec<Attribute>,
}

impl DatasetMeta {
	pub fn rank(&self) -> usize {
		self.shape.len()
	}

	/// Rows of the spatial grid (second-to-last dimension).
	pub fn height(&self) -> u64 {
		self.shape[self.rank() - 2]
	}

	/// Columns of the spatial grid (last dimension).
	pub fn width(&self) -> u64 {
		self.shape[self.rank() - 1]
	}

	pub fn attribute(&self, name: &str) -> Option<&crate::messages::AttrValue> {
		self
			.attributes
			.iter()
			.find(|attr| attr.name == name)
			.map(|attr| &attr.value)
	}
}

/// A pixel window against a dataset's spatial grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRequest {
	pub row: u64,
	pub col: u64,
	pub height: u64,
	pub width: u64,
	/// Power-of-two subsampling stride; 1 reads every pixel.
	pub stride: u64,
	/// Leading index for rank-3 datasets; ignored for rank 2.
	pub plane: u64,
	/// Convert complex64 samples to |z|² instead of their real part.
	pub complex_power: bool,
}

impl RegionRequest {
	pub fn new(row: u64, col: u64, height: u64, width: u64) -> Self {
		Self {
			row,
			col,
			height,
			width,
			stride: 1,
			plane: 0,
			complex_power: true,
		}
	}

	pub fn with_stride(mut self, stride: u64) -> Self {
		self.stride = stride.max(1);
		self
	}

	/// Output rows after subsampling.
	pub fn out_height(&self) -> usize {
		self.height.div_ceil(self.stride) as usize
	}

	/// Output columns after subsampling.
	pub fn out_width(&self) -> usize {
		self.width.div_ceil(self.stride) as usize
	}
}

/// A dense row-major `f32` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Region2D {
	pub data: Vec<f32>,
	pub width: usize,
	pub height: usize,
}

pub(crate) type ChunkCacheKey = (Arc<str>, Vec<u64>);
pub(crate) type SharedChunkCache = Arc<Mutex<WeightedCache<ChunkCacheKey, Arc<Vec<f32>>>>>;

/// An open dataset bound to its file's reader and decoded-chunk cache.
pub struct Hdf5Dataset {
	meta: Arc<DatasetMeta>,
	layout: Layout,
	reader: SharedRangeReader,
	index: Option<ChunkIndex>,
	chunk_cache: SharedChunkCache,
	parallelism: usize,
	path_key: Arc<str>,
}

impl Hdf5Dataset {
	pub(crate) fn new(
		meta: DatasetMeta,
		layout: Layout,
		reader: SharedRangeReader,
		index: Option<ChunkIndex>,
		chunk_cache: SharedChunkCache,
		parallelism: usize,
	) -> Self {
		let path_key: Arc<str> = meta.path.as_str().into();
		Self {
			meta: Arc::new(meta),
			layout,
			reader,
			index,
			chunk_cache,
			parallelism: parallelism.max(1),
			path_key,
		}
	}

	pub fn meta(&self) -> &DatasetMeta {
		&self.meta
	}

	/// Reads a spatial window, subsampled by `request.stride`.
	///
	/// Pixels inside the window but outside the dataset's extent come
	/// back as `NaN`; allocated-but-absent chunks yield the fill value.
	/// The first failing chunk fails the whole region.
	pub async fn read_region(&self, request: &RegionRequest, cancel: &CancelToken) -> Result<Region2D> {
		cancel.check()?;
		let meta = &self.meta;
		if meta.rank() != 2 && meta.rank() != 3 {
			return Err(EngineError::UnsupportedFormat(format!(
				"region read against rank-{} dataset '{}'",
				meta.rank(),
				meta.path
			)));
		}
		if meta.rank() == 3 && request.plane >= meta.shape[0] {
			return Err(EngineError::NotFound(format!(
				"plane {} of '{}' (depth {})",
				request.plane, meta.path, meta.shape[0]
			)));
		}
		if meta.datatype.class == DatatypeClass::String {
			return Err(EngineError::Decode(format!("'{}' is a string dataset", meta.path)));
		}

		let out_width = request.out_width();
		let out_height = request.out_height();
		let mut buffer = vec![f32::NAN; out_width * out_height];

		// Pixels the dataset covers default to the fill value; chunks
		// present in the index overwrite them below.
		let stride = request.stride.max(1);
		let covered_rows = sampled_span(request.row, request.height, stride, meta.height());
		let covered_cols = sampled_span(request.col, request.width, stride, meta.width());
		for out_row in 0..covered_rows {
			let line = &mut buffer[out_row * out_width..out_row * out_width + covered_cols];
			line.fill(meta.fill_value);
		}

		log::trace!(
			"read_region '{}' rows {}+{} cols {}+{} stride {stride}",
			meta.path,
			request.row,
			request.height,
			request.col,
			request.width
		);

		match &self.layout {
			Layout::Chunked { .. } => {
				self.read_chunked(request, cancel, &mut buffer, out_width).await?;
			}
			Layout::Contiguous { address, size } => {
				self
					.read_contiguous(request, *address, *size, &mut buffer, out_width)
					.await?;
			}
			Layout::Compact { data } => {
				let values = convert_to_f32(data, &meta.datatype, request.complex_power)?;
				copy_plane(&values, meta, request, &mut buffer, out_width);
			}
		}

		cancel.check()?;
		Ok(Region2D {
			data: buffer,
			width: out_width,
			height: out_height,
		})
	}

	async fn read_chunked(
		&self,
		request: &RegionRequest,
		cancel: &CancelToken,
		buffer: &mut [f32],
		out_width: usize,
	) -> Result<()> {
		let meta = &self.meta;
		let chunk_dims = meta.chunk_dims.as_ref().expect("chunked layout carries chunk dims");
		let index = self
			.index
			.as_ref()
			.expect("chunked layout carries a chunk index");
		let rank = meta.rank();
		let (chunk_height, chunk_width) = (chunk_dims[rank - 2], chunk_dims[rank - 1]);

		let stride = request.stride.max(1);
		let row_end = (request.row + request.height).min(meta.height());
		let col_end = (request.col + request.width).min(meta.width());
		if request.row >= row_end || request.col >= col_end {
			return Ok(()); // fully outside; NaN fill already in place
		}

		let mut prefix = Vec::with_capacity(1);
		if rank == 3 {
			prefix.push((request.plane / chunk_dims[0]) * chunk_dims[0]);
		}
		let chunks = index
			.range(&prefix, request.row..row_end, request.col..col_end, chunk_height, chunk_width)
			.await?;

		// Split cache hits from fetch work; chunks the stride samples
		// past entirely are dropped here.
		let mut decoded: Vec<(Vec<u64>, Arc<Vec<f32>>)> = Vec::new();
		let mut missing: Vec<(Vec<u64>, crate::chunk_index::ChunkExtent)> = Vec::new();
		for (origin, extent) in chunks {
			cancel.check()?;
			let (chunk_row, chunk_col) = (origin[origin.len() - 2], origin[origin.len() - 1]);
			let row_hit = first_sample_in(request.row, stride, chunk_row, (chunk_row + chunk_height).min(row_end));
			let col_hit = first_sample_in(request.col, stride, chunk_col, (chunk_col + chunk_width).min(col_end));
			if row_hit.is_none() || col_hit.is_none() {
				continue;
			}
			let cache_key = (self.path_key.clone(), origin.clone());
			if let Some(values) = self.chunk_cache.lock().get(&cache_key) {
				decoded.push((origin, values));
				continue;
			}
			missing.push((origin, extent));
		}

		if !missing.is_empty() {
			cancel.check()?;
			let ranges: Vec<ByteRange> = missing.iter().map(|(_, extent)| extent.range).collect();
			let payloads = self.reader.read_many(&ranges).await?;

			let expected_len = chunk_dims.iter().product::<u64>() as usize * meta.datatype.element_size();
			let jobs = missing.into_iter().zip(payloads).map(|((origin, extent), payload)| {
				let datatype = meta.datatype;
				let filters = meta.filters.clone();
				let complex_power = request.complex_power;
				let cancel = cancel.clone();
				let label = format!("chunk {origin:?} of '{}'", self.path_key);
				async move {
					cancel.check()?;
					let values = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
						let raw = decode_chunk(payload.to_vec(), &filters, extent.filter_mask, datatype.element_size())?;
						if raw.len() != expected_len {
							return Err(EngineError::Decode(format!(
								"{label} decoded to {} bytes, expected {expected_len}",
								raw.len()
							)));
						}
						convert_to_f32(&raw, &datatype, complex_power)
					})
					.await
					.map_err(|e| EngineError::Decode(format!("decode task failed: {e}")))??;
					Ok::<_, EngineError>((origin, Arc::new(values)))
				}
			});

			let mut stream = futures::stream::iter(jobs).buffer_unordered(self.parallelism);
			while let Some(result) = stream.next().await {
				let (origin, values) = result?;
				let weight = values.len() * std::mem::size_of::<f32>();
				self
					.chunk_cache
					.lock()
					.insert((self.path_key.clone(), origin.clone()), values.clone(), weight);
				decoded.push((origin, values));
			}
		}

		// Deterministic assembly order regardless of decode completion.
		decoded.sort_by(|a, b| a.0.cmp(&b.0));
		for (origin, values) in decoded {
			copy_chunk(&values, chunk_dims, &origin, meta, request, buffer, out_width);
		}
		Ok(())
	}

	async fn read_contiguous(
		&self,
		request: &RegionRequest,
		address: Option<u64>,
		size: u64,
		buffer: &mut [f32],
		out_width: usize,
	) -> Result<()> {
		let Some(address) = address else {
			return Ok(()); // unallocated: fill value already in place
		};
		let meta = &self.meta;
		let element_size = meta.datatype.element_size() as u64;
		let width = meta.width();
		let stride = request.stride.max(1);

		let row_end = (request.row + request.height).min(meta.height());
		let col_end = (request.col + request.width).min(meta.width());
		if request.row >= row_end || request.col >= col_end {
			return Ok(());
		}
		let plane_elements = meta.height() * width;
		let plane_base = if meta.rank() == 3 {
			request.plane * plane_elements
		} else {
			0
		};

		// One byte range per sampled row; the planner coalesces
		// neighbors when the stride is small.
		let mut ranges = Vec::new();
		let mut row = request.row;
		while row < row_end {
			let first = plane_base + row * width + request.col;
			let count = col_end - request.col;
			let range = ByteRange::new(address + first * element_size, count * element_size);
			if !range.fits_in(address + size) {
				return Err(EngineError::TruncatedFile(format!(
					"contiguous data of '{}' ends inside row {row}",
					meta.path
				)));
			}
			ranges.push(range);
			row += stride;
		}

		let rows = self.reader.read_many(&ranges).await?;
		for (out_row, raw) in rows.iter().enumerate() {
			let values = convert_to_f32(raw, &meta.datatype, request.complex_power)?;
			let line = &mut buffer[out_row * out_width..];
			for (out_col, value) in values.iter().step_by(stride as usize).enumerate() {
				line[out_col] = *value;
			}
		}
		Ok(())
	}

	/// Reads a whole 1-D dataset as `f64` (coordinate vectors).
	pub async fn read_vector_f64(&self) -> Result<Vec<f64>> {
		let meta = &self.meta;
		if meta.rank() != 1 {
			return Err(EngineError::Decode(format!(
				"'{}' is rank {} but a vector read was requested",
				meta.path,
				meta.rank()
			)));
		}
		let raw = self.read_all_raw().await?;
		convert_to_f64(&raw, &meta.datatype)
	}

	/// Reads a scalar or 1-element dataset as text.
	pub async fn read_scalar_string(&self) -> Result<String> {
		let raw = self.read_all_raw().await?;
		if self.meta.datatype.class != DatatypeClass::String {
			return Err(EngineError::Decode(format!("'{}' is not a string dataset", self.meta.path)));
		}
		let text = raw.split(|b| *b == 0).next().unwrap_or(&raw);
		Ok(String::from_utf8_lossy(text).trim().to_string())
	}

	/// Reads a scalar numeric dataset as `i64`.
	pub async fn read_scalar_i64(&self) -> Result<i64> {
		let raw = self.read_all_raw().await?;
		let values = convert_to_f64(&raw, &self.meta.datatype)?;
		values
			.first()
			.map(|v| *v as i64)
			.ok_or_else(|| EngineError::Decode(format!("'{}' is empty", self.meta.path)))
	}

	/// Fetches the dataset's entire raw (unfiltered) byte content.
	/// Only sensible for the small metadata datasets of a product.
	async fn read_all_raw(&self) -> Result<Vec<u8>> {
		let meta = &self.meta;
		let element_size = meta.datatype.element_size() as u64;
		let total: u64 = meta.shape.iter().product::<u64>().max(1) * element_size;

		match &self.layout {
			Layout::Compact { data } => Ok(data.clone()),
			Layout::Contiguous { address, size } => {
				let Some(address) = address else {
					return Ok(vec![0u8; total as usize]);
				};
				let bytes = self.reader.read_range(&ByteRange::new(*address, total.min(*size))).await?;
				Ok(bytes.to_vec())
			}
			Layout::Chunked { .. } => {
				let chunk_dims = meta.chunk_dims.as_ref().expect("chunked layout carries chunk dims");
				let index = self.index.as_ref().expect("chunked layout carries a chunk index");
				if meta.rank() != 1 {
					return Err(EngineError::Decode(format!(
						"whole-dataset read of chunked rank-{} dataset '{}'",
						meta.rank(),
						meta.path
					)));
				}
				let chunk_len = chunk_dims[0];
				let mut out = vec![0u8; total as usize];
				let mut start = 0u64;
				while start < meta.shape[0] {
					if let Some(extent) = index.lookup(&[start]).await? {
						let payload = self.reader.read_range(&extent.range).await?;
						let raw = decode_chunk(
							payload.to_vec(),
							&meta.filters,
							extent.filter_mask,
							meta.datatype.element_size(),
						)?;
						let offset = (start * element_size) as usize;
						let take = raw.len().min(out.len() - offset);
						out[offset..offset + take].copy_from_slice(&raw[..take]);
					}
					start += chunk_len;
				}
				Ok(out)
			}
		}
	}
}

impl std::fmt::Debug for Hdf5Dataset {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Hdf5Dataset")
			.field("path", &self.meta.path)
			.field("shape", &self.meta.shape)
			.field("chunk_dims", &self.meta.chunk_dims)
			.finish()
	}
}

/// Number of sampled positions of `origin + i*stride` that land inside
/// the first `limit` elements of the dataset axis.
fn sampled_span(origin: u64, extent: u64, stride: u64, limit: u64) -> usize {
	let end = (origin + extent).min(limit);
	if origin >= end {
		0
	} else {
		(end - origin).div_ceil(stride) as usize
	}
}

/// First sampled coordinate in `[lo, hi)`, sampling `origin + i*stride`.
fn first_sample_in(origin: u64, stride: u64, lo: u64, hi: u64) -> Option<u64> {
	let first = if lo <= origin {
		origin
	} else {
		origin + (lo - origin).div_ceil(stride) * stride
	};
	(first < hi).then_some(first)
}

/// Copies the sampled intersection of one decoded chunk into the output.
fn copy_chunk(
	values: &[f32],
	chunk_dims: &[u64],
	origin: &[u64],
	meta: &DatasetMeta,
	request: &RegionRequest,
	buffer: &mut [f32],
	out_width: usize,
) {
	let rank = meta.rank();
	let stride = request.stride.max(1);
	let (chunk_height, chunk_width) = (chunk_dims[rank - 2], chunk_dims[rank - 1]);
	let (chunk_row, chunk_col) = (origin[origin.len() - 2], origin[origin.len() - 1]);
	let row_end = (request.row + request.height).min(meta.height()).min(chunk_row + chunk_height);
	let col_end = (request.col + request.width).min(meta.width()).min(chunk_col + chunk_width);

	let plane_offset = if rank == 3 {
		(request.plane - origin[0]) * chunk_height * chunk_width
	} else {
		0
	};

	let Some(first_row) = first_sample_in(request.row, stride, chunk_row, row_end) else {
		return;
	};
	let Some(first_col) = first_sample_in(request.col, stride, chunk_col, col_end) else {
		return;
	};

	let mut row = first_row;
	while row < row_end {
		let out_row = ((row - request.row) / stride) as usize;
		let chunk_row_base = plane_offset + (row - chunk_row) * chunk_width;
		let line = &mut buffer[out_row * out_width..];

		let mut col = first_col;
		while col < col_end {
			let out_col = ((col - request.col) / stride) as usize;
			line[out_col] = values[(chunk_row_base + (col - chunk_col)) as usize];
			col += stride;
		}
		row += stride;
	}
}

/// Copies a compact dataset (stored whole) through the sampling grid.
fn copy_plane(
	values: &[f32],
	meta: &DatasetMeta,
	request: &RegionRequest,
	buffer: &mut [f32],
	out_width: usize,
) {
	let dims = if meta.rank() == 3 {
		vec![meta.shape[0], meta.height(), meta.width()]
	} else {
		vec![meta.height(), meta.width()]
	};
	let origin = vec![0; dims.len()];
	copy_chunk(values, &dims, &origin, meta, request, buffer, out_width);
}

/// Converts raw dataset bytes to `f32` samples.
pub(crate) fn convert_to_f32(raw: &[u8], datatype: &Datatype, complex_power: bool) -> Result<Vec<f32>> {
	let element = datatype.element_size();
	if element == 0 || !raw.len().is_multiple_of(element) {
		return Err(EngineError::Decode(format!(
			"{} bytes do not divide into {element}-byte elements",
			raw.len()
		)));
	}

	match datatype.class {
		DatatypeClass::Float if element == 4 => {
			let mut out = vec![0f32; raw.len() / 4];
			if datatype.big_endian {
				BigEndian::read_f32_into(raw, &mut out);
			} else {
				LittleEndian::read_f32_into(raw, &mut out);
			}
			Ok(out)
		}
		DatatypeClass::Float => Ok(read_f64s(raw, datatype.big_endian).map(|v| v as f32).collect()),
		DatatypeClass::Fixed { signed } => Ok(raw
			.chunks_exact(element)
			.map(|chunk| fixed_to_f64(chunk, signed, datatype.big_endian) as f32)
			.collect()),
		DatatypeClass::Complex => {
			let mut pairs = vec![0f32; raw.len() / 4];
			if datatype.big_endian {
				BigEndian::read_f32_into(raw, &mut pairs);
			} else {
				LittleEndian::read_f32_into(raw, &mut pairs);
			}
			Ok(pairs
				.chunks_exact(2)
				.map(|z| if complex_power { z[0] * z[0] + z[1] * z[1] } else { z[0] })
				.collect())
		}
		DatatypeClass::String => Err(EngineError::Decode("string data in a numeric conversion".to_string())),
	}
}

/// Converts raw dataset bytes to `f64` samples (coordinate vectors).
fn convert_to_f64(raw: &[u8], datatype: &Datatype) -> Result<Vec<f64>> {
	let element = datatype.element_size();
	if element == 0 || !raw.len().is_multiple_of(element) {
		return Err(EngineError::Decode(format!(
			"{} bytes do not divide into {element}-byte elements",
			raw.len()
		)));
	}
	match datatype.class {
		DatatypeClass::Float if element == 8 => Ok(read_f64s(raw, datatype.big_endian).collect()),
		DatatypeClass::Float => Ok(convert_to_f32(raw, datatype, false)?.into_iter().map(f64::from).collect()),
		DatatypeClass::Fixed { signed } => Ok(raw
			.chunks_exact(element)
			.map(|chunk| fixed_to_f64(chunk, signed, datatype.big_endian))
			.collect()),
		_ => Err(EngineError::Decode("non-numeric data in a coordinate vector".to_string())),
	}
}

fn read_f64s(raw: &[u8], big_endian: bool) -> impl Iterator<Item = f64> + '_ {
	raw.chunks_exact(8).map(move |chunk| {
		if big_endian {
			BigEndian::read_f64(chunk)
		} else {
			LittleEndian::read_f64(chunk)
		}
	})
}

fn fixed_to_f64(bytes: &[u8], signed: bool, big_endian: bool) -> f64 {
	let mut value: u64 = 0;
	if big_endian {
		for b in bytes {
			value = value << 8 | u64::from(*b);
		}
	} else {
		for b in bytes.iter().rev() {
			value = value << 8 | u64::from(*b);
		}
	}
	if signed {
		let shift = 64 - bytes.len() * 8;
		(((value << shift) as i64) >> shift) as f64
	} else {
		value as f64
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn f32_conversion_little_endian() {
		let raw: Vec<u8> = [1.5f32, -2.25, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
		let datatype = Datatype {
			class: DatatypeClass::Float,
			size: 4,
			big_endian: false,
		};
		assert_eq!(convert_to_f32(&raw, &datatype, true).unwrap(), vec![1.5, -2.25, 0.0]);
	}

	#[test]
	fn f64_conversion_is_lossy_to_f32() {
		let raw: Vec<u8> = 1.000000001f64.to_le_bytes().to_vec();
		let datatype = Datatype {
			class: DatatypeClass::Float,
			size: 8,
			big_endian: false,
		};
		assert_eq!(convert_to_f32(&raw, &datatype, true).unwrap(), vec![1.0f32]);
	}

	#[test]
	fn complex_power_conversion() {
		let raw: Vec<u8> = [3.0f32, 4.0, 1.0, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
		let datatype = Datatype {
			class: DatatypeClass::Complex,
			size: 8,
			big_endian: false,
		};
		assert_eq!(convert_to_f32(&raw, &datatype, true).unwrap(), vec![25.0, 1.0]);
		assert_eq!(convert_to_f32(&raw, &datatype, false).unwrap(), vec![3.0, 1.0]);
	}

	#[test]
	fn uint8_conversion() {
		let datatype = Datatype {
			class: DatatypeClass::Fixed { signed: false },
			size: 1,
			big_endian: false,
		};
		assert_eq!(convert_to_f32(&[0, 128, 255], &datatype, true).unwrap(), vec![0.0, 128.0, 255.0]);
	}

	#[test]
	fn ragged_buffer_is_a_decode_error() {
		let datatype = Datatype {
			class: DatatypeClass::Float,
			size: 4,
			big_endian: false,
		};
		assert!(matches!(
			convert_to_f32(&[0u8; 6], &datatype, true),
			Err(EngineError::Decode(_))
		));
	}

	#[test]
	fn sampled_span_counts() {
		assert_eq!(sampled_span(0, 10, 1, 100), 10);
		assert_eq!(sampled_span(0, 10, 4, 100), 3); // samples 0, 4, 8
		assert_eq!(sampled_span(95, 10, 1, 100), 5); // clamped at the edge
		assert_eq!(sampled_span(100, 10, 1, 100), 0);
	}

	#[test]
	fn first_sample_alignment() {
		assert_eq!(first_sample_in(0, 4, 6, 12), Some(8));
		assert_eq!(first_sample_in(0, 4, 8, 12), Some(8));
		assert_eq!(first_sample_in(0, 16, 4, 12), None);
		assert_eq!(first_sample_in(10, 1, 0, 12), Some(10));
	}
}
