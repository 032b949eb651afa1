//! In-memory HDF5 containers for tests.
//!
//! [`TestFileBuilder`] emits a minimal but well-formed 1.8-format file:
//! v0 superblock, old-style symbol-table groups, v1 object headers,
//! contiguous and chunked datasets with real filter chains. Every other
//! module reads these containers through the production path instead of
//! shipping binary fixtures. Nothing outside of tests writes HDF5.

use crate::filters::encode_chunk;
use crate::messages::FilterSpec;
use crate::{FILTER_DEFLATE, FILTER_SHUFFLE};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TestType {
	F32,
	F64,
	U8,
	Complex64,
	String { size: u32 },
	I64,
}

impl TestType {
	fn element_size(self) -> usize {
		match self {
			TestType::U8 => 1,
			TestType::F32 => 4,
			TestType::F64 | TestType::Complex64 | TestType::I64 => 8,
			TestType::String { size } => size as usize,
		}
	}
}

#[derive(Debug, Clone)]
enum AttrSpec {
	Str(String),
	F64(f64),
}

struct DatasetSpec {
	path: String,
	shape: Vec<u64>,
	datatype: TestType,
	/// Row-major element bytes of the full array.
	data: Vec<u8>,
	chunk_dims: Option<Vec<u64>>,
	filters: Vec<u16>,
	fill: Option<f32>,
	attrs: Vec<(String, AttrSpec)>,
}

/// Builds a complete HDF5 byte stream from declared datasets.
#[derive(Default)]
pub struct TestFileBuilder {
	datasets: Vec<DatasetSpec>,
}

impl TestFileBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	fn push(mut self, spec: DatasetSpec) -> Self {
		self.datasets.push(spec);
		self
	}

	/// A contiguous float32 dataset of any rank.
	pub fn dataset(self, path: &str, shape: &[u64], fill: Option<f32>, data: &[f32]) -> Self {
		assert_eq!(shape.iter().product::<u64>() as usize, data.len());
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: shape.to_vec(),
			datatype: TestType::F32,
			data: data.iter().flat_map(|v| v.to_le_bytes()).collect(),
			chunk_dims: None,
			filters: Vec::new(),
			fill,
			attrs: Vec::new(),
		})
	}

	/// A chunked float32 dataset with the given filter chain (write
	/// order; use the `FILTER_*` ids).
	pub fn dataset_chunked(self, path: &str, shape: &[u64], chunk_dims: &[u64], filters: &[u16], data: &[f32]) -> Self {
		assert_eq!(shape.iter().product::<u64>() as usize, data.len());
		assert_eq!(shape.len(), chunk_dims.len());
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: shape.to_vec(),
			datatype: TestType::F32,
			data: data.iter().flat_map(|v| v.to_le_bytes()).collect(),
			chunk_dims: Some(chunk_dims.to_vec()),
			filters: filters.to_vec(),
			fill: None,
			attrs: Vec::new(),
		})
	}

	/// A chunked complex64 dataset from interleaved (re, im) floats.
	pub fn dataset_complex(self, path: &str, shape: &[u64], chunk_dims: &[u64], interleaved: &[f32]) -> Self {
		assert_eq!(shape.iter().product::<u64>() as usize * 2, interleaved.len());
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: shape.to_vec(),
			datatype: TestType::Complex64,
			data: interleaved.iter().flat_map(|v| v.to_le_bytes()).collect(),
			chunk_dims: Some(chunk_dims.to_vec()),
			filters: Vec::new(),
			fill: None,
			attrs: Vec::new(),
		})
	}

	/// A contiguous uint8 dataset.
	pub fn dataset_u8(self, path: &str, shape: &[u64], data: &[u8]) -> Self {
		assert_eq!(shape.iter().product::<u64>() as usize, data.len());
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: shape.to_vec(),
			datatype: TestType::U8,
			data: data.to_vec(),
			chunk_dims: None,
			filters: Vec::new(),
			fill: None,
			attrs: Vec::new(),
		})
	}

	/// A contiguous 1-D float64 dataset (coordinate vectors).
	pub fn vector_f64(self, path: &str, data: &[f64]) -> Self {
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: vec![data.len() as u64],
			datatype: TestType::F64,
			data: data.iter().flat_map(|v| v.to_le_bytes()).collect(),
			chunk_dims: None,
			filters: Vec::new(),
			fill: None,
			attrs: Vec::new(),
		})
	}

	/// A scalar fixed-length string dataset.
	pub fn scalar_string(self, path: &str, value: &str) -> Self {
		let size = (value.len() + 1) as u32;
		let mut data = value.as_bytes().to_vec();
		data.push(0);
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: Vec::new(),
			datatype: TestType::String { size },
			data,
			chunk_dims: None,
			filters: Vec::new(),
			fill: None,
			attrs: Vec::new(),
		})
	}

	/// A scalar signed 64-bit integer dataset.
	pub fn scalar_i64(self, path: &str, value: i64) -> Self {
		self.push(DatasetSpec {
			path: path.to_string(),
			shape: Vec::new(),
			datatype: TestType::I64,
			data: value.to_le_bytes().to_vec(),
			chunk_dims: None,
			filters: Vec::new(),
			fill: None,
			attrs: Vec::new(),
		})
	}

	/// Attaches a string attribute to the most recently added dataset.
	pub fn attr_string(mut self, name: &str, value: &str) -> Self {
		let spec = self.datasets.last_mut().expect("attribute requires a dataset");
		spec.attrs.push((name.to_string(), AttrSpec::Str(value.to_string())));
		self
	}

	/// Attaches a float64 attribute to the most recently added dataset.
	pub fn attr_f64(mut self, name: &str, value: f64) -> Self {
		let spec = self.datasets.last_mut().expect("attribute requires a dataset");
		spec.attrs.push((name.to_string(), AttrSpec::F64(value)));
		self
	}

	/// Serializes the container.
	pub fn build(self) -> Vec<u8> {
		let mut buf = vec![0u8; 96]; // superblock patched at the end

		// Dataset payloads and headers first, groups bottom-up after.
		let mut dataset_headers: BTreeMap<String, u64> = BTreeMap::new();
		for spec in &self.datasets {
			let address = write_dataset(&mut buf, spec);
			dataset_headers.insert(spec.path.clone(), address);
		}

		let tree = GroupTree::collect(&self.datasets);
		let root_address = tree.write_group(&mut buf, "", &dataset_headers);

		patch_superblock(&mut buf, root_address);
		buf
	}
}

// ---------------------------------------------------------------------
// Group tree

enum Child {
	Group,
	Dataset,
}

struct GroupTree {
	/// group path ("" is root) → child name → kind
	children: BTreeMap<String, BTreeMap<String, Child>>,
}

impl GroupTree {
	fn collect(datasets: &[DatasetSpec]) -> GroupTree {
		let mut children: BTreeMap<String, BTreeMap<String, Child>> = BTreeMap::new();
		children.entry(String::new()).or_default();
		for spec in datasets {
			let components: Vec<&str> = spec.path.split('/').filter(|c| !c.is_empty()).collect();
			let mut parent = String::new();
			for (index, component) in components.iter().enumerate() {
				let last = index + 1 == components.len();
				let kind = if last { Child::Dataset } else { Child::Group };
				children
					.entry(parent.clone())
					.or_default()
					.insert((*component).to_string(), kind);
				parent.push('/');
				parent.push_str(component);
				if !last {
					children.entry(parent.clone()).or_default();
				}
			}
		}
		GroupTree { children }
	}

	/// Writes one group (children first) and returns its header address.
	fn write_group(&self, buf: &mut Vec<u8>, path: &str, dataset_headers: &BTreeMap<String, u64>) -> u64 {
		let mut entries: Vec<(String, u64)> = Vec::new();
		for (name, kind) in &self.children[path] {
			let child_path = format!("{path}/{name}");
			let address = match kind {
				Child::Group => self.write_group(buf, &child_path, dataset_headers),
				Child::Dataset => dataset_headers[&child_path],
			};
			entries.push((name.clone(), address));
		}

		// Local heap: offset 0 is the empty name, then each child name.
		let mut heap_data = vec![0u8; 8];
		let mut name_offsets = Vec::new();
		for (name, _) in &entries {
			name_offsets.push(heap_data.len() as u64);
			heap_data.extend_from_slice(name.as_bytes());
			heap_data.push(0);
			while !heap_data.len().is_multiple_of(8) {
				heap_data.push(0);
			}
		}
		align8(buf);
		let heap_segment = buf.len() as u64;
		buf.extend_from_slice(&heap_data);

		align8(buf);
		let heap_address = buf.len() as u64;
		buf.extend_from_slice(b"HEAP");
		buf.extend_from_slice(&[0, 0, 0, 0]); // version, reserved
		buf.extend_from_slice(&(heap_data.len() as u64).to_le_bytes());
		buf.extend_from_slice(&u64::MAX.to_le_bytes()); // free list head
		buf.extend_from_slice(&heap_segment.to_le_bytes());

		align8(buf);
		let snod_address = buf.len() as u64;
		buf.extend_from_slice(b"SNOD");
		buf.push(1);
		buf.push(0);
		buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
		for ((_, address), name_offset) in entries.iter().zip(&name_offsets) {
			buf.extend_from_slice(&name_offset.to_le_bytes());
			buf.extend_from_slice(&address.to_le_bytes());
			buf.extend_from_slice(&[0u8; 8 + 16]); // cache type, reserved, scratch
		}

		align8(buf);
		let btree_address = buf.len() as u64;
		buf.extend_from_slice(b"TREE");
		buf.push(0); // group node
		buf.push(0); // leaf level
		buf.extend_from_slice(&1u16.to_le_bytes());
		buf.extend_from_slice(&u64::MAX.to_le_bytes()); // siblings
		buf.extend_from_slice(&u64::MAX.to_le_bytes());
		buf.extend_from_slice(&0u64.to_le_bytes()); // key 0: empty name
		buf.extend_from_slice(&snod_address.to_le_bytes());
		buf.extend_from_slice(&name_offsets.last().copied().unwrap_or(0).to_le_bytes());

		let mut body = Vec::new();
		body.extend_from_slice(&btree_address.to_le_bytes());
		body.extend_from_slice(&heap_address.to_le_bytes());
		let messages = vec![v1_message(crate::messages::MSG_SYMBOL_TABLE, &body)];
		write_v1_header(buf, &messages)
	}
}

// ---------------------------------------------------------------------
// Dataset writing

fn write_dataset(buf: &mut Vec<u8>, spec: &DatasetSpec) -> u64 {
	let element_size = spec.datatype.element_size();

	let layout_body = match &spec.chunk_dims {
		None => {
			align8(buf);
			let address = buf.len() as u64;
			buf.extend_from_slice(&spec.data);

			let mut body = vec![3u8, 1];
			body.extend_from_slice(&address.to_le_bytes());
			body.extend_from_slice(&(spec.data.len() as u64).to_le_bytes());
			body
		}
		Some(chunk_dims) => {
			let chain = filter_chain(&spec.filters, element_size);
			let chunks = split_chunks(spec, chunk_dims, element_size);
			let mut entries = Vec::new();
			for (origin, raw) in chunks {
				let encoded = encode_chunk(raw, &chain, element_size).expect("test filter chain encodes");
				align8(buf);
				let address = buf.len() as u64;
				buf.extend_from_slice(&encoded);
				entries.push((origin, encoded.len() as u32, address));
			}

			align8(buf);
			let btree_address = buf.len() as u64;
			write_chunk_btree(buf, &entries, chunk_dims);

			let mut body = vec![3u8, 2, (spec.shape.len() + 1) as u8];
			body.extend_from_slice(&btree_address.to_le_bytes());
			for dim in chunk_dims {
				body.extend_from_slice(&(*dim as u32).to_le_bytes());
			}
			body.extend_from_slice(&(element_size as u32).to_le_bytes());
			body
		}
	};

	let mut messages = Vec::new();
	messages.push(v1_message(crate::messages::MSG_DATASPACE, &dataspace_body(&spec.shape)));
	messages.push(v1_message(crate::messages::MSG_DATATYPE, &datatype_body(spec.datatype)));
	messages.push(v1_message(crate::messages::MSG_FILL_VALUE, &fill_body(spec)));
	messages.push(v1_message(crate::messages::MSG_LAYOUT, &layout_body));
	if !spec.filters.is_empty() {
		messages.push(v1_message(
			crate::messages::MSG_FILTER_PIPELINE,
			&filter_pipeline_body(&spec.filters, element_size),
		));
	}
	for (name, value) in &spec.attrs {
		messages.push(v1_message(crate::messages::MSG_ATTRIBUTE, &attribute_body(name, value)));
	}
	write_v1_header(buf, &messages)
}

/// Splits the full array into padded, row-major chunk buffers.
fn split_chunks(spec: &DatasetSpec, chunk_dims: &[u64], element_size: usize) -> Vec<(Vec<u64>, Vec<u8>)> {
	let rank = spec.shape.len();
	let fill_bytes = fill_element(spec, element_size);
	let chunk_elements: u64 = chunk_dims.iter().product();

	let grid: Vec<u64> = spec
		.shape
		.iter()
		.zip(chunk_dims)
		.map(|(dim, chunk)| dim.div_ceil(*chunk))
		.collect();

	let mut chunks = Vec::new();
	let mut grid_pos = vec![0u64; rank];
	loop {
		let origin: Vec<u64> = grid_pos.iter().zip(chunk_dims).map(|(g, c)| g * c).collect();
		let mut raw = Vec::with_capacity(chunk_elements as usize * element_size);
		let mut local = vec![0u64; rank];
		loop {
			let global: Vec<u64> = origin.iter().zip(&local).map(|(o, l)| o + l).collect();
			if global.iter().zip(&spec.shape).all(|(g, dim)| g < dim) {
				let mut flat = 0u64;
				for (index, g) in global.iter().enumerate() {
					flat = flat * spec.shape[index] + g;
				}
				let start = flat as usize * element_size;
				raw.extend_from_slice(&spec.data[start..start + element_size]);
			} else {
				raw.extend_from_slice(&fill_bytes);
			}
			if !advance(&mut local, chunk_dims) {
				break;
			}
		}
		chunks.push((origin, raw));
		if !advance(&mut grid_pos, &grid) {
			break;
		}
	}
	chunks
}

/// Odometer increment; returns false after the last position.
fn advance(position: &mut [u64], limits: &[u64]) -> bool {
	for axis in (0..position.len()).rev() {
		position[axis] += 1;
		if position[axis] < limits[axis] {
			return true;
		}
		position[axis] = 0;
	}
	false
}

fn fill_element(spec: &DatasetSpec, element_size: usize) -> Vec<u8> {
	match (spec.fill, spec.datatype) {
		(Some(fill), TestType::F32) => fill.to_le_bytes().to_vec(),
		_ => vec![0u8; element_size],
	}
}

fn write_chunk_btree(buf: &mut Vec<u8>, entries: &[(Vec<u64>, u32, u64)], chunk_dims: &[u64]) {
	assert!(entries.len() <= 512, "test b-tree writer emits a single leaf");
	buf.extend_from_slice(b"TREE");
	buf.push(1); // chunk node
	buf.push(0); // leaf
	buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
	buf.extend_from_slice(&u64::MAX.to_le_bytes());
	buf.extend_from_slice(&u64::MAX.to_le_bytes());

	for (origin, size, address) in entries {
		buf.extend_from_slice(&size.to_le_bytes());
		buf.extend_from_slice(&0u32.to_le_bytes()); // filter mask
		for coord in origin {
			buf.extend_from_slice(&coord.to_le_bytes());
		}
		buf.extend_from_slice(&0u64.to_le_bytes()); // element-size dim
		buf.extend_from_slice(&address.to_le_bytes());
	}

	// Upper-bound key: one chunk past the last origin.
	let (last_origin, _, _) = entries.last().expect("at least one chunk");
	buf.extend_from_slice(&0u32.to_le_bytes());
	buf.extend_from_slice(&0u32.to_le_bytes());
	for (coord, chunk) in last_origin.iter().zip(chunk_dims) {
		buf.extend_from_slice(&(coord + chunk).to_le_bytes());
	}
	buf.extend_from_slice(&0u64.to_le_bytes());
}

// ---------------------------------------------------------------------
// Message bodies

fn v1_message(kind: u16, body: &[u8]) -> Vec<u8> {
	let padded = body.len().next_multiple_of(8);
	let mut bytes = Vec::with_capacity(8 + padded);
	bytes.extend_from_slice(&kind.to_le_bytes());
	bytes.extend_from_slice(&(padded as u16).to_le_bytes());
	bytes.extend_from_slice(&[0u8; 4]); // flags, reserved
	bytes.extend_from_slice(body);
	bytes.resize(8 + padded, 0);
	bytes
}

fn write_v1_header(buf: &mut Vec<u8>, messages: &[Vec<u8>]) -> u64 {
	align8(buf);
	let address = buf.len() as u64;
	let block: Vec<u8> = messages.concat();
	buf.push(1);
	buf.push(0);
	buf.extend_from_slice(&(messages.len() as u16).to_le_bytes());
	buf.extend_from_slice(&1u32.to_le_bytes()); // reference count
	buf.extend_from_slice(&(block.len() as u32).to_le_bytes());
	buf.extend_from_slice(&[0u8; 4]); // pad to 8-byte message alignment
	buf.extend_from_slice(&block);
	address
}

fn dataspace_body(shape: &[u64]) -> Vec<u8> {
	let mut body = vec![1u8, shape.len() as u8, 0, 0, 0, 0, 0, 0];
	for dim in shape {
		body.extend_from_slice(&dim.to_le_bytes());
	}
	body
}

fn float_datatype(size: u32) -> Vec<u8> {
	let mut body = vec![0x11, 0, 0, 0];
	body.extend_from_slice(&size.to_le_bytes());
	if size == 4 {
		body.extend_from_slice(&0u16.to_le_bytes()); // bit offset
		body.extend_from_slice(&32u16.to_le_bytes()); // precision
		body.extend_from_slice(&[23, 8, 0, 23]); // exponent/mantissa layout
		body.extend_from_slice(&127u32.to_le_bytes());
	} else {
		body.extend_from_slice(&0u16.to_le_bytes());
		body.extend_from_slice(&64u16.to_le_bytes());
		body.extend_from_slice(&[52, 11, 0, 52]);
		body.extend_from_slice(&1023u32.to_le_bytes());
	}
	body
}

fn datatype_body(datatype: TestType) -> Vec<u8> {
	match datatype {
		TestType::F32 => float_datatype(4),
		TestType::F64 => float_datatype(8),
		TestType::U8 => {
			let mut body = vec![0x10, 0, 0, 0];
			body.extend_from_slice(&1u32.to_le_bytes());
			body.extend_from_slice(&0u16.to_le_bytes());
			body.extend_from_slice(&8u16.to_le_bytes());
			body
		}
		TestType::I64 => {
			let mut body = vec![0x10, 0x08, 0, 0]; // signed
			body.extend_from_slice(&8u32.to_le_bytes());
			body.extend_from_slice(&0u16.to_le_bytes());
			body.extend_from_slice(&64u16.to_le_bytes());
			body
		}
		TestType::String { size } => {
			let mut body = vec![0x13, 0, 0, 0];
			body.extend_from_slice(&size.to_le_bytes());
			body
		}
		TestType::Complex64 => {
			// v1 compound of two 4-byte floats named r and i.
			let mut body = vec![0x16, 2, 0, 0];
			body.extend_from_slice(&8u32.to_le_bytes());
			for (name, offset) in [("r", 0u32), ("i", 4u32)] {
				let mut member_name = name.as_bytes().to_vec();
				member_name.push(0);
				member_name.resize(member_name.len().next_multiple_of(8), 0);
				body.extend_from_slice(&member_name);
				body.extend_from_slice(&offset.to_le_bytes());
				body.push(0); // dimensionality
				body.extend_from_slice(&[0u8; 3]);
				body.extend_from_slice(&[0u8; 8]); // permutation, reserved
				body.extend_from_slice(&[0u8; 16]); // dimension sizes
				body.extend_from_slice(&float_datatype(4));
			}
			body
		}
	}
}

fn fill_body(spec: &DatasetSpec) -> Vec<u8> {
	match (spec.fill, spec.datatype) {
		(Some(fill), TestType::F32) => {
			let mut body = vec![2u8, 2, 0, 1];
			body.extend_from_slice(&4u32.to_le_bytes());
			body.extend_from_slice(&fill.to_le_bytes());
			body
		}
		_ => vec![2u8, 2, 0, 0],
	}
}

fn filter_chain(ids: &[u16], element_size: usize) -> Vec<FilterSpec> {
	ids
		.iter()
		.map(|id| FilterSpec {
			id: *id,
			flags: 0,
			client_data: match *id {
				FILTER_SHUFFLE => vec![element_size as u32],
				FILTER_DEFLATE => vec![6],
				_ => Vec::new(),
			},
			name: String::new(),
		})
		.collect()
}

fn filter_pipeline_body(ids: &[u16], element_size: usize) -> Vec<u8> {
	let chain = filter_chain(ids, element_size);
	let mut body = vec![1u8, chain.len() as u8, 0, 0, 0, 0, 0, 0];
	for filter in &chain {
		body.extend_from_slice(&filter.id.to_le_bytes());
		body.extend_from_slice(&0u16.to_le_bytes()); // name length
		body.extend_from_slice(&filter.flags.to_le_bytes());
		body.extend_from_slice(&(filter.client_data.len() as u16).to_le_bytes());
		for value in &filter.client_data {
			body.extend_from_slice(&value.to_le_bytes());
		}
		if filter.client_data.len() % 2 == 1 {
			body.extend_from_slice(&0u32.to_le_bytes());
		}
	}
	body
}

fn attribute_body(name: &str, value: &AttrSpec) -> Vec<u8> {
	let (datatype, data): (Vec<u8>, Vec<u8>) = match value {
		AttrSpec::Str(text) => {
			let mut bytes = text.as_bytes().to_vec();
			bytes.push(0);
			(
				datatype_body(TestType::String {
					size: bytes.len() as u32,
				}),
				bytes,
			)
		}
		AttrSpec::F64(number) => (float_datatype(8), number.to_le_bytes().to_vec()),
	};
	let dataspace = dataspace_body(&[]);

	let mut body = vec![1u8, 0];
	body.extend_from_slice(&((name.len() + 1) as u16).to_le_bytes());
	body.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
	body.extend_from_slice(&(dataspace.len() as u16).to_le_bytes());
	body.extend_from_slice(name.as_bytes());
	body.push(0);
	body.resize(8 + (name.len() + 1).next_multiple_of(8), 0);
	body.extend_from_slice(&datatype);
	body.resize(body.len().next_multiple_of(8), 0);
	body.extend_from_slice(&dataspace);
	body.resize(body.len().next_multiple_of(8), 0);
	body.extend_from_slice(&data);
	body
}

fn align8(buf: &mut Vec<u8>) {
	while !buf.len().is_multiple_of(8) {
		buf.push(0);
	}
}

fn patch_superblock(buf: &mut Vec<u8>, root_address: u64) {
	let end_of_file = buf.len() as u64;
	let mut sb = Vec::with_capacity(96);
	sb.extend_from_slice(&[0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n']);
	sb.extend_from_slice(&[0, 0, 0, 0, 0]); // superblock/freespace/symbol-table/reserved/shared versions
	sb.extend_from_slice(&[8, 8, 0]); // offset size, length size, reserved
	sb.extend_from_slice(&4u16.to_le_bytes()); // group leaf k
	sb.extend_from_slice(&16u16.to_le_bytes()); // group internal k
	sb.extend_from_slice(&0u32.to_le_bytes()); // consistency flags
	sb.extend_from_slice(&0u64.to_le_bytes()); // base address
	sb.extend_from_slice(&u64::MAX.to_le_bytes()); // free space
	sb.extend_from_slice(&end_of_file.to_le_bytes());
	sb.extend_from_slice(&u64::MAX.to_le_bytes()); // driver info
	sb.extend_from_slice(&0u64.to_le_bytes()); // root link name offset
	sb.extend_from_slice(&root_address.to_le_bytes());
	sb.extend_from_slice(&[0u8; 24]); // cache type, reserved, scratch
	buf[..96].copy_from_slice(&sb);
}
