//! The chunk filter pipeline.
//!
//! Filters are recorded in write order and undone in reverse on read:
//! verify-and-strip fletcher32, inflate, un-shuffle. A chunk's filter
//! mask can switch off individual entries; bit i set means pipeline
//! entry i was skipped when the chunk was written.

use crate::checksum::fletcher32;
use crate::messages::FilterSpec;
use flate2::read::ZlibDecoder;
use sartile_core::{EngineError, Result};
use std::io::Read;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_LZF: u16 = 32000;

/// Undoes a chunk's filter chain.
///
/// `element_size` is the fallback shuffle stride when the pipeline
/// carries no client data for it.
pub fn decode_chunk(data: Vec<u8>, chain: &[FilterSpec], filter_mask: u32, element_size: usize) -> Result<Vec<u8>> {
	let mut data = data;
	for (index, filter) in chain.iter().enumerate().rev() {
		if filter_mask & (1 << index) != 0 {
			continue;
		}
		data = match filter.id {
			FILTER_DEFLATE => inflate(&data)?,
			FILTER_SHUFFLE => {
				let stride = filter.client_data.first().map_or(element_size, |v| *v as usize);
				unshuffle(&data, stride)
			}
			FILTER_FLETCHER32 => verify_fletcher32(data)?,
			id if filter.is_optional() => {
				// An optional filter the writer could not apply leaves
				// the data untouched; pass it through unchanged.
				log::debug!("skipping optional unimplemented filter {id} ('{}')", filter.name);
				data
			}
			id => return Err(EngineError::UnsupportedFilter(id)),
		};
	}
	Ok(data)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(data.len() * 4);
	ZlibDecoder::new(data)
		.read_to_end(&mut out)
		.map_err(|e| EngineError::Decode(format!("deflate chunk: {e}")))?;
	Ok(out)
}

/// Inverse byte shuffle: the written form groups byte 0 of every
/// element, then byte 1, and so on.
fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
	if element_size < 2 || !data.len().is_multiple_of(element_size) {
		return data.to_vec();
	}
	let count = data.len() / element_size;
	let mut out = vec![0u8; data.len()];
	for byte_index in 0..element_size {
		let plane = &data[byte_index * count..(byte_index + 1) * count];
		for (element_index, value) in plane.iter().enumerate() {
			out[element_index * element_size + byte_index] = *value;
		}
	}
	out
}

/// Checks and strips the trailing 4-byte checksum.
///
/// The stored word is accepted in either byte order: early library
/// versions wrote it big-endian, and the reference implementation keeps
/// the same tolerance.
fn verify_fletcher32(mut data: Vec<u8>) -> Result<Vec<u8>> {
	if data.len() < 4 {
		return Err(EngineError::Decode("fletcher32 chunk shorter than its checksum".to_string()));
	}
	let payload_len = data.len() - 4;
	let stored_le = u32::from_le_bytes(data[payload_len..].try_into().unwrap());
	let stored_be = stored_le.swap_bytes();
	let computed = fletcher32(&data[..payload_len]);
	if computed != stored_le && computed != stored_be {
		return Err(EngineError::InvalidChecksum(format!(
			"chunk payload (stored {stored_le:#010x}, computed {computed:#010x})"
		)));
	}
	data.truncate(payload_len);
	Ok(data)
}

/// Applies a filter chain in write order. Test scaffolding for the
/// in-memory container writer; the engine itself never filters data.
pub(crate) fn encode_chunk(data: Vec<u8>, chain: &[FilterSpec], element_size: usize) -> Result<Vec<u8>> {
	use flate2::{Compression, read::ZlibEncoder};

	let mut data = data;
	for filter in chain {
		data = match filter.id {
			FILTER_DEFLATE => {
				let mut out = Vec::new();
				ZlibEncoder::new(data.as_slice(), Compression::new(6))
					.read_to_end(&mut out)
					.map_err(|e| EngineError::Decode(format!("deflate encode: {e}")))?;
				out
			}
			FILTER_SHUFFLE => {
				let stride = filter.client_data.first().map_or(element_size, |v| *v as usize);
				shuffle(&data, stride)
			}
			FILTER_FLETCHER32 => {
				let checksum = fletcher32(&data);
				data.extend_from_slice(&checksum.to_le_bytes());
				data
			}
			id => return Err(EngineError::UnsupportedFilter(id)),
		};
	}
	Ok(data)
}

fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
	if element_size < 2 || !data.len().is_multiple_of(element_size) {
		return data.to_vec();
	}
	let count = data.len() / element_size;
	let mut out = vec![0u8; data.len()];
	for (element_index, element) in data.chunks_exact(element_size).enumerate() {
		for (byte_index, value) in element.iter().enumerate() {
			out[byte_index * count + element_index] = *value;
		}
	}
	out
}
