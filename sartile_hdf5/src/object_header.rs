//! Object header reading, versions 1 and 2, with continuation blocks.

use crate::checksum::jenkins_lookup3;
use crate::cursor::SliceReader;
use crate::messages::{self, Attribute, Message};
use crate::superblock::Sizes;
use sartile_core::io::RangeReader;
use sartile_core::{ByteRange, EngineError, Result};

const OHDR_SIGNATURE: &[u8; 4] = b"OHDR";
const OCHK_SIGNATURE: &[u8; 4] = b"OCHK";

/// All messages of one object, continuations resolved.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
	pub address: u64,
	pub messages: Vec<Message>,
}

impl ObjectHeader {
	/// Reads and decodes the header at `address`.
	pub async fn read(reader: &dyn RangeReader, address: u64, sizes: Sizes) -> Result<ObjectHeader> {
		let available = reader
			.size()
			.checked_sub(address)
			.ok_or_else(|| EngineError::TruncatedFile(format!("object header at {address} past end of file")))?;
		let prefix = reader.read_range(&ByteRange::new(address, 48.min(available))).await?;

		let mut pending: Vec<ByteRange>;
		let mut messages = Vec::new();
		let mut v2_flags = 0u8;

		if prefix.len() >= 6 && prefix[..4] == *OHDR_SIGNATURE {
			v2_flags = prefix[5];
			let (block_range, first) = v2_layout(&prefix, address)?;
			let block = reader.read_range(&block_range).await?;
			pending = parse_v2_block(&block, first, sizes, &mut messages)?;
		} else {
			let mut cursor = SliceReader::new(&prefix);
			let version = cursor.read_u8()?;
			if version != 1 {
				return Err(EngineError::UnsupportedFormat(format!("object header v{version}")));
			}
			cursor.skip(1)?; // reserved
			let _message_count = cursor.read_u16()?;
			cursor.skip(4)?; // reference count
			let header_size = u64::from(cursor.read_u32()?);
			// Messages start 8-aligned, 4 bytes of padding after the prefix.
			let block = reader.read_range(&ByteRange::new(address + 16, header_size)).await?;
			pending = parse_v1_block(&block, sizes, &mut messages)?;
		}

		// Continuation blocks may themselves continue; depth is small in
		// practice but unbounded in the format.
		let mut guard = 0;
		while let Some(range) = pending.pop() {
			guard += 1;
			if guard > 64 {
				return Err(EngineError::UnsupportedFormat(
					"object header with more than 64 continuation blocks".to_string(),
				));
			}
			let block = reader.read_range(&range).await?;
			let more = if block.len() >= 4 && block[..4] == *OCHK_SIGNATURE {
				parse_v2_continuation(&block, v2_flags, sizes, &mut messages)?
			} else {
				parse_v1_block(&block, sizes, &mut messages)?
			};
			pending.extend(more);
		}

		Ok(ObjectHeader { address, messages })
	}

	pub fn dataspace(&self) -> Option<&messages::Dataspace> {
		self.messages.iter().find_map(|m| match m {
			Message::Dataspace(space) => Some(space),
			_ => None,
		})
	}

	pub fn datatype(&self) -> Option<&messages::Datatype> {
		self.messages.iter().find_map(|m| match m {
			Message::Datatype(datatype) => Some(datatype),
			_ => None,
		})
	}

	pub fn layout(&self) -> Option<&messages::Layout> {
		self.messages.iter().find_map(|m| match m {
			Message::Layout(layout) => Some(layout),
			_ => None,
		})
	}

	pub fn filters(&self) -> Vec<messages::FilterSpec> {
		self
			.messages
			.iter()
			.find_map(|m| match m {
				Message::FilterPipeline(filters) => Some(filters.clone()),
				_ => None,
			})
			.unwrap_or_default()
	}

	pub fn fill_value(&self) -> Option<&[u8]> {
		self.messages.iter().find_map(|m| match m {
			Message::FillValue(Some(bytes)) => Some(bytes.as_slice()),
			_ => None,
		})
	}

	pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
		self.messages.iter().filter_map(|m| match m {
			Message::Attribute(attr) => Some(attr),
			_ => None,
		})
	}

	/// Old-style group pointers, if this object is such a group.
	pub fn symbol_table(&self) -> Option<(u64, u64)> {
		self.messages.iter().find_map(|m| match m {
			Message::SymbolTable { btree, heap } => Some((*btree, *heap)),
			_ => None,
		})
	}

	/// New-style compact group links.
	pub fn links(&self) -> Vec<(String, u64)> {
		self
			.messages
			.iter()
			.filter_map(|m| match m {
				Message::Link { name, address } => Some((name.clone(), *address)),
				_ => None,
			})
			.collect()
	}
}

/// Parses one v1 message run; returns continuation ranges found in it.
fn parse_v1_block(block: &[u8], sizes: Sizes, messages: &mut Vec<Message>) -> Result<Vec<ByteRange>> {
	let mut cursor = SliceReader::new(block);
	let mut continuations = Vec::new();

	while cursor.remaining() >= 8 {
		let kind = cursor.read_u16()?;
		let size = cursor.read_u16()? as usize;
		let flags = cursor.read_u8()?;
		cursor.skip(3)?;
		let body = cursor.read_bytes(size)?;
		push_message(kind, flags, body, sizes, messages, &mut continuations)?;
	}
	Ok(continuations)
}

/// Computes the v2 prefix layout from the speculative read and returns
/// the full block range plus the offset of the first message in it.
fn v2_layout(prefix: &[u8], address: u64) -> Result<(ByteRange, usize)> {
	let mut cursor = SliceReader::new(prefix);
	cursor.skip(4)?;
	let version = cursor.read_u8()?;
	if version != 2 {
		return Err(EngineError::UnsupportedFormat(format!("object header v{version}")));
	}
	let flags = cursor.read_u8()?;
	if flags & 0x20 != 0 {
		cursor.skip(16)?; // access/modification/change/birth times
	}
	if flags & 0x10 != 0 {
		cursor.skip(4)?; // attribute storage phase change
	}
	let chunk_size = cursor.read_sized(1 << (flags & 0x03))?;
	let first_message = cursor.position();
	let total = first_message as u64 + chunk_size + 4;
	Ok((ByteRange::new(address, total), first_message))
}

fn parse_v2_block(block: &[u8], first_message: usize, sizes: Sizes, messages: &mut Vec<Message>) -> Result<Vec<ByteRange>> {
	verify_block_checksum(block, "object header")?;
	let flags = block[5];
	parse_v2_messages(&block[first_message..block.len() - 4], flags, sizes, messages)
}

fn parse_v2_continuation(block: &[u8], header_flags: u8, sizes: Sizes, messages: &mut Vec<Message>) -> Result<Vec<ByteRange>> {
	if block.len() < 8 {
		return Err(EngineError::TruncatedFile(
			"object header continuation shorter than its framing".to_string(),
		));
	}
	verify_block_checksum(block, "object header continuation")?;
	parse_v2_messages(&block[4..block.len() - 4], header_flags, sizes, messages)
}

fn parse_v2_messages(body: &[u8], header_flags: u8, sizes: Sizes, messages: &mut Vec<Message>) -> Result<Vec<ByteRange>> {
	let tracked = header_flags & 0x04 != 0;
	let header_len = if tracked { 6 } else { 4 };
	let mut cursor = SliceReader::new(body);
	let mut continuations = Vec::new();

	while cursor.remaining() >= header_len {
		let kind = u16::from(cursor.read_u8()?);
		let size = cursor.read_u16()? as usize;
		let flags = cursor.read_u8()?;
		if tracked {
			cursor.skip(2)?;
		}
		if cursor.remaining() < size {
			break; // trailing gap
		}
		let body = cursor.read_bytes(size)?;
		push_message(kind, flags, body, sizes, messages, &mut continuations)?;
	}
	Ok(continuations)
}

fn push_message(
	kind: u16,
	flags: u8,
	body: &[u8],
	sizes: Sizes,
	messages: &mut Vec<Message>,
	continuations: &mut Vec<ByteRange>,
) -> Result<()> {
	if flags & 0x02 != 0 {
		// Shared messages live in a shared-message heap this subset
		// does not index. Fatal only for messages the read path needs.
		return match kind {
			messages::MSG_DATASPACE | messages::MSG_DATATYPE | messages::MSG_LAYOUT | messages::MSG_FILTER_PIPELINE => {
				Err(EngineError::UnsupportedFormat(format!("shared message of kind {kind:#06x}")))
			}
			_ => Ok(()),
		};
	}

	match messages::parse_message(kind, body, sizes)? {
		Message::Continuation(range) => continuations.push(range),
		Message::Other { kind } => log::trace!("ignoring message kind {kind:#06x}"),
		message => messages.push(message),
	}
	Ok(())
}

fn verify_block_checksum(block: &[u8], what: &str) -> Result<()> {
	if block.len() < 4 {
		return Err(EngineError::TruncatedFile(format!("{what} shorter than its checksum")));
	}
	let body = &block[..block.len() - 4];
	let stored = u32::from_le_bytes(block[block.len() - 4..].try_into().unwrap());
	let computed = jenkins_lookup3(body, 0);
	if stored != computed {
		return Err(EngineError::InvalidChecksum(format!(
			"{what} (stored {stored:#010x}, computed {computed:#010x})"
		)));
	}
	Ok(())
}
