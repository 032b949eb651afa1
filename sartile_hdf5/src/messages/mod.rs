//! Object header messages.
//!
//! Only the messages the GCOV read path needs are decoded: dataspace,
//! datatype, fill value, data layout, filter pipeline, attribute, link,
//! symbol table and continuation. Everything else is carried as
//! [`Message::Other`] and ignored; this is a read-only consumer, so
//! unknown messages are never a reason to refuse a file.

mod attribute;
mod dataspace;
mod datatype;
mod filter_pipeline;
mod layout;

pub use attribute::{AttrValue, Attribute};
pub use dataspace::Dataspace;
pub use datatype::{Datatype, DatatypeClass};
pub use filter_pipeline::FilterSpec;
pub use layout::Layout;

use crate::cursor::SliceReader;
use crate::superblock::Sizes;
use sartile_core::{ByteRange, EngineError, Result};

pub const MSG_NIL: u16 = 0x0000;
pub const MSG_DATASPACE: u16 = 0x0001;
pub const MSG_LINK_INFO: u16 = 0x0002;
pub const MSG_DATATYPE: u16 = 0x0003;
pub const MSG_FILL_VALUE_OLD: u16 = 0x0004;
pub const MSG_FILL_VALUE: u16 = 0x0005;
pub const MSG_LINK: u16 = 0x0006;
pub const MSG_LAYOUT: u16 = 0x0008;
pub const MSG_FILTER_PIPELINE: u16 = 0x000B;
pub const MSG_ATTRIBUTE: u16 = 0x000C;
pub const MSG_CONTINUATION: u16 = 0x0010;
pub const MSG_SYMBOL_TABLE: u16 = 0x0011;

/// One decoded object header message.
#[derive(Debug, Clone)]
pub enum Message {
	Dataspace(Dataspace),
	Datatype(Datatype),
	/// Raw fill bytes in the dataset's element type; `None` means
	/// undefined (zeros by format convention).
	FillValue(Option<Vec<u8>>),
	Layout(Layout),
	FilterPipeline(Vec<FilterSpec>),
	Attribute(Attribute),
	/// A hard link to a child object (new-style compact groups).
	Link { name: String, address: u64 },
	/// Old-style group: addresses of the group B-tree and local heap.
	SymbolTable { btree: u64, heap: u64 },
	/// Header continues in another block.
	Continuation(ByteRange),
	Other { kind: u16 },
}

/// Decodes one message body. Unknown kinds come back as
/// [`Message::Other`]; malformed known kinds are hard errors.
pub fn parse_message(kind: u16, body: &[u8], sizes: Sizes) -> Result<Message> {
	let mut cursor = SliceReader::new(body);
	match kind {
		MSG_DATASPACE => Ok(Message::Dataspace(Dataspace::parse(&mut cursor, sizes)?)),
		MSG_DATATYPE => Ok(Message::Datatype(Datatype::parse(&mut cursor)?)),
		MSG_FILL_VALUE_OLD => parse_fill_value_old(&mut cursor),
		MSG_FILL_VALUE => parse_fill_value(&mut cursor),
		MSG_LAYOUT => Ok(Message::Layout(Layout::parse(&mut cursor, sizes)?)),
		MSG_FILTER_PIPELINE => Ok(Message::FilterPipeline(filter_pipeline::parse(&mut cursor)?)),
		MSG_ATTRIBUTE => Ok(attribute::parse(&mut cursor, sizes)?),
		MSG_LINK => parse_link(&mut cursor, sizes),
		MSG_SYMBOL_TABLE => {
			let btree = cursor.read_offset(sizes.offset)?;
			let heap = cursor.read_offset(sizes.offset)?;
			match (btree, heap) {
				(Some(btree), Some(heap)) => Ok(Message::SymbolTable { btree, heap }),
				_ => Err(EngineError::UnsupportedFormat(
					"symbol table message without b-tree or heap".to_string(),
				)),
			}
		}
		MSG_CONTINUATION => {
			let offset = cursor
				.read_offset(sizes.offset)?
				.ok_or_else(|| EngineError::UnsupportedFormat("continuation at undefined address".to_string()))?;
			let length = cursor.read_sized(sizes.length)?;
			Ok(Message::Continuation(ByteRange::new(offset, length)))
		}
		other => Ok(Message::Other { kind: other }),
	}
}

/// Fill value (old), message 0x0004: size then raw value.
fn parse_fill_value_old(cursor: &mut SliceReader) -> Result<Message> {
	let size = cursor.read_u32()? as usize;
	let value = if size == 0 {
		None
	} else {
		Some(cursor.read_bytes(size)?.to_vec())
	};
	Ok(Message::FillValue(value))
}

/// Fill value, message 0x0005, versions 1-3.
fn parse_fill_value(cursor: &mut SliceReader) -> Result<Message> {
	let version = cursor.read_u8()?;
	let defined = match version {
		1 | 2 => {
			cursor.skip(2)?; // space allocation time, fill write time
			cursor.read_u8()? == 1
		}
		3 => {
			let flags = cursor.read_u8()?;
			if flags & 0x10 != 0 {
				// "undefined" flag set
				false
			} else {
				flags & 0x20 != 0
			}
		}
		other => {
			return Err(EngineError::UnsupportedFormat(format!("fill value message v{other}")));
		}
	};

	if !defined || (version == 1 && cursor.remaining() == 0) {
		return Ok(Message::FillValue(None));
	}
	let size = cursor.read_u32()? as usize;
	let value = if size == 0 {
		None
	} else {
		Some(cursor.read_bytes(size)?.to_vec())
	};
	Ok(Message::FillValue(value))
}

/// Link message 0x0006; only hard links participate in traversal.
fn parse_link(cursor: &mut SliceReader, sizes: Sizes) -> Result<Message> {
	let version = cursor.read_u8()?;
	if version != 1 {
		return Err(EngineError::UnsupportedFormat(format!("link message v{version}")));
	}
	let flags = cursor.read_u8()?;
	let link_type = if flags & 0x08 != 0 { cursor.read_u8()? } else { 0 };
	if flags & 0x04 != 0 {
		cursor.skip(8)?; // creation order
	}
	if flags & 0x10 != 0 {
		cursor.skip(1)?; // charset
	}
	let name_length = cursor.read_sized(1 << (flags & 0x03))? as usize;
	let name = String::from_utf8_lossy(cursor.read_bytes(name_length)?).into_owned();

	if link_type != 0 {
		// Soft and external links are outside the GCOV layout.
		log::debug!("ignoring non-hard link '{name}' (type {link_type})");
		return Ok(Message::Other { kind: MSG_LINK });
	}
	let address = cursor
		.read_offset(sizes.offset)?
		.ok_or_else(|| EngineError::UnsupportedFormat(format!("hard link '{name}' with undefined address")))?;
	Ok(Message::Link { name, address })
}

#[cfg(test)]
mod tests {
	use super::*;

	const SIZES: Sizes = Sizes { offset: 8, length: 8 };

	#[test]
	fn symbol_table_message() {
		let mut body = Vec::new();
		body.extend_from_slice(&100u64.to_le_bytes());
		body.extend_from_slice(&200u64.to_le_bytes());
		let msg = parse_message(MSG_SYMBOL_TABLE, &body, SIZES).unwrap();
		assert!(matches!(msg, Message::SymbolTable { btree: 100, heap: 200 }));
	}

	#[test]
	fn continuation_message() {
		let mut body = Vec::new();
		body.extend_from_slice(&4096u64.to_le_bytes());
		body.extend_from_slice(&512u64.to_le_bytes());
		let msg = parse_message(MSG_CONTINUATION, &body, SIZES).unwrap();
		match msg {
			Message::Continuation(range) => assert_eq!(range, ByteRange::new(4096, 512)),
			other => panic!("unexpected message {other:?}"),
		}
	}

	#[test]
	fn fill_value_v2_defined() {
		// version 2, alloc time, write time, defined, size, value
		let body = [2u8, 2, 0, 1, 4, 0, 0, 0, 0, 0, 0x80, 0x3F];
		let msg = parse_message(MSG_FILL_VALUE, &body, SIZES).unwrap();
		match msg {
			Message::FillValue(Some(bytes)) => assert_eq!(bytes, vec![0, 0, 0x80, 0x3F]),
			other => panic!("unexpected message {other:?}"),
		}
	}

	#[test]
	fn fill_value_v2_undefined() {
		let body = [2u8, 2, 0, 0];
		let msg = parse_message(MSG_FILL_VALUE, &body, SIZES).unwrap();
		assert!(matches!(msg, Message::FillValue(None)));
	}

	#[test]
	fn hard_link_message() {
		let mut body = vec![1u8, 0]; // version, flags: 1-byte name length, hard
		body.push(4); // name length
		body.extend_from_slice(b"HHHH");
		body.extend_from_slice(&4242u64.to_le_bytes());
		let msg = parse_message(MSG_LINK, &body, SIZES).unwrap();
		match msg {
			Message::Link { name, address } => {
				assert_eq!(name, "HHHH");
				assert_eq!(address, 4242);
			}
			other => panic!("unexpected message {other:?}"),
		}
	}

	#[test]
	fn unknown_messages_pass_through() {
		let msg = parse_message(0x0017, &[1, 2, 3], SIZES).unwrap();
		assert!(matches!(msg, Message::Other { kind: 0x0017 }));
	}
}
