//! Attribute message (0x000C).
//!
//! Attributes carry product metadata (`units`, `epsg`, processing
//! strings). Strings and numeric scalars/vectors are decoded; exotic
//! value types (variable-length strings live in the global heap) are
//! skipped rather than failing the object.

use super::{Dataspace, Datatype, DatatypeClass, Message};
use crate::cursor::SliceReader;
use crate::superblock::Sizes;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use sartile_core::{EngineError, Result};

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
	String(String),
	Int(i64),
	Float(f64),
	IntVec(Vec<i64>),
	FloatVec(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub value: AttrValue,
}

pub fn parse(cursor: &mut SliceReader, sizes: Sizes) -> Result<Message> {
	let version = cursor.read_u8()?;
	match version {
		1 => cursor.skip(1)?, // reserved
		2 | 3 => cursor.skip(1)?, // flags: shared datatype/dataspace unsupported but harmless to read past
		other => {
			return Err(EngineError::UnsupportedFormat(format!("attribute message v{other}")));
		}
	}

	let name_size = cursor.read_u16()? as usize;
	let datatype_size = cursor.read_u16()? as usize;
	let dataspace_size = cursor.read_u16()? as usize;
	if version == 3 {
		cursor.skip(1)?; // name character set
	}

	let padded = |size: usize| if version == 1 { size.next_multiple_of(8) } else { size };

	let name_raw = cursor.read_bytes(padded(name_size))?;
	let name = String::from_utf8_lossy(&name_raw[..name_size.saturating_sub(1)]).into_owned();

	let mut datatype_cursor = SliceReader::new(cursor.read_bytes(padded(datatype_size))?);
	let mut dataspace_cursor = SliceReader::new(cursor.read_bytes(padded(dataspace_size))?);

	let Ok(datatype) = Datatype::parse(&mut datatype_cursor) else {
		log::debug!("skipping attribute '{name}' with unsupported datatype");
		return Ok(Message::Other { kind: super::MSG_ATTRIBUTE });
	};
	let dataspace = Dataspace::parse(&mut dataspace_cursor, sizes)?;

	match decode_value(cursor, &datatype, &dataspace) {
		Ok(value) => Ok(Message::Attribute(Attribute { name, value })),
		Err(_) => {
			log::debug!("skipping attribute '{name}' with undecodable value");
			Ok(Message::Other { kind: super::MSG_ATTRIBUTE })
		}
	}
}

fn decode_value(cursor: &mut SliceReader, datatype: &Datatype, dataspace: &Dataspace) -> Result<AttrValue> {
	let count = dataspace.element_count() as usize;
	let element = datatype.element_size();
	let raw = cursor.read_bytes(count * element)?;

	match datatype.class {
		DatatypeClass::String => {
			let text = raw.split(|b| *b == 0).next().unwrap_or(raw);
			Ok(AttrValue::String(String::from_utf8_lossy(text).into_owned()))
		}
		DatatypeClass::Fixed { signed } => {
			let values: Vec<i64> = raw
				.chunks_exact(element)
				.map(|chunk| read_int(chunk, signed, datatype.big_endian))
				.collect::<Result<_>>()?;
			Ok(if values.len() == 1 {
				AttrValue::Int(values[0])
			} else {
				AttrValue::IntVec(values)
			})
		}
		DatatypeClass::Float => {
			let values: Vec<f64> = raw
				.chunks_exact(element)
				.map(|chunk| read_float(chunk, datatype.big_endian))
				.collect();
			Ok(if values.len() == 1 {
				AttrValue::Float(values[0])
			} else {
				AttrValue::FloatVec(values)
			})
		}
		DatatypeClass::Complex => Err(EngineError::UnsupportedFormat("complex attribute".to_string())),
	}
}

fn read_int(bytes: &[u8], signed: bool, big_endian: bool) -> Result<i64> {
	let unsigned = match (bytes.len(), big_endian) {
		(1, _) => u64::from(bytes[0]),
		(2, false) => u64::from(LittleEndian::read_u16(bytes)),
		(2, true) => u64::from(BigEndian::read_u16(bytes)),
		(4, false) => u64::from(LittleEndian::read_u32(bytes)),
		(4, true) => u64::from(BigEndian::read_u32(bytes)),
		(8, false) => LittleEndian::read_u64(bytes),
		(8, true) => BigEndian::read_u64(bytes),
		(n, _) => {
			return Err(EngineError::UnsupportedFormat(format!("{n}-byte integer attribute")));
		}
	};
	if signed {
		let shift = 64 - bytes.len() * 8;
		Ok(((unsigned << shift) as i64) >> shift)
	} else {
		Ok(unsigned as i64)
	}
}

fn read_float(bytes: &[u8], big_endian: bool) -> f64 {
	match (bytes.len(), big_endian) {
		(4, false) => f64::from(LittleEndian::read_f32(bytes)),
		(4, true) => f64::from(BigEndian::read_f32(bytes)),
		(_, false) => LittleEndian::read_f64(bytes),
		(_, true) => BigEndian::read_f64(bytes),
	}
}
