//! Datatype message (0x0003).
//!
//! The engine understands four element classes: fixed-point integers,
//! IEEE floats, fixed-length strings (metadata only) and the
//! two-float compound that NISAR uses for complex covariance terms.
//! Anything else is reported as unsupported, never guessed at.

use crate::cursor::SliceReader;
use sartile_core::{EngineError, Result};

const CLASS_FIXED: u8 = 0;
const CLASS_FLOAT: u8 = 1;
const CLASS_STRING: u8 = 3;
const CLASS_COMPOUND: u8 = 6;

/// The element class after interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeClass {
	/// Fixed-point integer.
	Fixed { signed: bool },
	/// IEEE float, 4 or 8 bytes.
	Float,
	/// Fixed-length string; only appears in metadata datasets and
	/// attributes.
	String,
	/// Two 4-byte floats (re, im) interpreted as complex64.
	Complex,
}

/// A decoded element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datatype {
	pub class: DatatypeClass,
	/// Element size in bytes.
	pub size: u32,
	pub big_endian: bool,
}

impl Datatype {
	pub fn element_size(&self) -> usize {
		self.size as usize
	}

	pub fn is_complex(&self) -> bool {
		self.class == DatatypeClass::Complex
	}

	pub fn parse(cursor: &mut SliceReader) -> Result<Self> {
		let class_and_version = cursor.read_u8()?;
		let version = class_and_version >> 4;
		let class = class_and_version & 0x0F;
		if !(1..=3).contains(&version) {
			return Err(EngineError::UnsupportedFormat(format!("datatype message v{version}")));
		}

		let bits0 = cursor.read_u8()?;
		let bits1 = cursor.read_u8()?;
		let _bits2 = cursor.read_u8()?;
		let size = cursor.read_u32()?;

		match class {
			CLASS_FIXED => {
				cursor.skip(4)?; // bit offset, bit precision
				Ok(Datatype {
					class: DatatypeClass::Fixed {
						signed: bits0 & 0x08 != 0,
					},
					size,
					big_endian: bits0 & 0x01 != 0,
				})
			}
			CLASS_FLOAT => {
				if size != 4 && size != 8 {
					return Err(EngineError::UnsupportedFormat(format!("{size}-byte float datatype")));
				}
				// bit offset/precision, exponent and mantissa layout,
				// exponent bias: IEEE types are identified by size alone.
				cursor.skip(12)?;
				Ok(Datatype {
					class: DatatypeClass::Float,
					size,
					big_endian: bits0 & 0x01 != 0,
				})
			}
			CLASS_STRING => Ok(Datatype {
				class: DatatypeClass::String,
				size,
				big_endian: false,
			}),
			CLASS_COMPOUND => parse_compound(cursor, version, size, u16::from(bits0) | u16::from(bits1) << 8),
			other => Err(EngineError::UnsupportedFormat(format!("datatype class {other}"))),
		}
	}
}

/// A compound is accepted only in its complex64 shape: exactly two
/// 4-byte float members at offsets 0 and 4.
fn parse_compound(cursor: &mut SliceReader, version: u8, size: u32, member_count: u16) -> Result<Datatype> {
	if member_count != 2 || size != 8 {
		return Err(EngineError::UnsupportedFormat(format!(
			"compound datatype with {member_count} members of {size} bytes"
		)));
	}

	let mut offsets = [0u64; 2];
	let mut big_endian = false;
	for (index, offset_slot) in offsets.iter_mut().enumerate() {
		let member = parse_member(cursor, version, size)?;
		*offset_slot = member.offset;
		if member.datatype.class != DatatypeClass::Float || member.datatype.size != 4 {
			return Err(EngineError::UnsupportedFormat(
				"compound datatype that is not a pair of 4-byte floats".to_string(),
			));
		}
		if index == 0 {
			big_endian = member.datatype.big_endian;
		}
	}
	if offsets != [0, 4] {
		return Err(EngineError::UnsupportedFormat(
			"complex compound with non-adjacent members".to_string(),
		));
	}

	Ok(Datatype {
		class: DatatypeClass::Complex,
		size,
		big_endian,
	})
}

struct Member {
	offset: u64,
	datatype: Datatype,
}

fn parse_member(cursor: &mut SliceReader, version: u8, compound_size: u32) -> Result<Member> {
	let name_start = cursor.position();
	let _name = cursor.read_nul_string()?;
	if version < 3 {
		// Names are zero-padded to a multiple of eight bytes.
		let consumed = cursor.position() - name_start;
		cursor.skip((8 - consumed % 8) % 8)?;
	}

	let offset = match version {
		1 | 2 => u64::from(cursor.read_u32()?),
		_ => {
			// v3 stores the offset in the fewest bytes that hold the
			// compound size.
			let width = (u32::BITS / 8 - compound_size.leading_zeros() / 8) as u8;
			cursor.read_sized(width.max(1))?
		}
	};

	if version == 1 {
		cursor.skip(1 + 3 + 4 + 4 + 16)?; // dimensionality, reserved, permutation, reserved, dim sizes
	}

	let datatype = Datatype::parse(cursor)?;
	Ok(Member { offset, datatype })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn float_body(size: u32, big_endian: bool) -> Vec<u8> {
		let mut body = vec![0x11, u8::from(big_endian), 0, 0];
		body.extend_from_slice(&size.to_le_bytes());
		body.extend_from_slice(&[0u8; 12]); // float properties
		body
	}

	#[test]
	fn parses_float32() {
		let body = float_body(4, false);
		let datatype = Datatype::parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(datatype.class, DatatypeClass::Float);
		assert_eq!(datatype.size, 4);
		assert!(!datatype.big_endian);
	}

	#[test]
	fn parses_big_endian_float64() {
		let body = float_body(8, true);
		let datatype = Datatype::parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(datatype.size, 8);
		assert!(datatype.big_endian);
	}

	#[test]
	fn rejects_half_floats() {
		let body = float_body(2, false);
		assert!(matches!(
			Datatype::parse(&mut SliceReader::new(&body)),
			Err(EngineError::UnsupportedFormat(_))
		));
	}

	#[test]
	fn parses_uint8() {
		let mut body = vec![0x10, 0, 0, 0];
		body.extend_from_slice(&1u32.to_le_bytes());
		body.extend_from_slice(&[0, 0, 8, 0]); // bit offset 0, precision 8
		let datatype = Datatype::parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(datatype.class, DatatypeClass::Fixed { signed: false });
		assert_eq!(datatype.size, 1);
	}

	#[test]
	fn parses_complex64_compound_v3() {
		// compound v3, 2 members, size 8
		let mut body = vec![0x36, 2, 0, 0];
		body.extend_from_slice(&8u32.to_le_bytes());
		for (name, offset) in [("r", 0u8), ("i", 4u8)] {
			body.extend_from_slice(name.as_bytes());
			body.push(0);
			body.push(offset); // 1-byte member offset for an 8-byte compound
			body.extend_from_slice(&float_body(4, false));
		}
		let datatype = Datatype::parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(datatype.class, DatatypeClass::Complex);
		assert_eq!(datatype.size, 8);
		assert!(datatype.is_complex());
	}

	#[test]
	fn rejects_non_complex_compounds() {
		// 3 members cannot be complex64
		let mut body = vec![0x36, 3, 0, 0];
		body.extend_from_slice(&12u32.to_le_bytes());
		assert!(matches!(
			Datatype::parse(&mut SliceReader::new(&body)),
			Err(EngineError::UnsupportedFormat(_))
		));
	}

	#[test]
	fn parses_fixed_string() {
		let mut body = vec![0x13, 0, 0, 0];
		body.extend_from_slice(&32u32.to_le_bytes());
		let datatype = Datatype::parse(&mut SliceReader::new(&body)).unwrap();
		assert_eq!(datatype.class, DatatypeClass::String);
		assert_eq!(datatype.size, 32);
	}
}
