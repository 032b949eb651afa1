//! A positioned little-endian reader over a metadata block.
//!
//! HDF5 metadata is little-endian with two variable-width field kinds:
//! offsets ("size of offsets" bytes) and lengths ("size of lengths"
//! bytes), both 4 or 8 in practice. An offset of all one-bits is the
//! undefined address.

use byteorder::{ByteOrder, LittleEndian};
use sartile_core::{EngineError, Result};

/// Positioned reads over a borrowed byte slice.
pub struct SliceReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> SliceReader<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data, pos: 0 }
	}

	pub fn position(&self) -> usize {
		self.pos
	}

	pub fn remaining(&self) -> usize {
		self.data.len() - self.pos
	}

	pub fn seek(&mut self, pos: usize) -> Result<()> {
		if pos > self.data.len() {
			return Err(truncated(pos - self.data.len()));
		}
		self.pos = pos;
		Ok(())
	}

	pub fn skip(&mut self, count: usize) -> Result<()> {
		self.seek(self.pos + count)
	}

	/// Advances to the next multiple of `alignment` relative to the
	/// block start.
	pub fn align(&mut self, alignment: usize) -> Result<()> {
		let rem = self.pos % alignment;
		if rem != 0 {
			self.skip(alignment - rem)?;
		}
		Ok(())
	}

	pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
		if self.remaining() < count {
			return Err(truncated(count - self.remaining()));
		}
		let slice = &self.data[self.pos..self.pos + count];
		self.pos += count;
		Ok(slice)
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		Ok(self.read_bytes(1)?[0])
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		Ok(LittleEndian::read_u16(self.read_bytes(2)?))
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		Ok(LittleEndian::read_u32(self.read_bytes(4)?))
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		Ok(LittleEndian::read_u64(self.read_bytes(8)?))
	}

	/// Reads an unsigned integer of 1, 2, 4 or 8 bytes.
	pub fn read_sized(&mut self, size: u8) -> Result<u64> {
		match size {
			1 => Ok(u64::from(self.read_u8()?)),
			2 => Ok(u64::from(self.read_u16()?)),
			4 => Ok(u64::from(self.read_u32()?)),
			8 => self.read_u64(),
			other => Err(EngineError::UnsupportedFormat(format!("{other}-byte integer field"))),
		}
	}

	/// Reads a file offset of `size` bytes; all one-bits is the
	/// undefined address and decodes to `None`.
	pub fn read_offset(&mut self, size: u8) -> Result<Option<u64>> {
		let raw = self.read_sized(size)?;
		let undefined = match size {
			8 => u64::MAX,
			_ => (1u64 << (u64::from(size) * 8)) - 1,
		};
		Ok(if raw == undefined { None } else { Some(raw) })
	}

	/// Reads a NUL-terminated string starting at the current position,
	/// consuming the terminator.
	pub fn read_nul_string(&mut self) -> Result<String> {
		let rest = &self.data[self.pos..];
		let nul = rest
			.iter()
			.position(|b| *b == 0)
			.ok_or_else(|| truncated(1))?;
		let text = String::from_utf8_lossy(&rest[..nul]).into_owned();
		self.pos += nul + 1;
		Ok(text)
	}

	/// A sub-reader over the next `length` bytes; the parent advances
	/// past them.
	pub fn sub_reader(&mut self, length: usize) -> Result<SliceReader<'a>> {
		Ok(SliceReader::new(self.read_bytes(length)?))
	}
}

fn truncated(missing: usize) -> EngineError {
	EngineError::TruncatedFile(format!("metadata block ends {missing} bytes early"))
}
