//! Identities of cached and in-flight work: frequencies, polarization
//! codes, tile keys and composite keys.

use crate::{EngineError, Result};
use std::fmt;
use std::str::FromStr;

/// NISAR frequency sub-band. Dual-frequency products carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Frequency {
	A,
	B,
}

impl Frequency {
	pub fn as_str(&self) -> &'static str {
		match self {
			Frequency::A => "A",
			Frequency::B => "B",
		}
	}
}

impl fmt::Display for Frequency {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Frequency {
	type Err = EngineError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"A" => Ok(Frequency::A),
			"B" => Ok(Frequency::B),
			_ => Err(EngineError::NotFound(format!("frequency '{s}'"))),
		}
	}
}

/// A four-character GCOV polarization code such as `HHHH` or `HVHV`.
///
/// The first pair names the transmit/receive polarization of the first
/// term, the second pair the conjugated term of the covariance product.
/// Diagonal codes (`HHHH`, `HVHV`, ...) are real backscatter power;
/// off-diagonal codes (`HHHV`, ...) are complex and are squared to power
/// on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Polarization([u8; 4]);

impl Polarization {
	/// Parses a code, accepting only `H`/`V` in all four positions.
	pub fn parse(code: &str) -> Result<Self> {
		let bytes = code.as_bytes();
		if bytes.len() != 4 || bytes.iter().any(|b| *b != b'H' && *b != b'V') {
			return Err(EngineError::NotFound(format!("polarization '{code}'")));
		}
		Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
	}

	pub fn as_str(&self) -> &str {
		// Constructor admits ASCII H/V only.
		std::str::from_utf8(&self.0).unwrap_or("????")
	}

	/// Diagonal covariance terms are real power; everything else is a
	/// complex cross product.
	pub fn is_diagonal(&self) -> bool {
		self.0[0] == self.0[2] && self.0[1] == self.0[3]
	}
}

impl fmt::Display for Polarization {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Polarization {
	type Err = EngineError;

	fn from_str(s: &str) -> Result<Self> {
		Polarization::parse(s)
	}
}

/// Identity of a single-dataset tile within a session.
///
/// Two requests with equal keys must produce byte-identical buffers as
/// long as the underlying URL is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
	/// Absolute HDF5 dataset path.
	pub dataset: String,
	/// Zoom level; 0 is the coarsest.
	pub level: u8,
	/// Tile column.
	pub x: u32,
	/// Tile row.
	pub y: u32,
}

impl TileKey {
	pub fn new(dataset: impl Into<String>, level: u8, x: u32, y: u32) -> Self {
		Self {
			dataset: dataset.into(),
			level,
			x,
			y,
		}
	}
}

impl fmt::Display for TileKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}/{}/{}", self.dataset, self.level, self.x, self.y)
	}
}

/// Identity of a composite (RGB) tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
	/// Registered preset id, e.g. `dual-pol-h`.
	pub preset: String,
	pub frequency: Frequency,
	pub level: u8,
	pub x: u32,
	pub y: u32,
}

impl CompositeKey {
	pub fn new(preset: impl Into<String>, frequency: Frequency, level: u8, x: u32, y: u32) -> Self {
		Self {
			preset: preset.into(),
			frequency,
			level,
			x,
			y,
		}
	}
}

impl fmt::Display for CompositeKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}:{}@{}/{}/{}",
			self.preset, self.frequency, self.level, self.x, self.y
		)
	}
}
