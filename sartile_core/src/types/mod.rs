//! Value types shared by every layer of the engine.

mod byte_range;
mod error;
mod geo_bbox;
mod keys;

pub use byte_range::ByteRange;
pub use error::{EngineError, Result};
pub use geo_bbox::GeoBBox;
pub use keys::{CompositeKey, Frequency, Polarization, TileKey};
