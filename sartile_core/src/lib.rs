//! Shared foundation of the sartile engine: byte ranges, tile keys, the
//! error taxonomy, byte-range I/O backends, bounded caches and
//! cooperative cancellation.

pub mod cache;
pub mod io;
pub mod types;
pub use types::*;
pub mod utils;
