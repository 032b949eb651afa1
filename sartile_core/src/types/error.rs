//! The error taxonomy of the engine.
//!
//! Every failure that can surface at the `get_tile` / `get_composite_tile`
//! boundary is one of the variants below. Variants are clonable so that a
//! coalesced request can hand the same outcome to every waiter.

use thiserror::Error;

/// Result alias used across all sartile crates.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything that can go wrong between a byte-range request and a
/// finished tile.
///
/// The read path never panics on malformed input; it reports one of
/// these instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
	/// Transport or read failure below the HDF5 layer.
	#[error("i/o failure: {0}")]
	Io(String),

	/// The server did not honor a byte-range request, or a read was
	/// issued past the end of the resource.
	#[error("range request not honored: {0}")]
	Range(String),

	/// An HTTP request or a whole tile computation exceeded its deadline.
	#[error("deadline exceeded while {0}")]
	Timeout(String),

	/// The container uses an HDF5 feature outside the supported subset.
	#[error("unsupported format feature: {0}")]
	UnsupportedFormat(String),

	/// Structural corruption: an address or length points past the end
	/// of the file.
	#[error("truncated file: {0}")]
	TruncatedFile(String),

	/// A stored checksum did not match the bytes it covers.
	#[error("checksum mismatch in {0}")]
	InvalidChecksum(String),

	/// A filter pipeline entry this engine does not implement.
	#[error("unsupported filter id {0}")]
	UnsupportedFilter(u16),

	/// Decompression or element-type conversion failed.
	#[error("decode failed: {0}")]
	Decode(String),

	/// A dataset path absent on the product.
	#[error("not found: {0}")]
	NotFound(String),

	/// The caller's cancellation token fired before completion.
	#[error("request was cancelled")]
	Cancelled,

	/// Admission control rejected the request; retry later.
	#[error("too many pending requests")]
	Overloaded,
}

impl From<std::io::Error> for EngineError {
	fn from(err: std::io::Error) -> Self {
		match err.kind() {
			std::io::ErrorKind::UnexpectedEof => EngineError::TruncatedFile(err.to_string()),
			std::io::ErrorKind::TimedOut => EngineError::Timeout(err.to_string()),
			_ => EngineError::Io(err.to_string()),
		}
	}
}

impl From<reqwest::Error> for EngineError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			EngineError::Timeout(err.to_string())
		} else {
			EngineError::Io(err.to_string())
		}
	}
}

impl EngineError {
	/// True for transport errors that are worth retrying with backoff.
	pub fn is_transient(&self) -> bool {
		matches!(self, EngineError::Io(_) | EngineError::Timeout(_))
	}
}
