//! Session state: every tunable and the composite preset registry.
//!
//! There are no module-level caches or globals anywhere in the engine;
//! one `Session` owns everything configurable, so tests (and embedders
//! with several independent viewers) run fully isolated instances.

use crate::composite::{Preset, default_presets};
use crate::product::Product;
use sartile_core::Result;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for one engine instance. `Default` mirrors the documented
/// defaults of the public contract.
#[derive(Debug, Clone)]
pub struct SessionOptions {
	/// Edge length of produced tiles, in pixels.
	pub tile_size: u32,
	/// LOD slack: a tile may carry up to this factor more source pixels
	/// per axis before the next coarser stride is chosen.
	pub overview_factor: f64,
	/// Entries in the per-product tile cache.
	pub tile_cache_entries: usize,
	/// Entries in the per-product composite cache.
	pub composite_cache_entries: usize,
	/// Byte budget of the decoded-chunk cache.
	pub chunk_cache_bytes: usize,
	/// Concurrent chunk decodes per region read.
	pub decode_parallelism: usize,
	/// Deadline for a single HTTP request.
	pub http_timeout: Duration,
	/// Deadline for one whole tile computation.
	pub tile_deadline: Duration,
	/// Admission limit: active tile requests beyond this are rejected
	/// with `Overloaded`.
	pub max_pending: usize,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			tile_size: 512,
			overview_factor: 1.5,
			tile_cache_entries: 256,
			composite_cache_entries: 64,
			chunk_cache_bytes: 128 * 1024 * 1024,
			decode_parallelism: 4,
			http_timeout: Duration::from_secs(30),
			tile_deadline: Duration::from_secs(60),
			max_pending: 64,
		}
	}
}

struct SessionInner {
	options: SessionOptions,
	presets: Vec<Preset>,
}

/// A cheaply clonable handle to one engine instance.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

impl Session {
	/// A session with default options and the standard preset catalogue.
	pub fn new() -> Self {
		Self::with_options(SessionOptions::default())
	}

	pub fn with_options(options: SessionOptions) -> Self {
		Self {
			inner: Arc::new(SessionInner {
				options,
				presets: default_presets(),
			}),
		}
	}

	/// A session with extra presets appended after the standard
	/// catalogue (registration order decides auto-selection).
	pub fn with_presets(options: SessionOptions, extra: Vec<Preset>) -> Self {
		let mut presets = default_presets();
		presets.extend(extra);
		Self {
			inner: Arc::new(SessionInner { options, presets }),
		}
	}

	pub fn options(&self) -> &SessionOptions {
		&self.inner.options
	}

	/// Registered presets, in registration order.
	pub fn presets(&self) -> &[Preset] {
		&self.inner.presets
	}

	pub fn preset(&self, id: &str) -> Option<&Preset> {
		self.inner.presets.iter().find(|preset| preset.id == id)
	}

	/// Opens a NISAR GCOV product by URL within this session.
	pub async fn open_product(&self, url: &str) -> Result<Product> {
		Product::open(self, url).await
	}
}

impl Default for Session {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("options", &self.inner.options)
			.field("presets", &self.inner.presets.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_contract() {
		let options = SessionOptions::default();
		assert_eq!(options.tile_size, 512);
		assert_eq!(options.tile_cache_entries, 256);
		assert_eq!(options.decode_parallelism, 4);
		assert_eq!(options.max_pending, 64);
		assert_eq!(options.http_timeout, Duration::from_secs(30));
		assert_eq!(options.tile_deadline, Duration::from_secs(60));
	}

	#[test]
	fn sessions_are_isolated() {
		let a = Session::new();
		let b = Session::with_options(SessionOptions {
			tile_size: 256,
			..SessionOptions::default()
		});
		assert_eq!(a.options().tile_size, 512);
		assert_eq!(b.options().tile_size, 256);
	}

	#[test]
	fn preset_lookup_by_id() {
		let session = Session::new();
		assert!(session.preset("dual-pol-h").is_some());
		assert!(session.preset("nonexistent").is_none());
	}
}
