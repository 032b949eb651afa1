//! Level-of-detail selection.
//!
//! No overview pyramid is materialized. A zoom level maps to a source
//! window plus a power-of-two stride chosen so the sampled output fits
//! the tile size within the overview factor; subsampling happens at
//! chunk-assembly time inside the dataset reader.

use sartile_hdf5::RegionRequest;

/// The tile pyramid over one source grid.
///
/// Level `max_level` is native resolution (stride 1, one tile covers
/// `tile_size` source pixels); each level below halves the pixel rate.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
	height: u64,
	width: u64,
	tile_size: u64,
	overview_factor: f64,
	max_level: u8,
}

impl TileGrid {
	pub fn new(height: u64, width: u64, tile_size: u32, overview_factor: f64) -> Self {
		let tile_size = u64::from(tile_size.max(1));
		let longest = height.max(width).max(1);
		let mut max_level = 0u8;
		while (tile_size << max_level) < longest {
			max_level += 1;
		}
		Self {
			height,
			width,
			tile_size,
			overview_factor: overview_factor.max(1.0),
			max_level,
		}
	}

	/// The coarsest-to-finest level range: `0..=max_level`.
	pub fn max_level(&self) -> u8 {
		self.max_level
	}

	/// Source pixels covered by one tile edge at `level`.
	pub fn tile_span(&self, level: u8) -> u64 {
		self.tile_size << (self.max_level - level.min(self.max_level))
	}

	/// Tile columns and rows at `level`.
	pub fn tiles_at(&self, level: u8) -> (u32, u32) {
		let span = self.tile_span(level);
		(self.width.div_ceil(span) as u32, self.height.div_ceil(span) as u32)
	}

	/// The smallest power-of-two stride keeping `extent` source pixels
	/// within `tile_size * overview_factor` samples.
	pub fn select_stride(&self, extent: u64) -> u64 {
		let budget = (self.tile_size as f64 * self.overview_factor).max(1.0);
		let mut stride = 1u64;
		while extent as f64 / stride as f64 > budget {
			stride *= 2;
		}
		stride
	}

	/// The clamped source window behind tile `(level, x, y)`, with its
	/// stride; `None` when the tile lies fully outside the grid.
	pub fn window(&self, level: u8, x: u32, y: u32) -> Option<RegionRequest> {
		if level > self.max_level {
			return None;
		}
		let span = self.tile_span(level);
		let row = u64::from(y) * span;
		let col = u64::from(x) * span;
		if row >= self.height || col >= self.width {
			return None;
		}

		let height = span.min(self.height - row);
		let width = span.min(self.width - col);
		let stride = self.select_stride(span);
		Some(RegionRequest::new(row, col, height, width).with_stride(stride))
	}

	/// The finest level at which `extent` source pixels still fit into
	/// one tile's span.
	pub fn level_for_extent(&self, extent: u64) -> u8 {
		let mut level = self.max_level;
		while level > 0 && self.tile_span(level) < extent {
			level -= 1;
		}
		level
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_tile_grids_have_one_level() {
		let grid = TileGrid::new(400, 300, 512, 1.5);
		assert_eq!(grid.max_level(), 0);
		assert_eq!(grid.tiles_at(0), (1, 1));

		let window = grid.window(0, 0, 0).unwrap();
		assert_eq!((window.row, window.col), (0, 0));
		assert_eq!((window.height, window.width), (400, 300));
		assert_eq!(window.stride, 1);
	}

	#[test]
	fn gcov_sized_grid_levels() {
		// The S1 scenario shape: 21600 x 15360 with 512-pixel tiles.
		let grid = TileGrid::new(21600, 15360, 512, 1.5);
		// 512 << 6 = 32768 >= 21600
		assert_eq!(grid.max_level(), 6);
		assert_eq!(grid.tile_span(6), 512);
		assert_eq!(grid.tile_span(4), 2048);
		assert_eq!(grid.tiles_at(6), (30, 43));
	}

	#[test]
	fn stride_doubles_per_level() {
		let grid = TileGrid::new(4096, 4096, 512, 1.5);
		assert_eq!(grid.max_level(), 3);
		assert_eq!(grid.window(3, 0, 0).unwrap().stride, 1);
		assert_eq!(grid.window(2, 0, 0).unwrap().stride, 2);
		assert_eq!(grid.window(0, 0, 0).unwrap().stride, 8);
	}

	#[test]
	fn overview_factor_tolerates_slack() {
		// 700 pixels in a 512 budget at factor 1.5 needs no stride.
		let grid = TileGrid::new(700, 700, 512, 1.5);
		assert_eq!(grid.max_level(), 1);
		assert_eq!(grid.select_stride(700), 1);
		// But 900 exceeds 768 and picks stride 2.
		assert_eq!(grid.select_stride(900), 2);
	}

	#[test]
	fn sampled_output_respects_budget() {
		let grid = TileGrid::new(21600, 15360, 512, 1.5);
		for level in 0..=grid.max_level() {
			let window = grid.window(level, 0, 0).unwrap();
			assert!(window.out_height() as f64 <= 512.0 * 1.5);
			assert!(window.out_width() as f64 <= 512.0 * 1.5);
		}
	}

	#[test]
	fn edge_tiles_clamp() {
		let grid = TileGrid::new(1000, 1500, 512, 1.5);
		assert_eq!(grid.max_level(), 2);
		// Level 2: spans of 512; the last column tile is 1500 - 2*512 wide.
		let window = grid.window(2, 2, 1).unwrap();
		assert_eq!(window.col, 1024);
		assert_eq!(window.width, 476);
		assert_eq!(window.row, 512);
		assert_eq!(window.height, 488);
	}

	#[test]
	fn out_of_grid_tiles_are_none() {
		let grid = TileGrid::new(1000, 1500, 512, 1.5);
		assert!(grid.window(2, 3, 0).is_none());
		assert!(grid.window(2, 0, 2).is_none());
		assert!(grid.window(7, 0, 0).is_none());
	}

	#[test]
	fn level_for_extent_selection() {
		let grid = TileGrid::new(4096, 4096, 512, 1.5);
		assert_eq!(grid.level_for_extent(512), 3);
		assert_eq!(grid.level_for_extent(1024), 2);
		assert_eq!(grid.level_for_extent(4096), 0);
		assert_eq!(grid.level_for_extent(100_000), 0);
	}
}
