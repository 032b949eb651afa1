//! The statistics engine: histogram-based channel stats and contrast
//! limits in bounded time.
//!
//! Percentiles come from a two-pass histogram walk, never from sorting
//! sample buffers. Non-positive and NaN samples are outside the domain
//! (backscatter power is positive) and are skipped everywhere.

use crate::tile_service::TileService;
use itertools::Itertools;
use sartile_core::utils::CancelToken;
use sartile_core::{EngineError, Frequency, GeoBBox, Polarization, Result, TileKey};

const DB_FLOOR: f64 = 1e-10;

/// Sampling parameters.
#[derive(Debug, Clone)]
pub struct StatsOptions {
	/// Histogram resolution.
	pub bins: usize,
	/// Transform samples to decibels (`10·log10(v)`) before
	/// accumulation.
	pub use_db: bool,
	/// Sample every n-th pixel.
	pub stride: usize,
}

impl Default for StatsOptions {
	fn default() -> Self {
		Self {
			bins: 256,
			use_db: false,
			stride: 1,
		}
	}
}

/// Accumulated statistics of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
	pub min: f64,
	pub max: f64,
	pub mean: f64,
	/// Number of valid samples.
	pub count: u64,
	/// 2nd percentile (histogram resolution).
	pub p2: f64,
	/// 98th percentile (histogram resolution).
	pub p98: f64,
	pub histogram: Vec<u64>,
}

impl ChannelStats {
	fn empty(bins: usize) -> Self {
		Self {
			min: f64::NAN,
			max: f64::NAN,
			mean: f64::NAN,
			count: 0,
			p2: f64::NAN,
			p98: f64::NAN,
			histogram: vec![0; bins],
		}
	}
}

/// Computes stats over one sample buffer.
pub fn sample_channel_stats(values: &[f32], options: &StatsOptions) -> ChannelStats {
	stats_over(&[values], options)
}

/// Contrast limits for a display stretch: `(p2, p98)`.
pub fn auto_contrast(values: &[f32], use_db: bool) -> (f64, f64) {
	let stats = sample_channel_stats(
		values,
		&StatsOptions {
			use_db,
			..StatsOptions::default()
		},
	);
	(stats.p2, stats.p98)
}

/// Two-pass histogram statistics over several buffers treated as one
/// logical sample stream.
pub fn stats_over(buffers: &[&[f32]], options: &StatsOptions) -> ChannelStats {
	let bins = options.bins.max(1);
	let stride = options.stride.max(1);

	// Pass 1: extrema and mean over the valid domain.
	let mut min = f64::INFINITY;
	let mut max = f64::NEG_INFINITY;
	let mut sum = 0.0f64;
	let mut count = 0u64;
	each_sample(buffers, stride, options.use_db, |value| {
		min = min.min(value);
		max = max.max(value);
		sum += value;
		count += 1;
	});
	if count == 0 {
		return ChannelStats::empty(bins);
	}

	// Degenerate distributions still get a well-defined histogram.
	let bin_width = if max > min { (max - min) / bins as f64 } else { 1.0 };

	// Pass 2: binning.
	let mut histogram = vec![0u64; bins];
	each_sample(buffers, stride, options.use_db, |value| {
		let bin = ((value - min) / bin_width) as usize;
		histogram[bin.min(bins - 1)] += 1;
	});

	// Percentiles from the CDF walk.
	let percentile = |fraction: f64| {
		let threshold = fraction * count as f64;
		let mut cumulative = 0u64;
		for (bin, value) in histogram.iter().enumerate() {
			cumulative += value;
			if cumulative as f64 > threshold {
				return min + bin as f64 * bin_width;
			}
		}
		max
	};

	ChannelStats {
		min,
		max,
		mean: sum / count as f64,
		count,
		p2: percentile(0.02),
		p98: percentile(0.98),
		histogram,
	}
}

fn each_sample(buffers: &[&[f32]], stride: usize, use_db: bool, mut visit: impl FnMut(f64)) {
	for buffer in buffers {
		for value in buffer.iter().step_by(stride) {
			if !value.is_finite() || *value <= 0.0 {
				continue;
			}
			let value = f64::from(*value);
			let value = if use_db {
				10.0 * value.max(DB_FLOOR).log10()
			} else {
				value
			};
			visit(value);
		}
	}
}

/// Per-polarization viewport statistics, possibly partial.
#[derive(Debug, Clone)]
pub struct ViewportStats {
	pub channels: Vec<(Polarization, ChannelStats)>,
	/// Tiles actually sampled; fewer than `tiles_total` after a
	/// cancellation.
	pub tiles_scanned: usize,
	pub tiles_total: usize,
}

impl TileService {
	/// Samples a 3×3 tile grid across the bbox and aggregates per
	/// polarization channel.
	///
	/// Cancellation mid-grid returns the aggregate so far (never an
	/// error) with `tiles_scanned` reporting the coverage.
	pub async fn viewport_stats(
		&self,
		frequency: Frequency,
		bbox: &GeoBBox,
		options: &StatsOptions,
		cancel: &CancelToken,
	) -> Result<ViewportStats> {
		let (polarizations, keys) = {
			let core = &self.inner.core;
			let group = core
				.frequency(frequency)
				.ok_or_else(|| EngineError::NotFound(format!("frequency {frequency}")))?;
			let (row, col, height, width) = group
				.pixel_window(bbox)
				.ok_or_else(|| EngineError::NotFound(format!("bbox {bbox} outside the product grid")))?;

			// Tile level sized so one tile covers about a third of the
			// viewport per axis.
			let level = group.grid.level_for_extent(height.max(width).div_ceil(3).max(1));
			let span = group.grid.tile_span(level);

			let keys: Vec<(u32, u32)> = itertools::iproduct!(0..3u64, 0..3u64)
				.map(|(sample_row, sample_col)| {
					let pixel_row = row + (height * (2 * sample_row + 1)) / 6;
					let pixel_col = col + (width * (2 * sample_col + 1)) / 6;
					((pixel_col / span) as u32, (pixel_row / span) as u32)
				})
				.unique()
				.collect();
			let keys: Vec<(Polarization, TileKey)> = group
				.polarizations
				.iter()
				.flat_map(|pol| {
					let pol = *pol;
					keys
						.iter()
						.map(move |(x, y)| (pol, TileKey::new(group.dataset_path(pol), level, *x, *y)))
				})
				.collect();
			(group.polarizations.clone(), keys)
		};

		let tiles_total = keys.len();
		let mut tiles_scanned = 0usize;
		let mut buffers: Vec<(Polarization, Vec<f32>)> = Vec::new();
		for (polarization, key) in keys {
			if cancel.is_cancelled() {
				break;
			}
			match self.get_tile(&key, cancel).await {
				Ok(tile) => {
					buffers.push((polarization, tile.data));
					tiles_scanned += 1;
				}
				Err(EngineError::Cancelled) => break,
				Err(err) => return Err(err),
			}
		}

		let channels = polarizations
			.into_iter()
			.map(|polarization| {
				let slices: Vec<&[f32]> = buffers
					.iter()
					.filter(|(pol, _)| *pol == polarization)
					.map(|(_, data)| data.as_slice())
					.collect();
				(polarization, stats_over(&slices, options))
			})
			.collect();

		Ok(ViewportStats {
			channels,
			tiles_scanned,
			tiles_total,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;

	#[test]
	fn uniform_ramp_percentiles() {
		// Stats law: p2 and p98 of a uniform ramp land within one bin
		// width of the true percentiles.
		let n = 10_000;
		let values: Vec<f32> = (1..=n).map(|v| v as f32).collect();
		let stats = sample_channel_stats(&values, &StatsOptions::default());

		assert_eq!(stats.count, n as u64);
		assert_eq!(stats.min, 1.0);
		assert_eq!(stats.max, f64::from(n));
		let bin_width = (stats.max - stats.min) / 256.0;
		assert_abs_diff_eq!(stats.p2, 0.02 * f64::from(n), epsilon = bin_width);
		assert_abs_diff_eq!(stats.p98, 0.98 * f64::from(n), epsilon = bin_width);
		assert_abs_diff_eq!(stats.mean, f64::from(n + 1) / 2.0, epsilon = 0.5);
	}

	#[test]
	fn non_positive_and_nan_samples_are_skipped() {
		let values = [0.0f32, -3.0, f32::NAN, f32::INFINITY, 2.0, 4.0];
		let stats = sample_channel_stats(&values, &StatsOptions::default());
		assert_eq!(stats.count, 2);
		assert_eq!(stats.min, 2.0);
		assert_eq!(stats.max, 4.0);
	}

	#[test]
	fn db_transform() {
		let values = [1e-3f32, 1e-2, 1e-1];
		let stats = sample_channel_stats(
			&values,
			&StatsOptions {
				use_db: true,
				..StatsOptions::default()
			},
		);
		assert_abs_diff_eq!(stats.min, -30.0, epsilon = 1e-9);
		assert_abs_diff_eq!(stats.max, -10.0, epsilon = 1e-9);
		assert_abs_diff_eq!(stats.mean, -20.0, epsilon = 1e-9);
	}

	#[test]
	fn stride_subsamples() {
		let values: Vec<f32> = (1..=100).map(|v| v as f32).collect();
		let stats = sample_channel_stats(
			&values,
			&StatsOptions {
				stride: 10,
				..StatsOptions::default()
			},
		);
		assert_eq!(stats.count, 10);
		assert_eq!(stats.min, 1.0);
		assert_eq!(stats.max, 91.0);
	}

	#[test]
	fn degenerate_single_value_distribution() {
		let values = [5.0f32; 64];
		let stats = sample_channel_stats(&values, &StatsOptions::default());
		assert_eq!(stats.count, 64);
		assert_eq!(stats.min, 5.0);
		assert_eq!(stats.max, 5.0);
		// bin_width degenerates to 1; everything lands in bin 0.
		assert_eq!(stats.histogram[0], 64);
		assert_eq!(stats.p2, 5.0);
		assert_eq!(stats.p98, 5.0);
	}

	#[test]
	fn empty_input_is_explicit() {
		let stats = sample_channel_stats(&[], &StatsOptions::default());
		assert_eq!(stats.count, 0);
		assert!(stats.min.is_nan());
		assert!(stats.p2.is_nan());
	}

	#[test]
	fn lognormal_percentiles_in_db() {
		// exp(N(-3, 1)) sampled deterministically; in dB units the
		// distribution is N(-3·10/ln10, 10/ln10), so the true
		// percentiles are μ ± 2.054σ.
		use rand::{Rng, SeedableRng};
		let mut rng = rand::rngs::StdRng::seed_from_u64(42);
		let values: Vec<f32> = (0..100_000)
			.map(|_| {
				let u1: f64 = rng.random::<f64>().max(1e-12);
				let u2: f64 = rng.random();
				let normal = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
				(normal - 3.0).exp() as f32
			})
			.collect();

		let (p2, p98) = auto_contrast(&values, true);
		let sigma_db = 10.0 / std::f64::consts::LN_10;
		let mu_db = -3.0 * sigma_db;
		assert_abs_diff_eq!(p2, mu_db - 2.054 * sigma_db, epsilon = 0.5);
		assert_abs_diff_eq!(p98, mu_db + 2.054 * sigma_db, epsilon = 0.5);
	}
}
