//! The composite engine: RGB assembly from polarization tiles.
//!
//! A preset names, per channel, a closed formula over polarization
//! datasets. Formulas are data, not code: the variant set below is the
//! whole vocabulary, so presets from configuration can never execute
//! anything.

use crate::tile_service::{RgbTileResult, TileResult, TileService};
use futures::future::try_join_all;
use sartile_core::utils::CancelToken;
use sartile_core::{CompositeKey, EngineError, Frequency, Polarization, Result, TileKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const RATIO_FLOOR: f32 = 1e-10;

/// One channel's recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFormula {
	/// The polarization's own backscatter power.
	Direct(Polarization),
	/// `a / max(b, 1e-10)`.
	Ratio(Polarization, Polarization),
	/// `a + b`.
	Sum(Polarization, Polarization),
	/// `|a - b|`.
	AbsDiff(Polarization, Polarization),
}

impl ChannelFormula {
	pub fn required(&self) -> Vec<Polarization> {
		match self {
			ChannelFormula::Direct(a) => vec![*a],
			ChannelFormula::Ratio(a, b) | ChannelFormula::Sum(a, b) | ChannelFormula::AbsDiff(a, b) => {
				vec![*a, *b]
			}
		}
	}

	fn evaluate(&self, sources: &HashMap<Polarization, Arc<TileResult>>, index: usize) -> f32 {
		let sample = |pol: &Polarization| sources[pol].data[index];
		match self {
			ChannelFormula::Direct(a) => sample(a),
			ChannelFormula::Ratio(a, b) => sample(a) / sample(b).max(RATIO_FLOOR),
			ChannelFormula::Sum(a, b) => sample(a) + sample(b),
			ChannelFormula::AbsDiff(a, b) => (sample(a) - sample(b)).abs(),
		}
	}
}

/// A named RGB recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
	/// Stable identifier used in composite keys.
	pub id: String,
	/// Human-readable label for UI menus.
	pub name: String,
	/// Red, green, blue.
	pub channels: [ChannelFormula; 3],
}

impl Preset {
	/// Every polarization any channel touches.
	pub fn required(&self) -> BTreeSet<Polarization> {
		self.channels.iter().flat_map(|c| c.required()).collect()
	}

	/// True when `available` satisfies every channel.
	pub fn satisfied_by(&self, available: &[Polarization]) -> bool {
		self.required().iter().all(|pol| available.contains(pol))
	}
}

/// The standard catalogue, in auto-selection order.
pub fn default_presets() -> Vec<Preset> {
	let pol = |code: &str| Polarization::parse(code).expect("catalogue codes are valid");
	vec![
		Preset {
			id: "hh-hv-vv".to_string(),
			name: "Quad-pol power".to_string(),
			channels: [
				ChannelFormula::Direct(pol("HHHH")),
				ChannelFormula::Direct(pol("HVHV")),
				ChannelFormula::Direct(pol("VVVV")),
			],
		},
		Preset {
			id: "dual-pol-h".to_string(),
			name: "Dual-pol (H transmit)".to_string(),
			channels: [
				ChannelFormula::Direct(pol("HHHH")),
				ChannelFormula::Direct(pol("HVHV")),
				ChannelFormula::Ratio(pol("HHHH"), pol("HVHV")),
			],
		},
		Preset {
			id: "dual-pol-v".to_string(),
			name: "Dual-pol (V transmit)".to_string(),
			channels: [
				ChannelFormula::Direct(pol("VVVV")),
				ChannelFormula::Direct(pol("VHVH")),
				ChannelFormula::Ratio(pol("VVVV"), pol("VHVH")),
			],
		},
		Preset {
			id: "pauli-power".to_string(),
			name: "Pauli power".to_string(),
			channels: [
				ChannelFormula::AbsDiff(pol("HHHH"), pol("VVVV")),
				ChannelFormula::Direct(pol("HVHV")),
				ChannelFormula::Sum(pol("HHHH"), pol("VVVV")),
			],
		},
	]
}

impl TileService {
	/// The first registered preset the product's polarizations satisfy.
	pub fn auto_select(&self, frequency: Frequency) -> Option<Preset> {
		self.satisfiable_presets(frequency).into_iter().next()
	}

	/// Every registered preset this product can serve on `frequency`,
	/// in registration order.
	pub fn satisfiable_presets(&self, frequency: Frequency) -> Vec<Preset> {
		let core = &self.inner.core;
		let Some(group) = core.frequency(frequency) else {
			return Vec::new();
		};
		core
			.session
			.presets()
			.iter()
			.filter(|preset| preset.satisfied_by(&group.polarizations))
			.cloned()
			.collect()
	}

	/// Builds an RGB composite tile: parallel aligned tile requests on
	/// every required polarization, then pointwise channel formulas.
	///
	/// `mask[i]` is true iff every source pixel at `i` is finite and
	/// non-zero; RGB values outside the mask are undefined. Any failing
	/// source tile fails the whole composite with that error.
	pub async fn get_composite_tile(&self, key: &CompositeKey, cancel: &CancelToken) -> Result<RgbTileResult> {
		if let Some(tile) = self.inner.composite_cache.lock().get(key) {
			log::trace!("composite cache hit for {key}");
			return Ok((*tile).clone());
		}

		let preset = self
			.inner
			.core
			.session
			.preset(&key.preset)
			.cloned()
			.ok_or_else(|| EngineError::NotFound(format!("preset '{}'", key.preset)))?;

		let group = self
			.inner
			.core
			.frequency(key.frequency)
			.ok_or_else(|| EngineError::NotFound(format!("frequency {}", key.frequency)))?;

		let required: Vec<Polarization> = preset.required().into_iter().collect();
		let fetches = required.iter().map(|pol| {
			let tile_key = TileKey::new(group.dataset_path(*pol), key.level, key.x, key.y);
			async move { self.get_tile(&tile_key, cancel).await.map(|tile| (*pol, Arc::new(tile))) }
		});
		let sources: HashMap<Polarization, Arc<TileResult>> = try_join_all(fetches).await?.into_iter().collect();

		let reference = sources
			.values()
			.next()
			.ok_or_else(|| EngineError::NotFound(format!("preset '{}' requires no sources", key.preset)))?
			.clone();
		let pixels = reference.width * reference.height;
		if sources.values().any(|tile| tile.data.len() != pixels) {
			return Err(EngineError::Decode(format!(
				"misaligned source tiles for composite {key}"
			)));
		}

		let mut tile = RgbTileResult {
			r: vec![0.0; pixels],
			g: vec![0.0; pixels],
			b: vec![0.0; pixels],
			width: reference.width,
			height: reference.height,
			bounds: reference.bounds,
			mask: vec![false; pixels],
		};
		for index in 0..pixels {
			cancel_check_sparse(cancel, index)?;
			let valid = required.iter().all(|pol| {
				let value = sources[pol].data[index];
				value.is_finite() && value != 0.0
			});
			tile.mask[index] = valid;
			tile.r[index] = preset.channels[0].evaluate(&sources, index);
			tile.g[index] = preset.channels[1].evaluate(&sources, index);
			tile.b[index] = preset.channels[2].evaluate(&sources, index);
		}

		let tile = Arc::new(tile);
		if !cancel.is_cancelled() {
			self.inner.composite_cache.lock().insert(key.clone(), tile.clone());
		}
		Ok((*tile).clone())
	}
}

fn cancel_check_sparse(cancel: &CancelToken, index: usize) -> Result<()> {
	if index % 65536 == 0 { cancel.check() } else { Ok(()) }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pol(code: &str) -> Polarization {
		Polarization::parse(code).unwrap()
	}

	#[test]
	fn catalogue_order_and_ids() {
		let presets = default_presets();
		let ids: Vec<&str> = presets.iter().map(|p| p.id.as_str()).collect();
		assert_eq!(ids, vec!["hh-hv-vv", "dual-pol-h", "dual-pol-v", "pauli-power"]);
	}

	#[test]
	fn required_sets() {
		let presets = default_presets();
		let required = presets[0].required();
		assert_eq!(required.len(), 3);
		assert!(required.contains(&pol("VVVV")));

		let dual = &presets[1];
		assert_eq!(dual.required().into_iter().collect::<Vec<_>>(), vec![pol("HHHH"), pol("HVHV")]);
	}

	#[test]
	fn satisfaction() {
		let presets = default_presets();
		let dual_h = [pol("HHHH"), pol("HVHV")];
		assert!(!presets[0].satisfied_by(&dual_h));
		assert!(presets[1].satisfied_by(&dual_h));
		assert!(!presets[2].satisfied_by(&dual_h));
	}

	#[test]
	fn formula_evaluation() {
		let mut sources = HashMap::new();
		let tile = |values: Vec<f32>| {
			Arc::new(TileResult {
				no_data_mask: values.iter().map(|v| v.is_finite() && *v != 0.0).collect(),
				data: values,
				width: 2,
				height: 1,
				bounds: sartile_core::GeoBBox::new(0.0, 0.0, 1.0, 1.0),
			})
		};
		sources.insert(pol("HHHH"), tile(vec![6.0, 0.0]));
		sources.insert(pol("HVHV"), tile(vec![2.0, 5.0]));

		assert_eq!(ChannelFormula::Direct(pol("HHHH")).evaluate(&sources, 0), 6.0);
		assert_eq!(ChannelFormula::Ratio(pol("HHHH"), pol("HVHV")).evaluate(&sources, 0), 3.0);
		assert_eq!(ChannelFormula::Sum(pol("HHHH"), pol("HVHV")).evaluate(&sources, 0), 8.0);
		assert_eq!(ChannelFormula::AbsDiff(pol("HVHV"), pol("HHHH")).evaluate(&sources, 0), 4.0);

		// Ratio against a zero denominator stays finite via the floor.
		let ratio = ChannelFormula::Ratio(pol("HVHV"), pol("HHHH")).evaluate(&sources, 1);
		assert!(ratio.is_finite());
	}
}
