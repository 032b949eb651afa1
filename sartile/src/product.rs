//! The product model: NISAR GCOV layout discovery.
//!
//! Opening scans `/science/{band}/GCOV/grids/frequency{A|B}/` for
//! polarization datasets and coordinate vectors, and harvests the
//! identification block. Datasets themselves stay unopened until the
//! tile service first touches them.

use crate::lod::TileGrid;
use crate::session::Session;
use crate::tile_service::TileService;
use sartile_core::io::{SharedRangeReader, open_range_reader};
use sartile_core::{EngineError, Frequency, GeoBBox, Polarization, Result};
use sartile_hdf5::{Hdf5File, RegionRequest};
use std::sync::{Arc, OnceLock};

const BANDS: [&str; 2] = ["LSAR", "SSAR"];

/// Contents of `/science/{band}/identification/`. Members a product
/// does not carry stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identification {
	pub track: Option<i64>,
	pub frame: Option<i64>,
	pub orbit_direction: Option<String>,
	pub start_time: Option<String>,
	pub end_time: Option<String>,
}

/// One frequency sub-band grid and its datasets.
pub(crate) struct FrequencyGroup {
	pub frequency: Frequency,
	/// Absolute group path, e.g. `/science/LSAR/GCOV/grids/frequencyA`.
	pub path: String,
	pub polarizations: Vec<Polarization>,
	/// Projected x coordinate per column (pixel centers).
	pub x_coords: Vec<f64>,
	/// Projected y coordinate per row (pixel centers).
	pub y_coords: Vec<f64>,
	pub grid: TileGrid,
}

impl FrequencyGroup {
	pub fn dataset_path(&self, polarization: Polarization) -> String {
		format!("{}/{}", self.path, polarization)
	}

	pub fn contains_path(&self, dataset_path: &str) -> bool {
		dataset_path
			.strip_prefix(self.path.as_str())
			.is_some_and(|rest| rest.starts_with('/'))
	}

	/// Projected bounds of a source-pixel window, half-pixel-expanded
	/// to cell edges.
	pub fn window_bounds(&self, request: &RegionRequest) -> GeoBBox {
		let x_of = |col: u64| coord_at(&self.x_coords, col);
		let y_of = |row: u64| coord_at(&self.y_coords, row);

		let left = x_of(request.col);
		let right = x_of(request.col + request.width - 1);
		let top = y_of(request.row);
		let bottom = y_of(request.row + request.height - 1);

		let half_x = spacing(&self.x_coords) / 2.0;
		let half_y = spacing(&self.y_coords) / 2.0;

		GeoBBox::new(
			left.min(right) - half_x.abs(),
			top.min(bottom) - half_y.abs(),
			left.max(right) + half_x.abs(),
			top.max(bottom) + half_y.abs(),
		)
	}

	/// Source-pixel window of a projected bbox, clamped to the grid.
	pub fn pixel_window(&self, bbox: &GeoBBox) -> Option<(u64, u64, u64, u64)> {
		let col_a = nearest_index(&self.x_coords, bbox.min_x)?;
		let col_b = nearest_index(&self.x_coords, bbox.max_x)?;
		let row_a = nearest_index(&self.y_coords, bbox.min_y)?;
		let row_b = nearest_index(&self.y_coords, bbox.max_y)?;

		let (col0, col1) = (col_a.min(col_b), col_a.max(col_b));
		let (row0, row1) = (row_a.min(row_b), row_a.max(row_b));
		Some((row0, col0, row1 - row0 + 1, col1 - col0 + 1))
	}
}

fn coord_at(coords: &[f64], index: u64) -> f64 {
	match coords.get(index as usize) {
		Some(value) => *value,
		// Extrapolate past the vector end; windows are clamped upstream
		// so this only covers degenerate single-pixel grids.
		None => coords.last().copied().unwrap_or(index as f64),
	}
}

fn spacing(coords: &[f64]) -> f64 {
	if coords.len() > 1 {
		coords[1] - coords[0]
	} else {
		1.0
	}
}

fn nearest_index(coords: &[f64], value: f64) -> Option<u64> {
	if coords.is_empty() {
		return None;
	}
	let step = spacing(coords);
	let fraction = (value - coords[0]) / step;
	Some(fraction.round().clamp(0.0, (coords.len() - 1) as f64) as u64)
}

/// The product state the tile service shares: everything except the
/// service itself, so no reference cycle forms between the two.
pub(crate) struct ProductCore {
	pub session: Session,
	pub file: Arc<Hdf5File>,
	pub frequencies: Vec<FrequencyGroup>,
}

impl ProductCore {
	pub fn frequency(&self, frequency: Frequency) -> Option<&FrequencyGroup> {
		self.frequencies.iter().find(|group| group.frequency == frequency)
	}

	pub fn group_for_path(&self, dataset_path: &str) -> Option<&FrequencyGroup> {
		self.frequencies.iter().find(|group| group.contains_path(dataset_path))
	}
}

pub(crate) struct ProductInner {
	pub core: Arc<ProductCore>,
	pub band: String,
	pub identification: Identification,
	service: OnceLock<TileService>,
}

/// An open NISAR GCOV product.
#[derive(Clone)]
pub struct Product {
	pub(crate) inner: Arc<ProductInner>,
}

impl Product {
	/// Opens a product by URL.
	pub async fn open(session: &Session, url: &str) -> Result<Product> {
		Self::open_reader(session, open_range_reader(url).await?).await
	}

	/// Opens a product over an already-open range reader (tests, memory
	/// buffers, custom backends).
	pub async fn open_reader(session: &Session, reader: SharedRangeReader) -> Result<Product> {
		let options = sartile_hdf5::Hdf5Options {
			chunk_cache_bytes: session.options().chunk_cache_bytes,
			decode_parallelism: session.options().decode_parallelism,
		};
		let file = Arc::new(Hdf5File::open_with(reader, options).await?);

		let mut band = None;
		for candidate in BANDS {
			if file.exists(&format!("/science/{candidate}/GCOV/grids")).await {
				band = Some(candidate.to_string());
				break;
			}
		}
		let band = band.ok_or_else(|| {
			EngineError::UnsupportedFormat(format!("'{}' carries no NISAR GCOV grid layout", file.name()))
		})?;

		let mut frequencies = Vec::new();
		for frequency in [Frequency::A, Frequency::B] {
			let path = format!("/science/{band}/GCOV/grids/frequency{frequency}");
			if !file.exists(&path).await {
				continue;
			}
			if let Some(group) = load_frequency_group(session, &file, frequency, path).await? {
				frequencies.push(group);
			}
		}
		if frequencies.is_empty() {
			return Err(EngineError::UnsupportedFormat(format!(
				"'{}' has no frequency grids with polarization datasets",
				file.name()
			)));
		}

		let identification = load_identification(&file, &band).await;
		log::debug!(
			"opened product '{}' band {band}, frequencies {:?}",
			file.name(),
			frequencies.iter().map(|f| f.frequency).collect::<Vec<_>>()
		);

		Ok(Product {
			inner: Arc::new(ProductInner {
				core: Arc::new(ProductCore {
					session: session.clone(),
					file,
					frequencies,
				}),
				band,
				identification,
				service: OnceLock::new(),
			}),
		})
	}

	pub fn name(&self) -> &str {
		self.inner.core.file.name()
	}

	pub fn band(&self) -> &str {
		&self.inner.band
	}

	pub fn frequencies(&self) -> Vec<Frequency> {
		self.inner.core.frequencies.iter().map(|group| group.frequency).collect()
	}

	pub fn polarizations(&self, frequency: Frequency) -> Vec<Polarization> {
		self
			.inner
			.core
			.frequency(frequency)
			.map(|group| group.polarizations.clone())
			.unwrap_or_default()
	}

	pub fn identification(&self) -> &Identification {
		&self.inner.identification
	}

	/// The dataset path serving `(frequency, polarization)`.
	pub fn dataset_path(&self, frequency: Frequency, polarization: Polarization) -> Result<String> {
		let group = self
			.inner
			.core
			.frequency(frequency)
			.ok_or_else(|| EngineError::NotFound(format!("frequency {frequency} on '{}'", self.name())))?;
		if !group.polarizations.contains(&polarization) {
			return Err(EngineError::NotFound(format!(
				"polarization {polarization} on frequency {frequency} of '{}'",
				self.name()
			)));
		}
		Ok(group.dataset_path(polarization))
	}

	/// The shared tile service of this product.
	pub fn tile_service(&self) -> &TileService {
		self
			.inner
			.service
			.get_or_init(|| TileService::new(self.inner.core.clone()))
	}
}

impl std::fmt::Debug for Product {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Product")
			.field("name", &self.name())
			.field("band", &self.inner.band)
			.field("frequencies", &self.frequencies())
			.finish()
	}
}

async fn load_frequency_group(
	session: &Session,
	file: &Arc<Hdf5File>,
	frequency: Frequency,
	path: String,
) -> Result<Option<FrequencyGroup>> {
	let children = file.list_children(&path).await?;
	let polarizations: Vec<Polarization> = children
		.iter()
		.filter_map(|name| Polarization::parse(name).ok())
		.collect();
	if polarizations.is_empty() {
		return Ok(None);
	}

	let x_coords = read_coords(file, &format!("{path}/xCoordinates")).await;
	let y_coords = read_coords(file, &format!("{path}/yCoordinates")).await;

	// Grid geometry comes from a diagonal (real power) term when one
	// exists; off-diagonal complex terms share the same grid.
	let reference_pol = polarizations
		.iter()
		.copied()
		.find(|pol| pol.is_diagonal())
		.unwrap_or(polarizations[0]);
	let reference = file.dataset(&format!("{path}/{reference_pol}")).await?;
	let (height, width) = (reference.meta().height(), reference.meta().width());
	let options = session.options();
	let grid = TileGrid::new(height, width, options.tile_size, options.overview_factor);

	Ok(Some(FrequencyGroup {
		frequency,
		path,
		polarizations,
		x_coords,
		y_coords,
		grid,
	}))
}

async fn read_coords(file: &Arc<Hdf5File>, path: &str) -> Vec<f64> {
	match file.dataset(path).await {
		Ok(dataset) => dataset.read_vector_f64().await.unwrap_or_default(),
		Err(_) => Vec::new(),
	}
}

async fn load_identification(file: &Arc<Hdf5File>, band: &str) -> Identification {
	let base = format!("/science/{band}/identification");
	let scalar_i64 = |name: &str| {
		let path = format!("{base}/{name}");
		async move {
			match file.dataset(&path).await {
				Ok(dataset) => dataset.read_scalar_i64().await.ok(),
				Err(_) => None,
			}
		}
	};
	let scalar_string = |name: &str| {
		let path = format!("{base}/{name}");
		async move {
			match file.dataset(&path).await {
				Ok(dataset) => dataset.read_scalar_string().await.ok(),
				Err(_) => None,
			}
		}
	};

	Identification {
		track: scalar_i64("trackNumber").await,
		frame: scalar_i64("frameNumber").await,
		orbit_direction: scalar_string("orbitPassDirection").await,
		start_time: scalar_string("zeroDopplerStartTime").await,
		end_time: scalar_string("zeroDopplerEndTime").await,
	}
}
