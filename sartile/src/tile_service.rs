//! The tile service: `get_tile` with per-key coalescing, an LRU tile
//! cache, cancellation and admission control.
//!
//! One in-flight computation exists per tile key; later callers attach
//! to it and receive the same outcome through a watch channel. Each
//! waiter holds a refcount, and the shared computation aborts only when
//! the last waiter cancels, so cancelling one caller never disturbs its
//! peers. Results are cached only when the computation was not aborted;
//! a cancelled key leaves no trace.

use crate::lod::TileGrid;
use crate::product::ProductCore;
use parking_lot::Mutex;
use sartile_core::cache::LimitedCache;
use sartile_core::utils::CancelToken;
use sartile_core::{CompositeKey, EngineError, GeoBBox, Result, TileKey};
use sartile_hdf5::Hdf5Dataset;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// One finished single-dataset tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
	/// Row-major `f32` samples, `width * height` of them.
	pub data: Vec<f32>,
	pub width: usize,
	pub height: usize,
	/// Projected bounds of the covered source window.
	pub bounds: GeoBBox,
	/// `true` where the sample is finite and non-zero; the only
	/// authoritative validity signal.
	pub no_data_mask: Vec<bool>,
}

/// One finished RGB composite tile.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbTileResult {
	pub r: Vec<f32>,
	pub g: Vec<f32>,
	pub b: Vec<f32>,
	pub width: usize,
	pub height: usize,
	pub bounds: GeoBBox,
	/// `true` where every source pixel is finite and non-zero.
	pub mask: Vec<bool>,
}

type TileOutcome = Result<Arc<TileResult>>;

struct Inflight {
	rx: watch::Receiver<Option<TileOutcome>>,
	waiters: Arc<AtomicUsize>,
	abort: CancelToken,
}

pub(crate) struct ServiceInner {
	pub core: Arc<ProductCore>,
	pub tile_cache: Mutex<LimitedCache<TileKey, Arc<TileResult>>>,
	pub composite_cache: Mutex<LimitedCache<CompositeKey, Arc<RgbTileResult>>>,
	inflight: Mutex<HashMap<TileKey, Inflight>>,
	datasets: tokio::sync::Mutex<HashMap<String, Arc<Hdf5Dataset>>>,
	pending: AtomicUsize,
}

/// The per-product tile engine. Cheap to clone; all clones share the
/// same caches and in-flight table.
#[derive(Clone)]
pub struct TileService {
	pub(crate) inner: Arc<ServiceInner>,
}

impl TileService {
	pub(crate) fn new(core: Arc<ProductCore>) -> Self {
		let options = core.session.options();
		Self {
			inner: Arc::new(ServiceInner {
				tile_cache: Mutex::new(LimitedCache::new(options.tile_cache_entries)),
				composite_cache: Mutex::new(LimitedCache::new(options.composite_cache_entries)),
				inflight: Mutex::new(HashMap::new()),
				datasets: tokio::sync::Mutex::new(HashMap::new()),
				pending: AtomicUsize::new(0),
				core,
			}),
		}
	}

	/// Produces the tile behind `key`, coalescing with any concurrent
	/// request for the same key.
	///
	/// # Errors
	/// `Overloaded` under admission control, `Cancelled` when the
	/// caller's token fires first, `Timeout` past the tile deadline,
	/// plus everything the read path can surface.
	pub async fn get_tile(&self, key: &TileKey, cancel: &CancelToken) -> Result<TileResult> {
		let _pending = PendingGuard::enter(
			&self.inner.pending,
			self.inner.core.session.options().max_pending,
		)?;
		cancel.check()?;

		if let Some(tile) = self.inner.tile_cache.lock().get(key) {
			log::trace!("tile cache hit for {key}");
			return Ok((*tile).clone());
		}

		let (mut rx, waiters, abort) = self.join_or_spawn(key);
		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					// Last waiter out turns off the shared computation.
					if waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
						abort.cancel();
					}
					return Err(EngineError::Cancelled);
				}
				changed = rx.changed() => {
					if changed.is_err() {
						waiters.fetch_sub(1, Ordering::SeqCst);
						return Err(EngineError::Cancelled);
					}
					let outcome = rx.borrow().clone();
					if let Some(outcome) = outcome {
						waiters.fetch_sub(1, Ordering::SeqCst);
						return outcome.map(|tile| (*tile).clone());
					}
				}
			}
		}
	}

	/// Drops cached tiles and composites derived from a dataset path,
	/// along with its decoded chunks.
	pub async fn invalidate(&self, dataset_path: &str) {
		self.inner.tile_cache.lock().purge(|key| key.dataset == dataset_path);
		self.inner.core.file.invalidate_chunks(dataset_path);
		self.inner.datasets.lock().await.remove(dataset_path);

		// A composite depends on the path through its preset's
		// polarization set.
		let polarization = dataset_path
			.rsplit('/')
			.next()
			.and_then(|code| sartile_core::Polarization::parse(code).ok());
		let session = self.inner.core.session.clone();
		self.inner.composite_cache.lock().purge(|key| match polarization {
			Some(polarization) => session
				.preset(&key.preset)
				.is_none_or(|preset| preset.required().contains(&polarization)),
			None => true,
		});
	}

	/// Currently pending `get_tile` calls (admission-control gauge).
	pub fn pending(&self) -> usize {
		self.inner.pending.load(Ordering::SeqCst)
	}

	fn join_or_spawn(&self, key: &TileKey) -> (watch::Receiver<Option<TileOutcome>>, Arc<AtomicUsize>, CancelToken) {
		let mut inflight = self.inner.inflight.lock();
		if let Some(entry) = inflight.get(key) {
			entry.waiters.fetch_add(1, Ordering::SeqCst);
			log::trace!("joining in-flight computation for {key}");
			return (entry.rx.clone(), entry.waiters.clone(), entry.abort.clone());
		}

		let (tx, rx) = watch::channel::<Option<TileOutcome>>(None);
		let waiters = Arc::new(AtomicUsize::new(1));
		let abort = CancelToken::new();
		inflight.insert(
			key.clone(),
			Inflight {
				rx: rx.clone(),
				waiters: waiters.clone(),
				abort: abort.clone(),
			},
		);
		drop(inflight);

		let service = self.clone();
		let key = key.clone();
		let task_abort = abort.clone();
		tokio::spawn(async move {
			let deadline = service.inner.core.session.options().tile_deadline;
			let outcome = match tokio::time::timeout(deadline, service.compute_tile(&key, &task_abort)).await {
				Ok(result) => result.map(Arc::new),
				Err(_) => Err(EngineError::Timeout(format!("computing tile {key}"))),
			};

			// Never cache after an abort: a cancelled key leaves no trace.
			if let Ok(tile) = &outcome {
				if !task_abort.is_cancelled() {
					service.inner.tile_cache.lock().insert(key.clone(), tile.clone());
				}
			}
			service.inner.inflight.lock().remove(&key);
			let _ = tx.send(Some(outcome));
		});

		(rx, waiters, abort)
	}

	async fn compute_tile(&self, key: &TileKey, cancel: &CancelToken) -> Result<TileResult> {
		let dataset = self.dataset(&key.dataset).await?;
		cancel.check()?;

		let core = &self.inner.core;
		let group = core.group_for_path(&key.dataset);
		let options = core.session.options();
		let grid = match group {
			Some(group) => group.grid.clone(),
			None => TileGrid::new(
				dataset.meta().height(),
				dataset.meta().width(),
				options.tile_size,
				options.overview_factor,
			),
		};

		let mut window = grid
			.window(key.level, key.x, key.y)
			.ok_or_else(|| EngineError::NotFound(format!("tile {key} outside the dataset grid")))?;
		// Off-diagonal covariance terms are stored complex64; the
		// service serves them squared to backscatter power.
		window.complex_power = dataset.meta().datatype.is_complex();

		let region = dataset.read_region(&window, cancel).await?;
		let bounds = match group {
			Some(group) => group.window_bounds(&window),
			None => GeoBBox::new(
				window.col as f64,
				window.row as f64,
				(window.col + window.width) as f64,
				(window.row + window.height) as f64,
			),
		};

		let no_data_mask = region.data.iter().map(|v| v.is_finite() && *v != 0.0).collect();
		Ok(TileResult {
			data: region.data,
			width: region.width,
			height: region.height,
			bounds,
			no_data_mask,
		})
	}

	pub(crate) async fn dataset(&self, path: &str) -> Result<Arc<Hdf5Dataset>> {
		let mut datasets = self.inner.datasets.lock().await;
		if let Some(dataset) = datasets.get(path) {
			return Ok(dataset.clone());
		}
		let dataset = Arc::new(self.inner.core.file.dataset(path).await?);
		datasets.insert(path.to_string(), dataset.clone());
		Ok(dataset)
	}

	pub(crate) fn grid_for(&self, dataset_path: &str) -> Option<TileGrid> {
		self.inner.core.group_for_path(dataset_path).map(|group| group.grid.clone())
	}
}

impl std::fmt::Debug for TileService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TileService")
			.field("tiles_cached", &self.inner.tile_cache.lock().len())
			.field("pending", &self.pending())
			.finish()
	}
}

/// RAII admission counter.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
	fn enter(counter: &'a AtomicUsize, limit: usize) -> Result<Self> {
		if counter.fetch_add(1, Ordering::SeqCst) >= limit {
			counter.fetch_sub(1, Ordering::SeqCst);
			return Err(EngineError::Overloaded);
		}
		Ok(Self(counter))
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}
