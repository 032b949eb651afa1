//! End-to-end scenarios over synthetic in-memory products: streaming,
//! request coalescing, composites, cancellation and corruption.

use async_trait::async_trait;
use bytes::Bytes;
use sartile::{CancelToken, CompositeKey, EngineError, Frequency, Polarization, Session, SessionOptions, TileKey};
use sartile_core::ByteRange;
use sartile_core::io::{MemoryRangeReader, RangeReader};
use sartile_hdf5::testing::TestFileBuilder;
use sartile_hdf5::{FILTER_DEFLATE, FILTER_SHUFFLE};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const BASE: &str = "/science/LSAR/GCOV/grids/frequencyA";

/// Wraps the memory backend, counting requests and bytes and
/// optionally slowing every read down.
#[derive(Debug)]
struct InstrumentedReader {
	inner: MemoryRangeReader,
	requests: AtomicUsize,
	bytes: AtomicUsize,
	delay: Option<Duration>,
}

impl InstrumentedReader {
	fn new(file: Vec<u8>, delay: Option<Duration>) -> Arc<Self> {
		Arc::new(Self {
			inner: MemoryRangeReader::new("instrumented", file),
			requests: AtomicUsize::new(0),
			bytes: AtomicUsize::new(0),
			delay,
		})
	}

	fn requests(&self) -> usize {
		self.requests.load(Ordering::SeqCst)
	}

	fn bytes(&self) -> usize {
		self.bytes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl RangeReader for InstrumentedReader {
	async fn read_range(&self, range: &ByteRange) -> sartile::Result<Bytes> {
		self.requests.fetch_add(1, Ordering::SeqCst);
		self.bytes.fetch_add(range.length as usize, Ordering::SeqCst);
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}
		self.inner.read_range(range).await
	}

	fn size(&self) -> u64 {
		self.inner.size()
	}

	fn name(&self) -> &str {
		"instrumented"
	}
}

fn speckle(height: u64, width: u64, seed: u64) -> Vec<f32> {
	// Deterministic positive backscatter-like values.
	(0..height * width)
		.map(|i| {
			let h = (i ^ seed).wrapping_mul(0x9E3779B97F4A7C15).rotate_left(17);
			((h % 1000) as f32 + 1.0) / 1000.0
		})
		.collect()
}

fn dual_pol_product(height: u64, width: u64) -> Vec<u8> {
	TestFileBuilder::new()
		.dataset_chunked(
			&format!("{BASE}/HHHH"),
			&[height, width],
			&[64, 64],
			&[FILTER_SHUFFLE, FILTER_DEFLATE],
			&speckle(height, width, 1),
		)
		.dataset_chunked(
			&format!("{BASE}/HVHV"),
			&[height, width],
			&[64, 64],
			&[FILTER_SHUFFLE, FILTER_DEFLATE],
			&speckle(height, width, 2),
		)
		.vector_f64(
			&format!("{BASE}/xCoordinates"),
			&(0..width).map(|i| 400_000.0 + 30.0 * i as f64).collect::<Vec<_>>(),
		)
		.vector_f64(
			&format!("{BASE}/yCoordinates"),
			&(0..height).map(|i| 3_900_000.0 - 30.0 * i as f64).collect::<Vec<_>>(),
		)
		.scalar_i64("/science/LSAR/identification/trackNumber", 27)
		.scalar_string("/science/LSAR/identification/orbitPassDirection", "descending")
		.build()
}

fn tile_session(tile_size: u32) -> Session {
	Session::with_options(SessionOptions {
		tile_size,
		..SessionOptions::default()
	})
}

#[tokio::test]
async fn single_band_streaming() {
	let _ = env_logger::builder().is_test(true).try_init();

	// The S1 shape in miniature: chunked, shuffled, deflated.
	let reader = InstrumentedReader::new(dual_pol_product(256, 192), None);
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader.clone()).await.unwrap();

	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service();

	// Native-resolution tile away from the origin.
	let key = TileKey::new(path.clone(), 2, 1, 2);
	let tile = service.get_tile(&key, &CancelToken::new()).await.unwrap();
	assert_eq!((tile.width, tile.height), (64, 64));
	assert_eq!(tile.data.len(), 64 * 64);
	assert!(tile.data.iter().all(|v| v.is_finite() && *v > 0.0));
	assert!(tile.no_data_mask.iter().all(|m| *m));

	// Bounds follow the coordinate vectors (30 m pixels).
	assert!((tile.bounds.width() - 64.0 * 30.0).abs() < 1e-6);

	// Transfer ratio: with metadata warm, a fresh tile costs at most
	// 2.5x its payload in fetched bytes.
	let before = reader.bytes();
	let key = TileKey::new(path, 2, 2, 1);
	let tile = service.get_tile(&key, &CancelToken::new()).await.unwrap();
	let fetched = reader.bytes() - before;
	assert!(
		fetched <= tile.data.len() * 4 * 5 / 2,
		"fetched {fetched} bytes for a {} byte tile",
		tile.data.len() * 4
	);
}

#[tokio::test]
async fn equal_keys_are_byte_identical() {
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), None);
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service();

	let key = TileKey::new(path, 1, 1, 0);
	let first = service.get_tile(&key, &CancelToken::new()).await.unwrap();
	let second = service.get_tile(&key, &CancelToken::new()).await.unwrap();
	assert_eq!(first.data, second.data);
	assert_eq!(first.bounds, second.bounds);
}

#[tokio::test]
async fn concurrent_requests_coalesce() {
	// S2: two racing callers, one set of range requests.
	let file = dual_pol_product(128, 128);

	let sequential_requests = {
		let reader = InstrumentedReader::new(file.clone(), Some(Duration::from_millis(1)));
		let session = tile_session(64);
		let product = sartile::Product::open_reader(&session, reader.clone()).await.unwrap();
		let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
		let service = product.tile_service();
		service
			.get_tile(&TileKey::new(path, 1, 0, 0), &CancelToken::new())
			.await
			.unwrap();
		reader.requests()
	};

	let reader = InstrumentedReader::new(file, Some(Duration::from_millis(1)));
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader.clone()).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service();

	let key = TileKey::new(path, 1, 0, 0);
	let cancel = CancelToken::new();
	let (a, b) = tokio::join!(service.get_tile(&key, &cancel), service.get_tile(&key, &cancel));
	let (a, b) = (a.unwrap(), b.unwrap());

	assert_eq!(a.data, b.data, "coalesced callers observe the same buffer");
	assert_eq!(
		reader.requests(),
		sequential_requests,
		"two racing callers issue exactly the request set of one"
	);
}

#[tokio::test]
async fn composite_auto_select_and_ratio_law() {
	// S3: {HHHH, HVHV} auto-selects dual-pol-h; B == R / max(G, 1e-10).
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), None);
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let service = product.tile_service();

	let preset = service.auto_select(Frequency::A).expect("dual-pol product satisfies a preset");
	assert_eq!(preset.id, "dual-pol-h");

	let key = CompositeKey::new(preset.id.clone(), Frequency::A, 1, 0, 0);
	let tile = service.get_composite_tile(&key, &CancelToken::new()).await.unwrap();
	assert_eq!(tile.r.len(), tile.g.len());
	assert_eq!(tile.r.len(), tile.b.len());
	assert_eq!(tile.r.len(), tile.width * tile.height);

	let mut masked = 0usize;
	for index in 0..tile.r.len() {
		if tile.mask[index] {
			masked += 1;
			assert_eq!(tile.b[index], tile.r[index] / tile.g[index].max(1e-10));
		}
	}
	assert!(masked > 0, "synthetic speckle is positive everywhere");
}

#[tokio::test]
async fn composite_mask_law() {
	// mask[i] is false iff any source pixel at i is zero or NaN.
	let mut hh = speckle(64, 64, 1);
	hh[5] = 0.0;
	let hv = speckle(64, 64, 2);
	let file = TestFileBuilder::new()
		.dataset_chunked(&format!("{BASE}/HHHH"), &[64, 64], &[64, 64], &[], &hh)
		.dataset_chunked(&format!("{BASE}/HVHV"), &[64, 64], &[64, 64], &[], &hv)
		.build();

	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, InstrumentedReader::new(file, None)).await.unwrap();
	let service = product.tile_service();

	let key = CompositeKey::new("dual-pol-h", Frequency::A, 0, 0, 0);
	let tile = service.get_composite_tile(&key, &CancelToken::new()).await.unwrap();
	assert!(!tile.mask[5], "zero source pixel must clear the mask");
	assert!(tile.mask[6]);
}

#[tokio::test]
async fn missing_polarizations_fail_composites() {
	let file = TestFileBuilder::new()
		.dataset_chunked(&format!("{BASE}/HHHH"), &[64, 64], &[64, 64], &[], &speckle(64, 64, 1))
		.build();
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, InstrumentedReader::new(file, None)).await.unwrap();
	let service = product.tile_service();

	assert!(service.auto_select(Frequency::A).is_none());

	let key = CompositeKey::new("dual-pol-h", Frequency::A, 0, 0, 0);
	let result = service.get_composite_tile(&key, &CancelToken::new()).await;
	assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn cancellation_leaves_no_cache_entry() {
	// S5: cancel mid-flight, resolve fast, recompute afterwards.
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), Some(Duration::from_millis(25)));
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader.clone()).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service().clone();

	let key = TileKey::new(path, 1, 0, 0);
	let cancel = CancelToken::new();
	let racing = {
		let (service, key, cancel) = (service.clone(), key.clone(), cancel.clone());
		tokio::spawn(async move { service.get_tile(&key, &cancel).await })
	};

	tokio::time::sleep(Duration::from_millis(5)).await;
	let fired = std::time::Instant::now();
	cancel.cancel();
	let outcome = racing.await.unwrap();
	assert!(matches!(outcome, Err(EngineError::Cancelled)));
	assert!(fired.elapsed() < Duration::from_millis(50), "cancellation resolves promptly");

	// No cache entry for the key: a later request fetches again.
	tokio::time::sleep(Duration::from_millis(80)).await; // let the aborted driver drain
	let before = reader.requests();
	let tile = service.get_tile(&key, &CancelToken::new()).await.unwrap();
	assert!(reader.requests() > before, "cancelled tile must not have been cached");
	assert_eq!(tile.data.len(), tile.width * tile.height);
}

#[tokio::test]
async fn cancelling_one_caller_spares_its_peer() {
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), Some(Duration::from_millis(10)));
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service().clone();

	let key = TileKey::new(path, 1, 0, 0);
	let impatient = CancelToken::new();
	let patient = CancelToken::new();

	let first = {
		let (service, key, impatient) = (service.clone(), key.clone(), impatient.clone());
		tokio::spawn(async move { service.get_tile(&key, &impatient).await })
	};
	let second = {
		let (service, key, patient) = (service.clone(), key.clone(), patient.clone());
		tokio::spawn(async move { service.get_tile(&key, &patient).await })
	};

	tokio::time::sleep(Duration::from_millis(3)).await;
	impatient.cancel();

	let first = first.await.unwrap();
	let second = second.await.unwrap();
	assert!(matches!(first, Err(EngineError::Cancelled)));
	let tile = second.expect("the patient caller still gets its tile");
	assert_eq!(tile.data.len(), tile.width * tile.height);
}

#[tokio::test]
async fn admission_control_rejects_excess_requests() {
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), Some(Duration::from_millis(50)));
	let session = Session::with_options(SessionOptions {
		tile_size: 64,
		max_pending: 1,
		..SessionOptions::default()
	});
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service().clone();

	let slow = {
		let (service, path) = (service.clone(), path.clone());
		tokio::spawn(async move {
			service
				.get_tile(&TileKey::new(path, 1, 0, 0), &CancelToken::new())
				.await
		})
	};

	// Wait until the first request occupies the only admission slot.
	while service.pending() == 0 {
		tokio::time::sleep(Duration::from_millis(1)).await;
	}

	let rejected = service
		.get_tile(&TileKey::new(path, 1, 1, 0), &CancelToken::new())
		.await;
	assert!(matches!(rejected, Err(EngineError::Overloaded)));

	slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn tile_deadline_times_out() {
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), Some(Duration::from_millis(40)));
	let session = Session::with_options(SessionOptions {
		tile_size: 64,
		tile_deadline: Duration::from_millis(60),
		..SessionOptions::default()
	});
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();

	// Several sequential reads of ~40 ms each cannot meet a 60 ms
	// deadline.
	let result = product
		.tile_service()
		.get_tile(&TileKey::new(path, 1, 0, 0), &CancelToken::new())
		.await;
	assert!(matches!(result, Err(EngineError::Timeout(_))));
}

#[tokio::test]
async fn invalidation_drops_cached_tiles() {
	let reader = InstrumentedReader::new(dual_pol_product(128, 128), None);
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader.clone()).await.unwrap();
	let path = product.dataset_path(Frequency::A, Polarization::parse("HHHH").unwrap()).unwrap();
	let service = product.tile_service();

	let key = TileKey::new(path.clone(), 1, 0, 0);
	service.get_tile(&key, &CancelToken::new()).await.unwrap();

	// Warm: no further requests.
	let warm = reader.requests();
	service.get_tile(&key, &CancelToken::new()).await.unwrap();
	assert_eq!(reader.requests(), warm);

	service.invalidate(&path).await;
	service.get_tile(&key, &CancelToken::new()).await.unwrap();
	assert!(reader.requests() > warm, "invalidation must drop tile and chunk caches");
}

#[tokio::test]
async fn truncated_products_fail_to_open() {
	// S6: declared end-of-file one byte past the real size.
	let mut file = dual_pol_product(64, 64);
	let declared = file.len() as u64 + 1;
	file[40..48].copy_from_slice(&declared.to_le_bytes());

	let session = tile_session(64);
	let result = sartile::Product::open_reader(&session, InstrumentedReader::new(file, None)).await;
	assert!(matches!(result, Err(EngineError::TruncatedFile(_))));
}

#[tokio::test]
async fn viewport_stats_report_partial_coverage_on_cancel() {
	let reader = InstrumentedReader::new(dual_pol_product(256, 256), None);
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let service = product.tile_service();

	let bbox = sartile::GeoBBox::new(400_000.0, 3_892_350.0, 407_650.0, 3_900_000.0);
	let cancel = CancelToken::new();
	cancel.cancel();

	let stats = service
		.viewport_stats(Frequency::A, &bbox, &sartile::StatsOptions::default(), &cancel)
		.await
		.unwrap();
	assert_eq!(stats.tiles_scanned, 0);
	assert!(stats.tiles_total > 0);
	for (_, channel) in &stats.channels {
		assert_eq!(channel.count, 0);
	}
}

#[tokio::test]
async fn viewport_stats_cover_the_bbox() {
	let reader = InstrumentedReader::new(dual_pol_product(256, 256), None);
	let session = tile_session(64);
	let product = sartile::Product::open_reader(&session, reader).await.unwrap();
	let service = product.tile_service();

	// The product spans x 400000..407650, y 3892350..3900000.
	let bbox = sartile::GeoBBox::new(400_000.0, 3_892_350.0, 407_650.0, 3_900_000.0);
	let stats = service
		.viewport_stats(
			Frequency::A,
			&bbox,
			&sartile::StatsOptions::default(),
			&CancelToken::new(),
		)
		.await
		.unwrap();

	assert_eq!(stats.tiles_scanned, stats.tiles_total);
	assert_eq!(stats.channels.len(), 2);
	for (_, channel) in &stats.channels {
		assert!(channel.count > 0);
		assert!(channel.min > 0.0);
		assert!(channel.p2 <= channel.p98);
	}
}
