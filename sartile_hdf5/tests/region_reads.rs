//! Region-read properties over synthetic containers: every buffer is
//! produced by the real parser from real bytes.

use sartile_core::io::MemoryRangeReader;
use sartile_core::utils::CancelToken;
use sartile_hdf5::testing::TestFileBuilder;
use sartile_hdf5::{FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE, Hdf5File, RegionRequest};
use std::sync::Arc;

async fn open(file: Vec<u8>) -> Hdf5File {
	Hdf5File::open(Arc::new(MemoryRangeReader::new("mem", file)))
		.await
		.expect("synthetic container opens")
}

fn pattern(height: u64, width: u64) -> Vec<f32> {
	(0..height * width)
		.map(|i| {
			let (row, col) = (i / width, i % width);
			(row * 10_000 + col) as f32
		})
		.collect()
}

#[tokio::test]
async fn region_size_invariant() {
	// |read_region(R)| == R.h * R.w for every window inside the shape.
	let data = pattern(37, 53);
	let file = TestFileBuilder::new()
		.dataset_chunked("/d", &[37, 53], &[16, 16], &[FILTER_DEFLATE], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();
	let cancel = CancelToken::new();

	for (row, col, height, width) in [
		(0, 0, 37, 53),
		(0, 0, 1, 1),
		(36, 52, 1, 1),
		(5, 7, 17, 31),
		(16, 16, 16, 16),
		(15, 15, 2, 2),
	] {
		let region = dataset
			.read_region(&RegionRequest::new(row, col, height, width), &cancel)
			.await
			.unwrap();
		assert_eq!(region.data.len(), (height * width) as usize);
		assert_eq!(region.height, height as usize);
		assert_eq!(region.width, width as usize);

		for (index, value) in region.data.iter().enumerate() {
			let (out_row, out_col) = (index as u64 / width, index as u64 % width);
			let expected = ((row + out_row) * 10_000 + col + out_col) as f32;
			assert_eq!(*value, expected, "at ({out_row},{out_col}) of window {row},{col}");
		}
	}
}

#[tokio::test]
async fn chunk_edge_straddling_matches_split_reads() {
	// Reading across a chunk boundary equals reading the halves.
	let data = pattern(64, 64);
	let file = TestFileBuilder::new()
		.dataset_chunked("/d", &[64, 64], &[32, 32], &[FILTER_SHUFFLE, FILTER_DEFLATE], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();
	let cancel = CancelToken::new();

	let whole = dataset
		.read_region(&RegionRequest::new(16, 0, 32, 64), &cancel)
		.await
		.unwrap();
	let top = dataset
		.read_region(&RegionRequest::new(16, 0, 16, 64), &cancel)
		.await
		.unwrap();
	let bottom = dataset
		.read_region(&RegionRequest::new(32, 0, 16, 64), &cancel)
		.await
		.unwrap();

	let mut stitched = top.data.clone();
	stitched.extend_from_slice(&bottom.data);
	assert_eq!(whole.data, stitched);
}

#[tokio::test]
async fn window_past_extent_fills_nan() {
	let data = pattern(20, 20);
	let file = TestFileBuilder::new()
		.dataset_chunked("/d", &[20, 20], &[16, 16], &[], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();

	// A 16-wide window whose right half hangs past the dataset edge.
	let region = dataset
		.read_region(&RegionRequest::new(16, 12, 16, 16), &CancelToken::new())
		.await
		.unwrap();
	assert_eq!(region.data.len(), 256);

	for (index, value) in region.data.iter().enumerate() {
		let (out_row, out_col) = (index / 16, index % 16);
		let (row, col) = (16 + out_row as u64, 12 + out_col as u64);
		if row < 20 && col < 20 {
			assert_eq!(*value, (row * 10_000 + col) as f32);
		} else {
			assert!(value.is_nan(), "pixel ({row},{col}) outside the extent must be NaN");
		}
	}
}

#[tokio::test]
async fn strided_reads_subsample() {
	let data = pattern(64, 64);
	let file = TestFileBuilder::new()
		.dataset_chunked("/d", &[64, 64], &[16, 16], &[FILTER_DEFLATE], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();

	let region = dataset
		.read_region(&RegionRequest::new(0, 0, 64, 64).with_stride(4), &CancelToken::new())
		.await
		.unwrap();
	assert_eq!((region.height, region.width), (16, 16));

	for (index, value) in region.data.iter().enumerate() {
		let (out_row, out_col) = (index as u64 / 16, index as u64 % 16);
		assert_eq!(*value, (out_row * 4 * 10_000 + out_col * 4) as f32);
	}
}

#[tokio::test]
async fn strides_larger_than_chunks_skip_whole_chunks() {
	let data = pattern(128, 128);
	let file = TestFileBuilder::new()
		.dataset_chunked("/d", &[128, 128], &[16, 16], &[FILTER_DEFLATE], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();

	// Stride 64 touches only pixels (0,0), (0,64), (64,0), (64,64).
	let region = dataset
		.read_region(&RegionRequest::new(0, 0, 128, 128).with_stride(64), &CancelToken::new())
		.await
		.unwrap();
	assert_eq!((region.height, region.width), (2, 2));
	assert_eq!(region.data, vec![0.0, 64.0, 640_000.0, 640_064.0]);
}

#[tokio::test]
async fn full_filter_chain_with_checksums() {
	let data = pattern(48, 48);
	let file = TestFileBuilder::new()
		.dataset_chunked(
			"/d",
			&[48, 48],
			&[16, 16],
			&[FILTER_SHUFFLE, FILTER_DEFLATE, FILTER_FLETCHER32],
			&data,
		)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();

	let region = dataset
		.read_region(&RegionRequest::new(8, 8, 32, 32), &CancelToken::new())
		.await
		.unwrap();
	assert_eq!(region.data[0], 80_008.0);
	assert_eq!(region.data.len(), 1024);
}

#[tokio::test]
async fn complex_datasets_square_on_demand() {
	// Interleaved (re, im): |z|^2 by default, real part on request.
	let interleaved: Vec<f32> = (0..16).flat_map(|i| [i as f32, 1.0]).collect();
	let file = TestFileBuilder::new()
		.dataset_complex("/HHHV", &[4, 4], &[4, 4], &interleaved)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/HHHV").await.unwrap();
	assert!(dataset.meta().datatype.is_complex());

	let power = dataset
		.read_region(&RegionRequest::new(0, 0, 4, 4), &CancelToken::new())
		.await
		.unwrap();
	assert_eq!(power.data[3], 10.0); // 3*3 + 1*1

	let mut request = RegionRequest::new(0, 0, 4, 4);
	request.complex_power = false;
	let real = dataset.read_region(&request, &CancelToken::new()).await.unwrap();
	assert_eq!(real.data[3], 3.0);
}

#[tokio::test]
async fn uint8_datasets_convert() {
	let data: Vec<u8> = (0u16..64).map(|v| (v * 4) as u8).collect();
	let file = TestFileBuilder::new().dataset_u8("/mask", &[8, 8], &data).build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/mask").await.unwrap();

	let region = dataset
		.read_region(&RegionRequest::new(0, 0, 8, 8), &CancelToken::new())
		.await
		.unwrap();
	assert_eq!(region.data[9], 36.0);
}

#[tokio::test]
async fn rank3_planes_are_addressable() {
	let mut data = pattern(8, 8);
	data.extend(pattern(8, 8).iter().map(|v| v + 1.0));
	let file = TestFileBuilder::new()
		.dataset_chunked("/stack", &[2, 8, 8], &[1, 8, 8], &[FILTER_DEFLATE], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/stack").await.unwrap();

	let mut request = RegionRequest::new(0, 0, 8, 8);
	request.plane = 1;
	let region = dataset.read_region(&request, &CancelToken::new()).await.unwrap();
	assert_eq!(region.data[0], 1.0);

	request.plane = 2;
	assert!(dataset.read_region(&request, &CancelToken::new()).await.is_err());
}

#[tokio::test]
async fn cancellation_aborts_region_reads() {
	let data = pattern(64, 64);
	let file = TestFileBuilder::new()
		.dataset_chunked("/d", &[64, 64], &[16, 16], &[FILTER_DEFLATE], &data)
		.build();
	let hdf5 = open(file).await;
	let dataset = hdf5.dataset("/d").await.unwrap();

	let cancel = CancelToken::new();
	cancel.cancel();
	let result = dataset.read_region(&RegionRequest::new(0, 0, 64, 64), &cancel).await;
	assert!(matches!(result, Err(sartile_core::EngineError::Cancelled)));
}
