//! Byte-range I/O backends.
//!
//! Everything above this module reads remote files exclusively through
//! [`RangeReader`]: an async `read(offset, length)` with a known total
//! size. Backends exist for HTTP(S), the local filesystem and in-memory
//! buffers; all of them share the same multi-range coalescing planner.

mod http;
mod local;
mod memory;

pub use http::{HttpOptions, HttpRangeReader};
pub use local::FileRangeReader;
pub use memory::MemoryRangeReader;

use crate::{ByteRange, EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use std::fmt::Debug;
use std::sync::Arc;

/// Ranges closer together than this are fetched as one request.
pub const COALESCE_GAP: u64 = 64 * 1024;

/// A shared handle to an open byte-range source.
pub type SharedRangeReader = Arc<dyn RangeReader>;

/// An immutable remote resource addressed by offset.
#[async_trait]
pub trait RangeReader: Debug + Send + Sync {
	/// Reads exactly `range.length` bytes starting at `range.offset`.
	///
	/// # Errors
	/// `Range` if the range reaches past the end of the resource or the
	/// server ignores the range header; `Io`/`Timeout` on transport
	/// failure.
	async fn read_range(&self, range: &ByteRange) -> Result<Bytes>;

	/// Total size of the resource in bytes.
	fn size(&self) -> u64;

	/// Human-readable source identifier (URL or path) for log lines.
	fn name(&self) -> &str;

	/// Reads several ranges, coalescing near-adjacent ones into single
	/// requests. The returned buffers match the caller's ranges exactly,
	/// in the caller's order.
	async fn read_many(&self, ranges: &[ByteRange]) -> Result<Vec<Bytes>> {
		let plan = plan_coalesced(ranges, COALESCE_GAP);
		log::trace!(
			"read_many: {} ranges coalesced into {} requests on {}",
			ranges.len(),
			plan.len(),
			self.name()
		);

		let spans = try_join_all(plan.iter().map(|group| self.read_range(&group.span))).await?;

		let mut out: Vec<Option<Bytes>> = vec![None; ranges.len()];
		for (group, bytes) in plan.iter().zip(spans) {
			for &member in &group.members {
				let range = &ranges[member];
				let start = (range.offset - group.span.offset) as usize;
				out[member] = Some(bytes.slice(start..start + range.length as usize));
			}
		}
		// plan_coalesced assigns every index to exactly one group
		Ok(out.into_iter().map(|b| b.unwrap_or_default()).collect())
	}
}

/// One coalesced request: the byte span to fetch and the indexes of the
/// caller ranges it satisfies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedGroup {
	pub span: ByteRange,
	pub members: Vec<usize>,
}

/// Groups ranges so that any two ranges separated by less than
/// `max_gap` unread bytes land in the same request.
///
/// Input order is arbitrary; member indexes refer to the input slice.
pub fn plan_coalesced(ranges: &[ByteRange], max_gap: u64) -> Vec<CoalescedGroup> {
	let mut order: Vec<usize> = (0..ranges.len()).filter(|i| !ranges[*i].is_empty()).collect();
	order.sort_by_key(|i| (ranges[*i].offset, ranges[*i].length));

	let mut groups: Vec<CoalescedGroup> = Vec::new();
	for i in order {
		let range = ranges[i];
		match groups.last_mut() {
			Some(group) if group.span.gap_to(&range).is_none_or(|gap| gap <= max_gap) => {
				group.span = group.span.union(&range);
				group.members.push(i);
			}
			_ => groups.push(CoalescedGroup {
				span: range,
				members: vec![i],
			}),
		}
	}
	groups
}

/// Opens the backend matching the URL scheme: `http`/`https` go through
/// [`HttpRangeReader`], everything else is treated as a local path.
pub async fn open_range_reader(url: &str) -> Result<SharedRangeReader> {
	if url.starts_with("http://") || url.starts_with("https://") {
		Ok(Arc::new(HttpRangeReader::open(url, HttpOptions::default()).await?))
	} else if let Some(path) = url.strip_prefix("file://") {
		Ok(Arc::new(FileRangeReader::open(std::path::Path::new(path))?))
	} else {
		Ok(Arc::new(FileRangeReader::open(std::path::Path::new(url))?))
	}
}

/// Rejects reads that leave the resource; shared by all backends.
pub(crate) fn check_bounds(range: &ByteRange, size: u64, name: &str) -> Result<()> {
	if range.fits_in(size) {
		Ok(())
	} else {
		Err(EngineError::Range(format!(
			"{range} is outside '{name}' ({size} bytes)"
		)))
	}
}
