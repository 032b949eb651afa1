//! HTTP(S) byte-range backend.
//!
//! Issues `Range: bytes=a-b` requests with `Accept-Encoding: identity`
//! (the container stream must not be re-encoded in transit), validates
//! the `206 Partial Content` response against its `Content-Range`
//! header, and retries transient failures with exponential backoff.

use super::{RangeReader, check_bounds};
use crate::{ByteRange, EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use reqwest::{Client, StatusCode, Url, header};
use std::time::Duration;

lazy_static! {
	static ref RE_CONTENT_RANGE: Regex = RegexBuilder::new(r"^bytes (\d+)-(\d+)/(\d+|\*)$")
		.case_insensitive(true)
		.build()
		.unwrap();
}

/// Transport tuning for one HTTP source.
#[derive(Debug, Clone)]
pub struct HttpOptions {
	/// Deadline for a single request, connect included.
	pub timeout: Duration,
	/// Total attempts per read, first try included.
	pub attempts: u32,
	/// Backoff before the first retry; doubles per attempt.
	pub backoff_base: Duration,
}

impl Default for HttpOptions {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(30),
			attempts: 3,
			backoff_base: Duration::from_millis(200),
		}
	}
}

/// A remote file behind an HTTP(S) URL supporting range requests.
#[derive(Debug)]
pub struct HttpRangeReader {
	client: Client,
	url: Url,
	name: String,
	size: u64,
	options: HttpOptions,
}

impl HttpRangeReader {
	/// Connects to `url` and determines the resource size.
	///
	/// # Errors
	/// `Io` if the URL is invalid or the server is unreachable; `Range`
	/// if the server advertises no usable size.
	pub async fn open(url: &str, options: HttpOptions) -> Result<HttpRangeReader> {
		let url = Url::parse(url).map_err(|e| EngineError::Io(format!("invalid url '{url}': {e}")))?;
		match url.scheme() {
			"http" | "https" => (),
			other => return Err(EngineError::Io(format!("unsupported scheme '{other}' in '{url}'"))),
		}

		let client = Client::builder()
			.tcp_keepalive(Duration::from_secs(600))
			.timeout(options.timeout)
			.build()?;

		let reader = HttpRangeReader {
			name: url.to_string(),
			client,
			url,
			size: 0,
			options,
		};
		let size = reader.probe_size().await?;
		log::debug!("opened '{}' ({size} bytes)", reader.name);

		Ok(HttpRangeReader { size, ..reader })
	}

	/// Asks for the first byte and takes the total from `Content-Range`.
	///
	/// A plain GET would fetch the whole product; a HEAD is not enough
	/// because some object stores omit `Content-Length` on it.
	async fn probe_size(&self) -> Result<u64> {
		let response = self
			.client
			.get(self.url.clone())
			.header(header::RANGE, "bytes=0-0")
			.header(header::ACCEPT_ENCODING, "identity")
			.send()
			.await?;

		match response.status() {
			StatusCode::PARTIAL_CONTENT => {
				let (_, _, total) = parse_content_range(&response)?;
				total.ok_or_else(|| EngineError::Range(format!("'{}' reports no total size", self.name)))
			}
			StatusCode::OK => {
				// Server ignores ranges; still usable if it tells us the size.
				response
					.content_length()
					.ok_or_else(|| EngineError::Range(format!("'{}' ignores range requests", self.name)))
			}
			status => Err(EngineError::Io(format!("'{}' returned {status}", self.name))),
		}
	}

	async fn fetch_once(&self, range: &ByteRange) -> Result<Bytes> {
		let response = self
			.client
			.get(self.url.clone())
			.header(header::RANGE, format!("bytes={}-{}", range.offset, range.end() - 1))
			.header(header::ACCEPT_ENCODING, "identity")
			.send()
			.await?;

		match response.status() {
			StatusCode::PARTIAL_CONTENT => {
				let (start, end, _) = parse_content_range(&response)?;
				if start != range.offset || end + 1 != range.end() {
					return Err(EngineError::Range(format!(
						"'{}' answered bytes {start}..{} instead of {range}",
						self.name,
						end + 1
					)));
				}
				let bytes = response.bytes().await?;
				if bytes.len() as u64 != range.length {
					return Err(EngineError::Range(format!(
						"'{}' sent {} bytes for {range}",
						self.name,
						bytes.len()
					)));
				}
				Ok(bytes)
			}
			StatusCode::OK => {
				// The server ignored the range header. Tolerated only when
				// the request happened to cover the whole resource.
				let bytes = response.bytes().await?;
				if range.offset == 0 && bytes.len() as u64 == range.length {
					Ok(bytes)
				} else {
					Err(EngineError::Range(format!(
						"'{}' ignored the range header and sent {} bytes for {range}",
						self.name,
						bytes.len()
					)))
				}
			}
			StatusCode::RANGE_NOT_SATISFIABLE => Err(EngineError::Range(format!(
				"'{}' rejected {range} as past the end of the file",
				self.name
			))),
			status if status.is_server_error() => {
				Err(EngineError::Io(format!("'{}' returned {status} for {range}", self.name)))
			}
			status => Err(EngineError::Range(format!(
				"'{}' returned {status} for {range}",
				self.name
			))),
		}
	}
}

#[async_trait]
impl RangeReader for HttpRangeReader {
	async fn read_range(&self, range: &ByteRange) -> Result<Bytes> {
		check_bounds(range, self.size, &self.name)?;

		let mut backoff = self.options.backoff_base;
		let mut attempt = 1;
		loop {
			match self.fetch_once(range).await {
				Ok(bytes) => return Ok(bytes),
				Err(err) if err.is_transient() && attempt < self.options.attempts => {
					log::warn!(
						"retrying {range} on '{}' after {err} (attempt {attempt}/{})",
						self.name,
						self.options.attempts
					);
					tokio::time::sleep(backoff).await;
					backoff *= 2;
					attempt += 1;
				}
				Err(err) => return Err(err),
			}
		}
	}

	fn size(&self) -> u64 {
		self.size
	}

	fn name(&self) -> &str {
		&self.name
	}
}

/// Extracts `(first_byte, last_byte, total)` from a `Content-Range`
/// header; total is `None` for `bytes a-b/*`.
fn parse_content_range(response: &reqwest::Response) -> Result<(u64, u64, Option<u64>)> {
	let header_value = response
		.headers()
		.get(header::CONTENT_RANGE)
		.ok_or_else(|| EngineError::Range("206 response without content-range header".to_string()))?
		.to_str()
		.map_err(|e| EngineError::Range(format!("unreadable content-range header: {e}")))?;

	let caps = RE_CONTENT_RANGE
		.captures(header_value)
		.ok_or_else(|| EngineError::Range(format!("invalid content-range header '{header_value}'")))?;

	let parse = |s: &str| {
		s.parse::<u64>()
			.map_err(|e| EngineError::Range(format!("invalid content-range header '{header_value}': {e}")))
	};
	let total = match &caps[3] {
		"*" => None,
		digits => Some(parse(digits)?),
	};
	Ok((parse(&caps[1])?, parse(&caps[2])?, total))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn content_range_regex() {
		assert!(RE_CONTENT_RANGE.is_match("bytes 0-0/1995425000"));
		assert!(RE_CONTENT_RANGE.is_match("Bytes 12-64/*"));
		assert!(!RE_CONTENT_RANGE.is_match("bytes 12-64"));
		assert!(!RE_CONTENT_RANGE.is_match("items 0-1/2"));
	}

	#[tokio::test]
	async fn rejects_unsupported_scheme() {
		let result = HttpRangeReader::open("ftp://example.com/x.h5", HttpOptions::default()).await;
		assert!(matches!(result, Err(EngineError::Io(_))));
	}

	#[test]
	fn default_options_match_contract() {
		let options = HttpOptions::default();
		assert_eq!(options.attempts, 3);
		assert_eq!(options.backoff_base, Duration::from_millis(200));
		assert_eq!(options.timeout, Duration::from_secs(30));
	}
}
