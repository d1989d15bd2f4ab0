use std::{io::Write, mem};

use async_stream::stream;
use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use futures::StreamExt;
use http::{HeaderMap, Method, StatusCode, header};
use tracing::trace;

use crate::{
	body::ByteStream,
	error::{FetchError, FetchErrorKind},
};

/// Attaches the decompression transform a response body calls for, or
/// passes the raw stream through untouched.
///
/// Decoding is skipped entirely for bodies that cannot carry content
/// (204, 304, HEAD), when the caller opted out of compression, and for
/// codings we do not understand. Size and timeout enforcement happen
/// later, at consumption; nothing is buffered here.
pub(crate) fn decode_body(
	method: &Method,
	status: StatusCode,
	headers: &HeaderMap,
	compress: bool,
	url: &str,
	raw: ByteStream,
) -> ByteStream {
	if !compress
		|| *method == Method::HEAD
		|| status == StatusCode::NO_CONTENT
		|| status == StatusCode::NOT_MODIFIED
	{
		return raw;
	}

	let coding = headers
		.get(header::CONTENT_ENCODING)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.trim().to_ascii_lowercase());

	match coding.as_deref() {
		Some("gzip" | "x-gzip") => {
			trace!(url, "inflating gzip response body");
			inflate(raw, url.to_owned(), Inflater::gzip())
		}
		Some("deflate") => {
			trace!(url, "inflating deflate response body");
			inflate_deflate(raw, url.to_owned())
		}
		_ => raw,
	}
}

enum Inflater {
	Gzip(GzDecoder<Vec<u8>>),
	Zlib(ZlibDecoder<Vec<u8>>),
	Raw(DeflateDecoder<Vec<u8>>),
}

impl Inflater {
	fn gzip() -> Self {
		Self::Gzip(GzDecoder::new(Vec::new()))
	}

	fn zlib() -> Self {
		Self::Zlib(ZlibDecoder::new(Vec::new()))
	}

	fn raw() -> Self {
		Self::Raw(DeflateDecoder::new(Vec::new()))
	}

	fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
		match self {
			Self::Gzip(d) => d.write_all(chunk),
			Self::Zlib(d) => d.write_all(chunk),
			Self::Raw(d) => d.write_all(chunk),
		}
	}

	fn take(&mut self) -> Vec<u8> {
		match self {
			Self::Gzip(d) => mem::take(d.get_mut()),
			Self::Zlib(d) => mem::take(d.get_mut()),
			Self::Raw(d) => mem::take(d.get_mut()),
		}
	}

	fn try_finish(&mut self) -> std::io::Result<()> {
		match self {
			Self::Gzip(d) => d.try_finish(),
			Self::Zlib(d) => d.try_finish(),
			Self::Raw(d) => d.try_finish(),
		}
	}

	/// Gzip responses from servers that mangle the 8-byte trailer still
	/// carry a complete deflate payload; their finish error is swallowed.
	fn tolerant(&self) -> bool {
		matches!(self, Self::Gzip(_))
	}
}

fn data_error(url: &str, err: &std::io::Error) -> FetchError {
	FetchError::with_code(
		FetchErrorKind::System,
		Some(format!("invalid response body at {url} reason: {err}")),
		"Z_DATA_ERROR",
	)
}

fn inflate(mut raw: ByteStream, url: String, mut inflater: Inflater) -> ByteStream {
	Box::pin(stream! {
		while let Some(item) = raw.next().await {
			let chunk = match item {
				Ok(chunk) => chunk,
				Err(err) => {
					yield Err(err);
					return;
				}
			};
			if let Err(err) = inflater.write(&chunk) {
				yield Err(data_error(&url, &err));
				return;
			}
			let out = inflater.take();
			if !out.is_empty() {
				yield Ok(Bytes::from(out));
			}
		}

		let finished = inflater.try_finish();
		let out = inflater.take();
		if !out.is_empty() {
			yield Ok(Bytes::from(out));
		}
		if let Err(err) = finished {
			if !inflater.tolerant() {
				yield Err(data_error(&url, &err));
			}
		}
	})
}

/// Servers disagree on whether `deflate` means a zlib-wrapped stream or a
/// bare one. The first payload byte settles it: zlib's CMF byte carries
/// compression method 8 in its low nibble, which no raw deflate block
/// starts with.
fn inflate_deflate(mut raw: ByteStream, url: String) -> ByteStream {
	Box::pin(stream! {
		let mut first = None;
		while let Some(item) = raw.next().await {
			match item {
				Ok(chunk) if chunk.is_empty() => continue,
				Ok(chunk) => {
					first = Some(chunk);
					break;
				}
				Err(err) => {
					yield Err(err);
					return;
				}
			}
		}
		let Some(first) = first else { return };

		let inflater = if first[0] & 0x0f == 0x08 {
			Inflater::zlib()
		} else {
			Inflater::raw()
		};
		let replayed = futures::stream::iter([Ok(first)]).chain(raw);
		let mut inner = inflate(Box::pin(replayed), url, inflater);
		while let Some(item) = inner.next().await {
			yield item;
		}
	})
}
