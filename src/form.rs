use std::{
	collections::hash_map::RandomState,
	hash::{BuildHasher, Hasher},
	sync::atomic::{AtomicU64, Ordering},
};

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::{body::ByteStream, error::io_to_fetch};

/// The two capabilities a multipart body must expose: a boundary for the
/// `Content-Type` header, and (optionally) an up-front byte length. The form
/// itself is pipeable; serializing it consumes it.
pub trait Multipart: Send {
	fn boundary(&self) -> &str;

	/// `Some(total)` only when every part's length is knowable without
	/// reading it. Forms with unknown length are sent chunked.
	fn known_length(&self) -> Option<u64>;

	fn into_stream(self: Box<Self>) -> ByteStream;
}

/// A `multipart/form-data` payload builder.
///
/// Parts are framed per RFC 2046 with CRLF line breaks, the way browser
/// form submissions and the common multipart emitters lay them out.
pub struct Form {
	boundary: String,
	parts: Vec<Part>,
}

struct Part {
	name: String,
	filename: Option<String>,
	content_type: Option<String>,
	value: PartValue,
}

enum PartValue {
	Text(String),
	Bytes(Bytes),
	Stream {
		stream: ByteStream,
		length: Option<u64>,
	},
}

static BOUNDARY_SEQ: AtomicU64 = AtomicU64::new(0);

fn make_boundary() -> String {
	// process-seeded, collision-free within the process
	let mut hasher = RandomState::new().build_hasher();
	hasher.write_u64(BOUNDARY_SEQ.fetch_add(1, Ordering::Relaxed));
	format!("--------------------------{:016x}", hasher.finish())
}

impl Form {
	pub fn new() -> Self {
		Self {
			boundary: make_boundary(),
			parts: Vec::new(),
		}
	}

	pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.parts.push(Part {
			name: name.into(),
			filename: None,
			content_type: None,
			value: PartValue::Text(value.into()),
		});
		self
	}

	pub fn bytes(
		mut self,
		name: impl Into<String>,
		filename: Option<&str>,
		content: impl Into<Bytes>,
	) -> Self {
		self.parts.push(Part {
			name: name.into(),
			filename: filename.map(str::to_owned),
			content_type: filename.map(|_| "application/octet-stream".to_owned()),
			value: PartValue::Bytes(content.into()),
		});
		self
	}

	/// A part fed from a byte stream. Pass `length` when the producer knows
	/// it; a `None` length makes the whole form's length unknown.
	pub fn stream<S>(
		mut self,
		name: impl Into<String>,
		filename: Option<&str>,
		length: Option<u64>,
		stream: S,
	) -> Self
	where
		S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
	{
		let stream: ByteStream = Box::pin(stream.map(|item| item.map_err(io_to_fetch)));
		self.parts.push(Part {
			name: name.into(),
			filename: filename.map(str::to_owned),
			content_type: Some("application/octet-stream".to_owned()),
			value: PartValue::Stream { stream, length },
		});
		self
	}

	/// Overrides the `Content-Type` of the most recently added part.
	pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
		if let Some(part) = self.parts.last_mut() {
			part.content_type = Some(content_type.into());
		}
		self
	}
}

impl Default for Form {
	fn default() -> Self {
		Self::new()
	}
}

fn part_header(boundary: &str, part: &Part) -> String {
	let mut header = format!(
		"--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"",
		part.name
	);
	if let Some(filename) = &part.filename {
		header.push_str(&format!("; filename=\"{filename}\""));
	}
	header.push_str("\r\n");
	if let Some(content_type) = &part.content_type {
		header.push_str(&format!("Content-Type: {content_type}\r\n"));
	}
	header.push_str("\r\n");
	header
}

impl Multipart for Form {
	fn boundary(&self) -> &str {
		&self.boundary
	}

	fn known_length(&self) -> Option<u64> {
		let mut total = 0u64;
		for part in &self.parts {
			total += part_header(&self.boundary, part).len() as u64;
			total += match &part.value {
				PartValue::Text(s) => s.len() as u64,
				PartValue::Bytes(b) => b.len() as u64,
				PartValue::Stream { length, .. } => (*length)?,
			};
			total += 2; // trailing CRLF
		}
		total += self.boundary.len() as u64 + 6; // --boundary--CRLF
		Some(total)
	}

	fn into_stream(self: Box<Self>) -> ByteStream {
		let Form { boundary, parts } = *self;
		Box::pin(stream! {
			for part in parts {
				yield Ok(Bytes::from(part_header(&boundary, &part)));
				match part.value {
					PartValue::Text(s) => yield Ok(Bytes::from(s)),
					PartValue::Bytes(b) => yield Ok(b),
					PartValue::Stream { mut stream, .. } => {
						while let Some(item) = stream.next().await {
							yield item;
						}
					}
				}
				yield Ok(Bytes::from_static(b"\r\n"));
			}
			yield Ok(Bytes::from(format!("--{boundary}--\r\n")));
		})
	}
}
