use std::fmt::Debug;

use http::{HeaderMap, StatusCode};

use crate::{
	body::{Body, BodyHolder, BodyState, ByteStream},
	error::{FetchError, FetchErrorKind},
	request::{build_headers, header_content_type},
};

/// The response to a [`fetch`](crate::fetch).
pub struct Response {
	pub(crate) url: String,
	pub(crate) status: StatusCode,
	pub(crate) status_text: String,
	pub(crate) headers: HeaderMap,
	pub(crate) body: BodyState,
	pub(crate) redirected: bool,
	pub(crate) size: u64,
	pub(crate) timeout: u64,
}

/// Options for a caller-constructed [`Response`].
#[derive(Default)]
pub struct ResponseInit {
	pub url: Option<String>,
	/// Default 200.
	pub status: Option<u16>,
	/// Default `"OK"`. Never synthesized from the status code.
	pub status_text: Option<String>,
	pub headers: Option<Vec<(String, String)>>,
}

impl Response {
	pub fn new(body: Option<Body>, init: ResponseInit) -> Result<Self, FetchError> {
		let status = init.status.unwrap_or(200);
		let status = StatusCode::from_u16(status).map_err(|_| {
			FetchError::new(
				FetchErrorKind::InvalidStatus,
				Some(format!("invalid status code: {status}")),
			)
		})?;
		let headers = match &init.headers {
			Some(pairs) => build_headers(pairs)?,
			None => HeaderMap::new(),
		};
		Ok(Self {
			url: init.url.unwrap_or_default(),
			status,
			status_text: init.status_text.unwrap_or_else(|| "OK".to_owned()),
			headers,
			body: BodyState::new(body.unwrap_or_default()),
			redirected: false,
			size: 0,
			timeout: 0,
		})
	}

	/// The final URL, after any redirects.
	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn status(&self) -> u16 {
		self.status.as_u16()
	}

	pub fn status_text(&self) -> &str {
		&self.status_text
	}

	/// Whether the status is in the 200-299 range.
	pub fn ok(&self) -> bool {
		self.status.is_success()
	}

	/// Whether at least one redirect was followed to produce this response.
	pub fn redirected(&self) -> bool {
		self.redirected
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Hands out the body as a chunk stream. This disturbs the body: any
	/// later consumption fails with `already-used`.
	pub fn body(&self) -> Result<ByteStream, FetchError> {
		self.body.take_stream(&self.url)
	}

	/// Creates an independent copy of this response.
	///
	/// Fails with `already-used` once the body is disturbed. A stream body
	/// is teed: the original's stream is replaced by one pass-through and
	/// the clone reads from the other, so both observe every byte.
	pub fn clone(&self) -> Result<Self, FetchError> {
		Ok(Self {
			url: self.url.clone(),
			status: self.status,
			status_text: self.status_text.clone(),
			headers: self.headers.clone(),
			body: self.body.split(&self.url)?,
			redirected: self.redirected,
			size: self.size,
			timeout: self.timeout,
		})
	}
}

impl BodyHolder for Response {
	fn body_state(&self) -> &BodyState {
		&self.body
	}

	fn body_url(&self) -> &str {
		&self.url
	}

	fn body_size_limit(&self) -> u64 {
		self.size
	}

	fn body_timeout(&self) -> u64 {
		self.timeout
	}

	fn body_content_type(&self) -> Option<String> {
		header_content_type(&self.headers)
	}
}

impl Debug for Response {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Response")
			.field("url", &self.url)
			.field("status", &self.status)
			.field("redirected", &self.redirected)
			.field("body_used", &self.body_used())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;
	use futures::StreamExt;

	use super::*;

	#[test]
	fn constructor_defaults() {
		let res = Response::new(None, ResponseInit::default()).unwrap();
		assert_eq!(res.status(), 200);
		assert_eq!(res.status_text(), "OK");
		assert_eq!(res.url(), "");
		assert!(res.ok());
		assert!(!res.redirected());
	}

	#[test]
	fn ok_tracks_status_range() {
		for (status, ok) in [(199, false), (200, true), (299, true), (300, false)] {
			let res = Response::new(
				None,
				ResponseInit {
					status: Some(status),
					..Default::default()
				},
			)
			.unwrap();
			assert_eq!(res.ok(), ok, "status {status}");
		}
	}

	#[test]
	fn out_of_range_status_is_rejected() {
		let err = Response::new(
			None,
			ResponseInit {
				status: Some(99),
				..Default::default()
			},
		)
		.unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::InvalidStatus);
	}

	#[test]
	fn status_text_is_caller_supplied() {
		let res = Response::new(
			None,
			ResponseInit {
				status: Some(404),
				..Default::default()
			},
		)
		.unwrap();
		// not synthesized from the code
		assert_eq!(res.status_text(), "OK");
	}

	#[tokio::test]
	async fn body_accessor_disturbs() {
		let res = Response::new(Some(Body::text("hello")), ResponseInit::default()).unwrap();
		let mut stream = res.body().unwrap();
		let chunk = stream.next().await.unwrap().unwrap();
		assert_eq!(chunk, Bytes::from_static(b"hello"));
		assert!(res.body_used());
		assert_eq!(
			res.text().await.unwrap_err().kind(),
			FetchErrorKind::AlreadyUsed
		);
	}

	#[tokio::test]
	async fn clone_fails_once_disturbed() {
		let res = Response::new(Some(Body::text("x")), ResponseInit::default()).unwrap();
		res.text().await.unwrap();
		assert_eq!(res.clone().unwrap_err().kind(), FetchErrorKind::AlreadyUsed);
	}

	#[tokio::test]
	async fn blob_carries_lowercased_content_type() {
		let res = Response::new(
			Some(Body::text("x")),
			ResponseInit {
				headers: Some(vec![("Content-Type".into(), "Text/HTML".into())]),
				..Default::default()
			},
		)
		.unwrap();
		let blob = res.blob().await.unwrap();
		assert_eq!(blob.media_type(), "text/html");
	}
}
