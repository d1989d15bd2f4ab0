use std::fmt::Debug;

use http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use url::Url;

use crate::{
	agent::Agent,
	body::{Body, BodyHolder, BodyState},
	error::{FetchError, FetchErrorKind},
};

/// What to do when a hop answers with a 3xx redirect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RedirectPolicy {
	/// Follow the `Location` chain, up to `follow` hops.
	#[default]
	Follow,
	/// Hand the redirect response back to the caller verbatim.
	Manual,
	/// Fail with a `no-redirect` error.
	Error,
}

/// The options accepted by [`fetch`](crate::fetch) and
/// [`Request::new`]. Every field is optional; unset fields take the
/// documented default (or, when wrapping another Request, its value).
#[derive(Default)]
pub struct RequestInit {
	/// HTTP method; default `GET`.
	pub method: Option<String>,
	/// Outbound headers. When wrapping, this replaces the inherited map
	/// wholesale rather than merging into it.
	pub headers: Option<Vec<(String, String)>>,
	/// Request payload; forbidden for GET and HEAD.
	pub body: Option<Body>,
	/// Redirect policy; default `follow`.
	pub redirect: Option<RedirectPolicy>,
	/// Maximum redirects; default 20.
	pub follow: Option<u32>,
	/// Advertise and transparently decode `gzip,deflate`; default true.
	pub compress: Option<bool>,
	/// Response body byte cap; 0 means unlimited.
	pub size: Option<u64>,
	/// Milliseconds covering connect+headers and, separately, the body
	/// read; 0 means unlimited.
	pub timeout: Option<u64>,
	/// Connection pool to dispatch through.
	pub agent: Option<Agent>,
}

/// An immutable description of a single HTTP exchange attempt.
pub struct Request {
	pub(crate) method: Method,
	pub(crate) url: Url,
	pub(crate) headers: HeaderMap,
	pub(crate) body: BodyState,
	pub(crate) redirect: RedirectPolicy,
	pub(crate) follow: u32,
	pub(crate) counter: u32,
	pub(crate) compress: bool,
	pub(crate) size: u64,
	pub(crate) timeout: u64,
	pub(crate) agent: Option<Agent>,
}

impl Request {
	pub fn new(url: &str, init: RequestInit) -> Result<Self, FetchError> {
		Self::build(parse_url(url)?, None, init)
	}

	/// Wraps another Request, inheriting its URL, method, headers, follow,
	/// counter, compress and body, then applying `init` overrides on top.
	/// The body is transferred by reference: consuming it through either
	/// Request disturbs both.
	pub fn wrap(input: &Request, init: RequestInit) -> Result<Self, FetchError> {
		Self::build(input.url.clone(), Some(input), init)
	}

	fn build(url: Url, input: Option<&Request>, init: RequestInit) -> Result<Self, FetchError> {
		let method = match &init.method {
			Some(m) => parse_method(m)?,
			None => input.map(|r| r.method.clone()).unwrap_or(Method::GET),
		};
		let headers = match &init.headers {
			Some(pairs) => build_headers(pairs)?,
			None => input.map(|r| r.headers.clone()).unwrap_or_default(),
		};
		let body = match init.body {
			Some(body) => BodyState::new(body),
			None => input
				.map(|r| r.body.clone())
				.unwrap_or_else(BodyState::empty),
		};

		if (method == Method::GET || method == Method::HEAD) && !body.is_null() {
			return Err(FetchError::new(
				FetchErrorKind::BodyNotAllowed,
				Some("Request with GET/HEAD method cannot have body"),
			));
		}

		Ok(Self {
			method,
			url,
			headers,
			body,
			redirect: init.redirect.unwrap_or_default(),
			follow: init
				.follow
				.or_else(|| input.map(|r| r.follow))
				.unwrap_or(20),
			counter: input.map(|r| r.counter).unwrap_or(0),
			compress: init
				.compress
				.or_else(|| input.map(|r| r.compress))
				.unwrap_or(true),
			size: init.size.unwrap_or(0),
			timeout: init.timeout.unwrap_or(0),
			agent: init.agent.or_else(|| input.and_then(|r| r.agent.clone())),
		})
	}

	pub fn method(&self) -> &Method {
		&self.method
	}

	pub fn url(&self) -> &str {
		self.url.as_str()
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	pub fn redirect(&self) -> RedirectPolicy {
		self.redirect
	}

	pub fn follow(&self) -> u32 {
		self.follow
	}

	pub fn compress(&self) -> bool {
		self.compress
	}

	pub fn size(&self) -> u64 {
		self.size
	}

	pub fn timeout(&self) -> u64 {
		self.timeout
	}

	/// Creates an independent copy of this Request.
	///
	/// Fails with `already-used` once the body has been consumed. A stream
	/// body is teed so both copies observe every byte.
	pub fn clone(&self) -> Result<Self, FetchError> {
		Ok(Self {
			method: self.method.clone(),
			url: self.url.clone(),
			headers: self.headers.clone(),
			body: self.body.split(self.url.as_str())?,
			redirect: self.redirect,
			follow: self.follow,
			counter: self.counter,
			compress: self.compress,
			size: self.size,
			timeout: self.timeout,
			agent: self.agent.clone(),
		})
	}
}

impl BodyHolder for Request {
	fn body_state(&self) -> &BodyState {
		&self.body
	}

	fn body_url(&self) -> &str {
		self.url.as_str()
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

impl Debug for Request {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Request")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("redirect", &self.redirect)
			.field("body_used", &self.body_used())
			.finish()
	}
}

pub(crate) fn header_content_type(headers: &HeaderMap) -> Option<String> {
	headers
		.get(header::CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.to_ascii_lowercase())
}

fn parse_url(input: &str) -> Result<Url, FetchError> {
	let url = Url::parse(input).map_err(|err| match err {
		url::ParseError::RelativeUrlWithoutBase => FetchError::new(
			FetchErrorKind::RelativeUrl,
			Some("Only absolute URLs are supported"),
		),
		_ => FetchError::new(FetchErrorKind::InvalidUrl, Some(err.to_string())),
	})?;
	if url.scheme() != "http" && url.scheme() != "https" {
		return Err(FetchError::new(
			FetchErrorKind::UnsupportedScheme,
			Some("Only HTTP(S) protocols are supported"),
		));
	}
	Ok(url)
}

fn parse_method(method: &str) -> Result<Method, FetchError> {
	let upper = method.to_ascii_uppercase();
	Method::from_bytes(upper.as_bytes()).map_err(|_| {
		FetchError::new(
			FetchErrorKind::InvalidMethod,
			Some(format!("invalid HTTP method: {method}")),
		)
	})
}

/// Builds a header map from user-shaped pairs, validating names and values.
pub(crate) fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap, FetchError> {
	let mut map = HeaderMap::new();
	for (key, value) in pairs {
		let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
			FetchError::new(
				FetchErrorKind::InvalidHeader,
				Some(format!("invalid header name: {key}")),
			)
		})?;
		let value = HeaderValue::from_str(value).map_err(|_| {
			FetchError::new(
				FetchErrorKind::InvalidHeader,
				Some(format!("invalid header value: {value}")),
			)
		})?;
		map.append(name, value);
	}
	Ok(map)
}
