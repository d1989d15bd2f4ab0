use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use http_body_util::BodyStream;
use hyper::body::Incoming;
use tracing::debug;
use url::Url;

use crate::{
	agent::Agent,
	body::{BodyState, ByteStream},
	decode::decode_body,
	error::{FetchError, FetchErrorKind, system_code},
	request::{RedirectPolicy, Request, RequestInit},
	response::Response,
};

/// Fetches `url`, following redirects and transparently decoding the
/// response body per `init`.
///
/// The returned [`Response`] resolves as soon as headers are in; the body
/// is a lazy stream consumed through the [`BodyHolder`](crate::BodyHolder)
/// methods, which is where the `size` cap and the body half of `timeout`
/// are enforced.
pub async fn fetch(url: impl AsRef<str>, init: RequestInit) -> Result<Response, FetchError> {
	fetch_request(Request::new(url.as_ref(), init)?).await
}

/// [`fetch`] for an already-constructed [`Request`].
pub async fn fetch_request(request: Request) -> Result<Response, FetchError> {
	let agent = request.agent.clone().unwrap_or_else(Agent::shared);
	let mut request = request;
	let mut redirected = false;

	loop {
		let hop = send_hop(&agent, &request).await?;

		if is_redirect(hop.status) {
			match request.redirect {
				RedirectPolicy::Error => {
					return Err(FetchError::new(
						FetchErrorKind::NoRedirect,
						Some(format!(
							"uri requested responds with a redirect, redirect mode is set to error: {}",
							request.url
						)),
					));
				}
				RedirectPolicy::Follow => {
					request = next_hop(request, hop.status, &hop.headers)?;
					redirected = true;
					continue;
				}
				// handed back verbatim, Location untouched even if absent
				RedirectPolicy::Manual => {}
			}
		}

		let decoded = decode_body(
			&request.method,
			hop.status,
			&hop.headers,
			request.compress,
			request.url.as_str(),
			hop.body,
		);
		return Ok(Response {
			url: request.url.to_string(),
			status: hop.status,
			// the platform stack exposes no wire reason phrase
			status_text: String::new(),
			headers: hop.headers,
			body: BodyState::from_stream(decoded),
			redirected,
			size: request.size,
			timeout: request.timeout,
		});
	}
}

struct Hop {
	status: StatusCode,
	headers: HeaderMap,
	body: ByteStream,
}

/// One exchange with the platform stack: compose headers, dispatch, wait
/// for headers under the request timeout.
async fn send_hop(agent: &Agent, request: &Request) -> Result<Hop, FetchError> {
	let (inferred_type, total_bytes, outbound) = request.body.outbound().await;
	let headers = guard_headers(request, agent, inferred_type, total_bytes);

	let uri: Uri = request.url.as_str().parse().map_err(|_| {
		FetchError::new(
			FetchErrorKind::InvalidUrl,
			Some(format!("invalid URL: {}", request.url)),
		)
	})?;
	let mut outgoing = http::Request::builder()
		.method(request.method.clone())
		.uri(uri)
		.body(outbound)
		.map_err(|err| FetchError::new(FetchErrorKind::System, Some(err.to_string())))?;
	*outgoing.headers_mut() = headers;

	debug!(method = %request.method, url = %request.url, hop = request.counter, "dispatching");

	let send = agent.client.request(outgoing);
	let result = if request.timeout > 0 {
		match tokio::time::timeout(Duration::from_millis(request.timeout), send).await {
			Ok(result) => result,
			Err(_) => {
				return Err(FetchError::new(
					FetchErrorKind::RequestTimeout,
					Some(format!("network timeout at: {}", request.url)),
				));
			}
		}
	} else {
		send.await
	};

	let response = result.map_err(|err| {
		let message = format!("request to {} failed, reason: {err}", request.url);
		match system_code(&err) {
			Some(code) => FetchError::with_code(FetchErrorKind::System, Some(message), code),
			None => FetchError::new(FetchErrorKind::System, Some(message)),
		}
	})?;

	let (parts, incoming) = response.into_parts();
	Ok(Hop {
		status: parts.status,
		headers: parts.headers,
		body: incoming_stream(incoming, request.url.to_string()),
	})
}

/// Adapts the platform stack's frame stream into the body chunk stream,
/// dropping trailer frames and wrapping transport errors.
fn incoming_stream(incoming: Incoming, url: String) -> ByteStream {
	Box::pin(stream! {
		let mut frames = BodyStream::new(incoming);
		while let Some(frame) = frames.next().await {
			match frame {
				Ok(frame) => {
					if let Ok(data) = frame.into_data() {
						yield Ok(data);
					}
				}
				Err(err) => {
					let message = format!("error reading response body at {url} reason: {err}");
					yield Err(match system_code(&err) {
						Some(code) => FetchError::with_code(
							FetchErrorKind::System,
							Some(message),
							code,
						),
						None => FetchError::new(FetchErrorKind::System, Some(message)),
					});
					return;
				}
			}
		}
	})
}

/// Normalizes outbound headers before dispatch: fill in `Accept`,
/// `User-Agent` and `Accept-Encoding` defaults, the body's inferred
/// `Content-Type`, and the computed `Content-Length` (which overrides
/// whatever the caller set). Unknown-length bodies carry no
/// `Content-Length` and go out chunked.
fn guard_headers(
	request: &Request,
	agent: &Agent,
	inferred_type: Option<String>,
	total_bytes: Option<u64>,
) -> HeaderMap {
	let mut headers = request.headers.clone();

	if !headers.contains_key(header::ACCEPT) {
		headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
	}
	if !headers.contains_key(header::USER_AGENT) {
		let agent_value = HeaderValue::from_str(&agent.user_agent)
			.unwrap_or_else(|_| HeaderValue::from_static(crate::agent::USER_AGENT));
		headers.insert(header::USER_AGENT, agent_value);
	}
	if request.compress && !headers.contains_key(header::ACCEPT_ENCODING) {
		headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip,deflate"));
	}
	if let Some(content_type) = inferred_type {
		if !headers.contains_key(header::CONTENT_TYPE) {
			if let Ok(value) = HeaderValue::from_str(&content_type) {
				headers.insert(header::CONTENT_TYPE, value);
			}
		}
	}
	match total_bytes {
		Some(total) => {
			headers.insert(header::CONTENT_LENGTH, HeaderValue::from(total));
		}
		None => {
			headers.remove(header::CONTENT_LENGTH);
		}
	}

	headers
}

fn is_redirect(status: StatusCode) -> bool {
	matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Builds the next Request in the chain from a redirect response,
/// applying the method-rewrite and Authorization-stripping rules.
fn next_hop(request: Request, status: StatusCode, headers: &HeaderMap) -> Result<Request, FetchError> {
	let counter = request.counter + 1;
	if counter > request.follow {
		return Err(FetchError::new(
			FetchErrorKind::MaxRedirect,
			Some(format!("maximum redirect reached at: {}", request.url)),
		));
	}

	let location = headers
		.get(header::LOCATION)
		.and_then(|value| value.to_str().ok());
	let Some(location) = location else {
		return Err(FetchError::new(
			FetchErrorKind::InvalidRedirect,
			Some(format!("redirect location header missing at: {}", request.url)),
		));
	};
	let next_url = parse_location(&request.url, location)?;

	let mut next_headers = request.headers.clone();
	// credentials don't travel across hosts (hostname compare, ports ignored)
	if next_url.host_str() != request.url.host_str() {
		next_headers.remove(header::AUTHORIZATION);
	}

	let mut next_method = request.method.clone();
	let mut next_body = request.body.clone();
	let rewrite = (status == StatusCode::SEE_OTHER
		&& next_method != Method::GET
		&& next_method != Method::HEAD)
		|| ((status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
			&& next_method == Method::POST);
	if rewrite {
		next_method = Method::GET;
		next_body = BodyState::empty();
		next_headers.remove(header::CONTENT_LENGTH);
		next_headers.remove(header::CONTENT_TYPE);
	}

	debug!(from = %request.url, to = %next_url, status = status.as_u16(), "following redirect");

	Ok(Request {
		method: next_method,
		url: next_url,
		headers: next_headers,
		body: next_body,
		counter,
		..request
	})
}

fn parse_location(base: &Url, location: &str) -> Result<Url, FetchError> {
	let invalid = || {
		FetchError::new(
			FetchErrorKind::InvalidRedirect,
			Some(format!(
				"uri requested responds with an invalid redirect URL: {location}"
			)),
		)
	};
	let next = base.join(location).map_err(|_| invalid())?;
	if next.scheme() != "http" && next.scheme() != "https" {
		return Err(invalid());
	}
	Ok(next)
}
