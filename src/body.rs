use std::{
	fmt::Debug,
	mem::replace,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use http_body_util::{BodyExt, Empty, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::body::Frame;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
	blob::Blob,
	error::{FetchError, FetchErrorKind, io_to_fetch},
	form::Multipart,
};

/// The chunk stream flowing through response decoding and body consumption.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// The body handed to the platform HTTP stack.
pub(crate) type OutboundBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// A request or response payload.
///
/// `none`/`text`/`bytes`/`blob` bodies are replayable: they can be written
/// to the wire any number of times (redirect resends included). `stream`
/// and `form` bodies serialize exactly once.
#[derive(Default)]
pub struct Body(pub(crate) BodyKind);

pub(crate) enum BodyKind {
	None,
	Text(String),
	Bytes(Bytes),
	Blob(Blob),
	Stream(ByteStream),
	Form(Box<dyn Multipart>),
	/// A one-shot body that has already been handed off.
	Taken,
}

impl Default for BodyKind {
	fn default() -> Self {
		Self::None
	}
}

impl Body {
	pub fn none() -> Self {
		Self(BodyKind::None)
	}

	pub fn text(value: impl Into<String>) -> Self {
		Self(BodyKind::Text(value.into()))
	}

	pub fn bytes(value: impl Into<Bytes>) -> Self {
		Self(BodyKind::Bytes(value.into()))
	}

	pub fn blob(blob: Blob) -> Self {
		Self(BodyKind::Blob(blob))
	}

	pub fn stream<S>(stream: S) -> Self
	where
		S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
	{
		Self(BodyKind::Stream(Box::pin(
			stream.map(|item| item.map_err(io_to_fetch)),
		)))
	}

	pub fn form(form: impl Multipart + 'static) -> Self {
		Self(BodyKind::Form(Box::new(form)))
	}
}

impl From<&str> for Body {
	fn from(value: &str) -> Self {
		Self::text(value)
	}
}

impl From<String> for Body {
	fn from(value: String) -> Self {
		Self::text(value)
	}
}

impl From<Vec<u8>> for Body {
	fn from(value: Vec<u8>) -> Self {
		Self::bytes(value)
	}
}

impl From<Bytes> for Body {
	fn from(value: Bytes) -> Self {
		Self::bytes(value)
	}
}

impl From<Blob> for Body {
	fn from(value: Blob) -> Self {
		Self::blob(value)
	}
}

impl From<crate::form::Form> for Body {
	fn from(value: crate::form::Form) -> Self {
		Self::form(value)
	}
}

impl Debug for BodyKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::None => write!(f, "None"),
			Self::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
			Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
			Self::Blob(b) => f.debug_tuple("Blob").field(&b.size()).finish(),
			Self::Stream(_) => write!(f, "Stream"),
			Self::Form(form) => f.debug_tuple("Form").field(&form.boundary()).finish(),
			Self::Taken => write!(f, "Taken"),
		}
	}
}

impl BodyKind {
	/// The `Content-Type` this body implies, used only when the caller did
	/// not set one.
	pub(crate) fn content_type(&self) -> Option<String> {
		match self {
			Self::Text(_) => Some("text/plain;charset=UTF-8".to_owned()),
			Self::Blob(blob) if !blob.media_type().is_empty() => {
				Some(blob.media_type().to_owned())
			}
			Self::Form(form) => Some(format!(
				"multipart/form-data;boundary={}",
				form.boundary()
			)),
			_ => None,
		}
	}

	/// The byte length this body implies, or `None` when there is nothing
	/// to measure (null, already handed off) or it can only be discovered
	/// by reading (streams, unsized forms). `None` means no
	/// `Content-Length` goes out.
	pub(crate) fn total_bytes(&self) -> Option<u64> {
		match self {
			Self::None | Self::Taken => None,
			Self::Text(s) => Some(s.len() as u64),
			Self::Bytes(b) => Some(b.len() as u64),
			Self::Blob(b) => Some(b.size()),
			Self::Form(form) => form.known_length(),
			Self::Stream(_) => None,
		}
	}
}

/// The per-holder body slot plus the one-way `disturbed` flag.
///
/// Cloning a `BodyState` shares both: that is the transfer-by-reference
/// semantics used when one Request wraps another (`bodyUsed` propagates).
/// [`BodyState::split`] is the clone-with-fresh-flag path.
#[derive(Debug, Clone)]
pub struct BodyState {
	body: Arc<Mutex<BodyKind>>,
	disturbed: Arc<AtomicBool>,
}

impl BodyState {
	pub(crate) fn new(body: Body) -> Self {
		Self {
			body: Arc::new(Mutex::new(body.0)),
			disturbed: Arc::new(AtomicBool::new(false)),
		}
	}

	pub(crate) fn empty() -> Self {
		Self::new(Body::none())
	}

	pub(crate) fn disturbed(&self) -> bool {
		self.disturbed.load(Ordering::SeqCst)
	}

	/// Synchronous null check used by Request construction (GET/HEAD may
	/// not carry a body). A locked slot is mid-consumption, so not null.
	pub(crate) fn is_null(&self) -> bool {
		self.body
			.try_lock()
			.map(|guard| matches!(&*guard, BodyKind::None))
			.unwrap_or(false)
	}

	/// Internal constructor for an already-decoded response stream.
	pub(crate) fn from_stream(stream: ByteStream) -> Self {
		Self::new(Body(BodyKind::Stream(stream)))
	}

	/// One-shot materialization: the first caller wins, every later caller
	/// gets `already-used`.
	pub(crate) async fn consume(
		&self,
		url: &str,
		size: u64,
		timeout_ms: u64,
	) -> Result<Bytes, FetchError> {
		if self.disturbed.swap(true, Ordering::SeqCst) {
			return Err(FetchError::already_used(url));
		}

		let mut guard = self.body.lock().await;
		let taken = match &mut *guard {
			BodyKind::None | BodyKind::Taken => return Ok(Bytes::new()),
			BodyKind::Text(s) => return Ok(Bytes::from(s.clone())),
			BodyKind::Bytes(b) => return Ok(b.clone()),
			BodyKind::Blob(b) => return Ok(b.bytes().clone()),
			one_shot => replace(one_shot, BodyKind::Taken),
		};
		drop(guard); // release before suspending on the stream

		let stream = match taken {
			BodyKind::Stream(stream) => stream,
			BodyKind::Form(form) => form.into_stream(),
			_ => unreachable!(),
		};
		accumulate(stream, url, size, timeout_ms).await
	}

	/// Converts the body for the outbound wire, returning the implied
	/// content type and length alongside. Replayable bodies stay in place;
	/// one-shot bodies are taken and marked disturbed.
	pub(crate) async fn outbound(&self) -> (Option<String>, Option<u64>, OutboundBody) {
		let mut guard = self.body.lock().await;
		let content_type = guard.content_type();
		let total = guard.total_bytes();
		let outbound = match &mut *guard {
			BodyKind::None | BodyKind::Taken => empty_outbound(),
			BodyKind::Text(s) => full_outbound(Bytes::from(s.clone())),
			BodyKind::Bytes(b) => full_outbound(b.clone()),
			BodyKind::Blob(b) => full_outbound(b.bytes().clone()),
			one_shot => {
				self.disturbed.store(true, Ordering::SeqCst);
				let stream = match replace(one_shot, BodyKind::Taken) {
					BodyKind::Stream(stream) => stream,
					BodyKind::Form(form) => form.into_stream(),
					_ => unreachable!(),
				};
				stream_outbound(stream)
			}
		};
		(content_type, total, outbound)
	}

	/// Hands the body out as a chunk stream (the `response.body` accessor).
	pub(crate) fn take_stream(&self, url: &str) -> Result<ByteStream, FetchError> {
		if self.disturbed.swap(true, Ordering::SeqCst) {
			return Err(FetchError::already_used(url));
		}
		let mut guard = self
			.body
			.try_lock()
			.map_err(|_| FetchError::already_used(url))?;
		Ok(match &mut *guard {
			BodyKind::None | BodyKind::Taken => Box::pin(stream::empty()),
			BodyKind::Text(s) => single_chunk(Bytes::from(s.clone())),
			BodyKind::Bytes(b) => single_chunk(b.clone()),
			BodyKind::Blob(b) => single_chunk(b.bytes().clone()),
			one_shot => match replace(one_shot, BodyKind::Taken) {
				BodyKind::Stream(stream) => stream,
				BodyKind::Form(form) => form.into_stream(),
				_ => unreachable!(),
			},
		})
	}

	/// The clone path. Replayable (and form) bodies are shared by
	/// reference under a fresh `disturbed` flag; a stream body is torn
	/// into two pass-throughs so both holders see every byte, with the
	/// original holder's slot replaced by the first.
	pub(crate) fn split(&self, url: &str) -> Result<Self, FetchError> {
		if self.disturbed.load(Ordering::SeqCst) {
			return Err(FetchError::already_used(url));
		}
		let mut guard = self
			.body
			.try_lock()
			.map_err(|_| FetchError::already_used(url))?;

		if matches!(&*guard, BodyKind::Stream(_)) {
			let BodyKind::Stream(upstream) = replace(&mut *guard, BodyKind::Taken) else {
				unreachable!()
			};
			let (left, right) = tee(upstream);
			*guard = BodyKind::Stream(left);
			Ok(Self {
				body: Arc::new(Mutex::new(BodyKind::Stream(right))),
				disturbed: Arc::new(AtomicBool::new(false)),
			})
		} else {
			Ok(Self {
				body: Arc::clone(&self.body),
				disturbed: Arc::new(AtomicBool::new(false)),
			})
		}
	}
}

/// Duplicates a stream: a pump task forwards every chunk to both halves.
/// Channels are unbounded so one slow half never stalls the other.
fn tee(mut upstream: ByteStream) -> (ByteStream, ByteStream) {
	let (tx_a, rx_a) = mpsc::unbounded_channel();
	let (tx_b, rx_b) = mpsc::unbounded_channel();
	tokio::spawn(async move {
		while let Some(item) = upstream.next().await {
			let mirror = item.clone();
			let a = tx_a.send(item).is_ok();
			let b = tx_b.send(mirror).is_ok();
			if !a && !b {
				break;
			}
		}
	});
	(
		Box::pin(UnboundedReceiverStream::new(rx_a)),
		Box::pin(UnboundedReceiverStream::new(rx_b)),
	)
}

fn single_chunk(bytes: Bytes) -> ByteStream {
	Box::pin(stream::iter([Ok(bytes)]))
}

fn empty_outbound() -> OutboundBody {
	Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

fn full_outbound(bytes: Bytes) -> OutboundBody {
	Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

fn stream_outbound(stream: ByteStream) -> OutboundBody {
	BodyExt::boxed_unsync(StreamBody::new(
		stream.map(|item| item.map(Frame::data).map_err(std::io::Error::other)),
	))
}

async fn accumulate(
	mut stream: ByteStream,
	url: &str,
	size: u64,
	timeout_ms: u64,
) -> Result<Bytes, FetchError> {
	let gather = async {
		let mut chunks: Vec<Bytes> = Vec::new();
		let mut total: u64 = 0;
		while let Some(item) = stream.next().await {
			let chunk = item?;
			// checked before appending: a single oversized chunk is rejected too
			if size > 0 && total + chunk.len() as u64 > size {
				return Err(FetchError::new(
					FetchErrorKind::MaxSize,
					Some(format!("content size at {url} over limit: {size}")),
				));
			}
			total += chunk.len() as u64;
			chunks.push(chunk);
		}
		Ok(concat(chunks, total as usize))
	};

	if timeout_ms > 0 {
		match tokio::time::timeout(Duration::from_millis(timeout_ms), gather).await {
			Ok(result) => result,
			Err(_) => Err(FetchError::new(
				FetchErrorKind::BodyTimeout,
				Some(format!(
					"response timeout while trying to fetch {url} (over {timeout_ms}ms)"
				)),
			)),
		}
	} else {
		gather.await
	}
}

fn concat(chunks: Vec<Bytes>, total: usize) -> Bytes {
	if chunks.len() == 1 {
		return chunks.into_iter().next().unwrap_or_default();
	}
	let mut bytes = Vec::with_capacity(total);
	for chunk in &chunks {
		bytes.extend_from_slice(chunk);
	}
	bytes.into()
}

/// The consumption surface shared by [`Request`](crate::Request) and
/// [`Response`](crate::Response).
///
/// All five consumers route through one materialization of the body; the
/// first wins and every later call fails with `already-used`.
#[allow(async_fn_in_trait)]
pub trait BodyHolder {
	#[doc(hidden)]
	fn body_state(&self) -> &BodyState;
	#[doc(hidden)]
	fn body_url(&self) -> &str;
	#[doc(hidden)]
	fn body_size_limit(&self) -> u64;
	#[doc(hidden)]
	fn body_timeout(&self) -> u64;
	#[doc(hidden)]
	fn body_content_type(&self) -> Option<String>;

	/// Whether the body has been read yet.
	fn body_used(&self) -> bool {
		self.body_state().disturbed()
	}

	/// The full body bytes. Non-standard escape hatch; zero-copy when the
	/// body is already a contiguous buffer.
	async fn buffer(&self) -> Result<Bytes, FetchError> {
		self.body_state()
			.consume(self.body_url(), self.body_size_limit(), self.body_timeout())
			.await
	}

	/// The full body as an owned byte vector.
	async fn array_buffer(&self) -> Result<Vec<u8>, FetchError> {
		Ok(self.buffer().await?.to_vec())
	}

	/// The body decoded as UTF-8. No other encoding is honored, whatever
	/// `charset` the headers advertise.
	async fn text(&self) -> Result<String, FetchError> {
		let bytes = self.buffer().await?;
		Ok(String::from_utf8_lossy(&bytes).into_owned())
	}

	/// The body parsed as JSON.
	async fn json(&self) -> Result<serde_json::Value, FetchError> {
		let url = self.body_url().to_owned();
		let bytes = self.buffer().await?;
		serde_json::from_slice(&bytes).map_err(|err| {
			FetchError::new(
				FetchErrorKind::InvalidJson,
				Some(format!("invalid json response body at {url} reason: {err}")),
			)
		})
	}

	/// The body wrapped in a [`Blob`] tagged with the holder's lower-cased
	/// `Content-Type`, when present.
	async fn blob(&self) -> Result<Blob, FetchError> {
		let media_type = self.body_content_type().unwrap_or_default();
		let bytes = self.buffer().await?;
		Ok(Blob::new(bytes, media_type))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::form::Form;

	fn chunked(chunks: Vec<&'static [u8]>) -> Body {
		Body::stream(stream::iter(
			chunks
				.into_iter()
				.map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c)))
				.collect::<Vec<_>>(),
		))
	}

	#[test]
	fn content_type_inference() {
		assert_eq!(
			Body::text("hi").0.content_type().as_deref(),
			Some("text/plain;charset=UTF-8")
		);
		assert_eq!(Body::bytes(vec![1u8]).0.content_type(), None);
		assert_eq!(Body::none().0.content_type(), None);
		assert_eq!(
			Body::blob(Blob::new("x", "Application/JSON"))
				.0
				.content_type()
				.as_deref(),
			Some("application/json")
		);
		assert_eq!(Body::blob(Blob::new("x", "")).0.content_type(), None);

		let form = Form::new().text("a", "1");
		let boundary = form.boundary().to_owned();
		assert_eq!(
			Body::form(form).0.content_type(),
			Some(format!("multipart/form-data;boundary={boundary}"))
		);
	}

	#[test]
	fn total_bytes_inference() {
		assert_eq!(Body::none().0.total_bytes(), None);
		assert_eq!(Body::text("héllo").0.total_bytes(), Some(6));
		assert_eq!(Body::bytes(vec![0u8; 4]).0.total_bytes(), Some(4));
		assert_eq!(Body::blob(Blob::new("abc", "")).0.total_bytes(), Some(3));
		assert_eq!(chunked(vec![b"x"]).0.total_bytes(), None);

		let sized = Form::new().text("a", "1");
		assert!(Body::form(sized).0.total_bytes().is_some());
		let unsized_form = Form::new().stream(
			"f",
			None,
			None,
			stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"x"))]),
		);
		assert_eq!(Body::form(unsized_form).0.total_bytes(), None);
	}

	#[tokio::test]
	async fn consume_is_at_most_once() {
		let state = BodyState::new(Body::text("payload"));
		assert!(!state.disturbed());
		assert_eq!(
			state.consume("http://x/", 0, 0).await.unwrap(),
			Bytes::from_static(b"payload")
		);
		assert!(state.disturbed());

		let err = state.consume("http://x/", 0, 0).await.unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::AlreadyUsed);
	}

	#[tokio::test]
	async fn consume_null_and_taken_yield_empty() {
		let state = BodyState::empty();
		assert!(state.consume("http://x/", 0, 0).await.unwrap().is_empty());

		let state = BodyState::new(chunked(vec![b"gone"]));
		let _ = state.take_stream("http://x/").unwrap();
		// flag reset: pretend a second holder shares the slot
		let other = BodyState {
			body: Arc::clone(&state.body),
			disturbed: Arc::new(AtomicBool::new(false)),
		};
		assert!(other.consume("http://x/", 0, 0).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn stream_bodies_accumulate_in_order() {
		let state = BodyState::new(chunked(vec![b"hello", b" ", b"world"]));
		let bytes = state.consume("http://x/", 0, 0).await.unwrap();
		assert_eq!(bytes, Bytes::from_static(b"hello world"));
	}

	#[tokio::test]
	async fn size_cap_allows_exact_and_rejects_excess() {
		let state = BodyState::new(chunked(vec![b"hello", b"!"]));
		assert!(state.consume("http://x/", 6, 0).await.is_ok());

		let state = BodyState::new(chunked(vec![b"hello", b"!!"]));
		let err = state.consume("http://x/", 6, 0).await.unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::MaxSize);

		// a single chunk over the cap is rejected before buffering
		let state = BodyState::new(chunked(vec![b"0123456789"]));
		let err = state.consume("http://x/", 5, 0).await.unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::MaxSize);
	}

	#[tokio::test]
	async fn stalled_stream_hits_body_timeout() {
		let state = BodyState::new(Body(BodyKind::Stream(Box::pin(stream::pending()))));
		let err = state.consume("http://x/", 0, 20).await.unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::BodyTimeout);
	}

	#[tokio::test]
	async fn stream_transport_errors_surface_as_system() {
		let items: Vec<Result<Bytes, std::io::Error>> = vec![
			Ok(Bytes::from_static(b"partial")),
			Err(std::io::Error::new(
				std::io::ErrorKind::ConnectionReset,
				"peer reset",
			)),
		];
		let state = BodyState::new(Body::stream(stream::iter(items)));
		let err = state.consume("http://x/", 0, 0).await.unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::System);
		assert_eq!(err.code(), Some("ECONNRESET"));
	}

	#[tokio::test]
	async fn shared_state_propagates_disturbed() {
		let state = BodyState::new(Body::text("x"));
		let wrapped = state.clone();
		state.consume("http://x/", 0, 0).await.unwrap();
		assert!(wrapped.disturbed());
	}

	#[tokio::test]
	async fn split_replayable_gives_independent_reads() {
		let state = BodyState::new(Body::text("again"));
		let cloned = state.split("http://x/").unwrap();
		assert_eq!(
			state.consume("http://x/", 0, 0).await.unwrap(),
			cloned.consume("http://x/", 0, 0).await.unwrap()
		);
	}

	#[tokio::test]
	async fn split_stream_tees_every_byte_to_both() {
		let state = BodyState::new(chunked(vec![b"tee", b"-", b"body"]));
		let cloned = state.split("http://x/").unwrap();
		let (a, b) = tokio::join!(
			state.consume("http://x/", 0, 0),
			cloned.consume("http://x/", 0, 0)
		);
		assert_eq!(a.unwrap(), Bytes::from_static(b"tee-body"));
		assert_eq!(b.unwrap(), Bytes::from_static(b"tee-body"));
	}

	#[tokio::test]
	async fn split_fails_after_disturbance() {
		let state = BodyState::new(Body::text("x"));
		state.consume("http://x/", 0, 0).await.unwrap();
		let err = state.split("http://x/").unwrap_err();
		assert_eq!(err.kind(), FetchErrorKind::AlreadyUsed);
	}

	#[tokio::test]
	async fn outbound_replayable_leaves_body_in_place() {
		let state = BodyState::new(Body::text("abc"));
		let (content_type, total, _) = state.outbound().await;
		assert_eq!(content_type.as_deref(), Some("text/plain;charset=UTF-8"));
		assert_eq!(total, Some(3));
		assert!(!state.disturbed());
		// still consumable afterwards
		assert_eq!(
			state.consume("http://x/", 0, 0).await.unwrap(),
			Bytes::from_static(b"abc")
		);
	}

	#[tokio::test]
	async fn outbound_stream_is_one_shot() {
		let state = BodyState::new(chunked(vec![b"once"]));
		let (content_type, total, _) = state.outbound().await;
		assert_eq!(content_type, None);
		assert_eq!(total, None);
		assert!(state.disturbed());

		// a second serialization writes nothing and advertises no length
		let (_, total, _) = state.outbound().await;
		assert_eq!(total, None);
	}
}
