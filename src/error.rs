use std::fmt;

use strum::IntoStaticStr;

/// The closed set of error kinds a fetch can produce.
///
/// Kinds come in two families: operational failures that a caller receives
/// from an otherwise well-formed call (`System`, the timeouts, the limits,
/// the redirect failures, `InvalidJson`), and argument-validation failures
/// that would be a `TypeError` in the Web API (bad URL, bad method, bad
/// header name, body on a GET, consuming a used body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum FetchErrorKind {
	System,
	RequestTimeout,
	BodyTimeout,
	MaxSize,
	MaxRedirect,
	NoRedirect,
	InvalidRedirect,
	InvalidJson,

	InvalidUrl,
	RelativeUrl,
	UnsupportedScheme,
	InvalidMethod,
	InvalidHeader,
	InvalidStatus,
	BodyNotAllowed,
	AlreadyUsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFamily {
	/// Would be a `TypeError` in the Web API: the call itself was malformed.
	Type,
	/// A `FetchError`: the call was well-formed but the operation failed.
	Fetch,
}

impl FetchErrorKind {
	fn default_message(self) -> &'static str {
		match self {
			Self::System => "request failed",
			Self::RequestTimeout => "network timeout",
			Self::BodyTimeout => "response body timeout",
			Self::MaxSize => "content size over limit",
			Self::MaxRedirect => "maximum redirect reached",
			Self::NoRedirect => "redirect mode is set to error",
			Self::InvalidRedirect => "invalid redirect URL",
			Self::InvalidJson => "invalid json in response body",
			Self::InvalidUrl => "invalid URL",
			Self::RelativeUrl => "only absolute URLs are supported",
			Self::UnsupportedScheme => "only HTTP(S) protocols are supported",
			Self::InvalidMethod => "invalid HTTP method",
			Self::InvalidHeader => "invalid header name or value",
			Self::InvalidStatus => "invalid status code",
			Self::BodyNotAllowed => "request with GET/HEAD method cannot have body",
			Self::AlreadyUsed => "body already used",
		}
	}

	pub fn family(self) -> ErrorFamily {
		match self {
			Self::InvalidUrl
			| Self::RelativeUrl
			| Self::UnsupportedScheme
			| Self::InvalidMethod
			| Self::InvalidHeader
			| Self::InvalidStatus
			| Self::BodyNotAllowed
			| Self::AlreadyUsed => ErrorFamily::Type,
			_ => ErrorFamily::Fetch,
		}
	}
}

/// The error value surfaced by every fallible operation in this crate.
///
/// `error_type()` is the stable kebab-case tag (`"max-size"`,
/// `"request-timeout"`, ...); `code()` carries the underlying platform
/// error name (`ECONNREFUSED`, `Z_DATA_ERROR`, ...) when `kind` is
/// [`FetchErrorKind::System`].
#[derive(Debug, Clone)]
pub struct FetchError {
	kind: FetchErrorKind,
	message: Option<String>,
	code: Option<String>,
}

impl FetchError {
	pub fn new(kind: FetchErrorKind, message: Option<impl Into<String>>) -> Self {
		Self {
			kind,
			message: message.map(|m| m.into()),
			code: None,
		}
	}

	pub fn with_code(
		kind: FetchErrorKind,
		message: Option<impl Into<String>>,
		code: impl Into<String>,
	) -> Self {
		Self {
			kind,
			message: message.map(|m| m.into()),
			code: Some(code.into()),
		}
	}

	pub(crate) fn already_used(url: &str) -> Self {
		Self::new(
			FetchErrorKind::AlreadyUsed,
			Some(format!("body used already for: {url}")),
		)
	}

	pub fn kind(&self) -> FetchErrorKind {
		self.kind
	}

	/// The kebab-case `type` tag of the error, e.g. `"body-timeout"`.
	pub fn error_type(&self) -> &'static str {
		self.kind.into()
	}

	pub fn code(&self) -> Option<&str> {
		self.code.as_deref()
	}

	pub fn family(&self) -> ErrorFamily {
		self.kind.family()
	}
}

impl From<FetchErrorKind> for FetchError {
	fn from(kind: FetchErrorKind) -> Self {
		Self {
			kind,
			message: None,
			code: None,
		}
	}
}

impl fmt::Display for FetchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}: {}",
			self.kind,
			self.message
				.as_deref()
				.unwrap_or_else(|| self.kind.default_message())
		)
	}
}

impl std::error::Error for FetchError {}

/// Maps an I/O error to the platform error name Node-style consumers expect.
pub(crate) fn io_error_code(err: &std::io::Error) -> Option<&'static str> {
	use std::io::ErrorKind;

	Some(match err.kind() {
		ErrorKind::ConnectionRefused => "ECONNREFUSED",
		ErrorKind::ConnectionReset => "ECONNRESET",
		ErrorKind::ConnectionAborted => "ECONNABORTED",
		ErrorKind::NotConnected => "ENOTCONN",
		ErrorKind::AddrInUse => "EADDRINUSE",
		ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
		ErrorKind::BrokenPipe => "EPIPE",
		ErrorKind::TimedOut => "ETIMEDOUT",
		_ => return None,
	})
}

/// Wraps an I/O error from a caller-supplied stream as a `system` failure.
pub(crate) fn io_to_fetch(err: std::io::Error) -> FetchError {
	match io_error_code(&err) {
		Some(code) => {
			FetchError::with_code(FetchErrorKind::System, Some(err.to_string()), code)
		}
		None => FetchError::new(FetchErrorKind::System, Some(err.to_string())),
	}
}

/// Walks a transport error's source chain looking for a platform error name.
pub(crate) fn system_code(err: &(dyn std::error::Error + 'static)) -> Option<String> {
	let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
	while let Some(e) = current {
		if let Some(io) = e.downcast_ref::<std::io::Error>() {
			if let Some(code) = io_error_code(io) {
				return Some(code.to_owned());
			}
		}
		// getaddrinfo failures don't map onto a stable io::ErrorKind
		let text = e.to_string();
		if text.contains("dns error") || text.contains("failed to lookup") {
			return Some("ENOTFOUND".to_owned());
		}
		current = e.source();
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_render_as_kebab_case_tags() {
		assert_eq!(
			FetchError::from(FetchErrorKind::MaxSize).error_type(),
			"max-size"
		);
		assert_eq!(
			FetchError::from(FetchErrorKind::RequestTimeout).error_type(),
			"request-timeout"
		);
		assert_eq!(
			FetchError::from(FetchErrorKind::InvalidJson).error_type(),
			"invalid-json"
		);
	}

	#[test]
	fn validation_kinds_are_type_errors() {
		assert_eq!(FetchErrorKind::BodyNotAllowed.family(), ErrorFamily::Type);
		assert_eq!(FetchErrorKind::AlreadyUsed.family(), ErrorFamily::Type);
		assert_eq!(FetchErrorKind::UnsupportedScheme.family(), ErrorFamily::Type);
		assert_eq!(FetchErrorKind::System.family(), ErrorFamily::Fetch);
		assert_eq!(FetchErrorKind::MaxRedirect.family(), ErrorFamily::Fetch);
	}

	#[test]
	fn display_includes_tag_and_message() {
		let err = FetchError::new(
			FetchErrorKind::MaxSize,
			Some("content size at http://x/ over limit: 5"),
		);
		assert_eq!(
			err.to_string(),
			"max-size: content size at http://x/ over limit: 5"
		);

		let bare = FetchError::from(FetchErrorKind::NoRedirect);
		assert_eq!(
			bare.to_string(),
			"no-redirect: redirect mode is set to error"
		);
	}

	#[test]
	fn system_code_finds_io_kind_in_chain() {
		let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
		assert_eq!(system_code(&io).as_deref(), Some("ECONNREFUSED"));
	}
}
