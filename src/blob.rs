use bytes::Bytes;

/// An immutable byte container tagged with a media type, in the shape of the
/// Web API `Blob`.
#[derive(Debug, Clone, Default)]
pub struct Blob {
	bytes: Bytes,
	media_type: String,
}

impl Blob {
	/// Media types are stored lower-cased, as `blob()` consumers observe them.
	pub fn new(content: impl Into<Bytes>, media_type: impl AsRef<str>) -> Self {
		Self {
			bytes: content.into(),
			media_type: media_type.as_ref().to_ascii_lowercase(),
		}
	}

	pub fn size(&self) -> u64 {
		self.bytes.len() as u64
	}

	/// The media type, or the empty string when none was given.
	pub fn media_type(&self) -> &str {
		&self.media_type
	}

	pub fn bytes(&self) -> &Bytes {
		&self.bytes
	}

	pub fn into_bytes(self) -> Bytes {
		self.bytes
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn media_type_is_lowercased() {
		let blob = Blob::new("hi", "Text/Plain;Charset=UTF-8");
		assert_eq!(blob.media_type(), "text/plain;charset=utf-8");
		assert_eq!(blob.size(), 2);
	}

	#[test]
	fn default_blob_is_empty_and_untyped() {
		let blob = Blob::default();
		assert_eq!(blob.size(), 0);
		assert_eq!(blob.media_type(), "");
	}
}
