//! Metadata entries that travel alongside uploaded content.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// A metadata document describing the content being uploaded.
///
/// For a plain upload the entry becomes the first part of a multipart body.
/// For a resumable upload it is the body of the session-initiating request.
/// Its ETag, when present, is sent as `If-Match`.
pub trait Entry: Send + Sync {
    /// Media type of the serialized entry, without parameters.
    fn content_type(&self) -> &str;

    fn etag(&self) -> Option<&str> { None }

    fn to_bytes(&self) -> Result<Vec<u8>>;
}

/// An entry serialized as JSON.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::{Entry, JsonEntry};
/// use serde_json::json;
///
/// let entry = JsonEntry::new(json!({ "title": "report.pdf" })).with_etag("\"abc\"");
/// assert_eq!(entry.content_type(), "application/json");
/// assert_eq!(entry.etag(), Some("\"abc\""));
/// assert_eq!(entry.to_bytes().unwrap(), br#"{"title":"report.pdf"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct JsonEntry<T> {
    value: T,
    etag: Option<String>,
}

impl<T> JsonEntry<T> {
    pub fn new(value: T) -> Self { Self { value, etag: None } }

    #[must_use]
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn value(&self) -> &T { &self.value }
}

impl<T: Serialize + Send + Sync> Entry for JsonEntry<T> {
    fn content_type(&self) -> &str { "application/json" }

    fn etag(&self) -> Option<&str> { self.etag.as_deref() }

    fn to_bytes(&self) -> Result<Vec<u8>> { Ok(serde_json::to_vec(&self.value)?) }
}

/// Deserialize a response body returned with a success status.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::Protocol(format!("could not parse response body: {e}")))
}
