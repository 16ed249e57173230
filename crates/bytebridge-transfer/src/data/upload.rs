use std::fmt;
use std::sync::Arc;

use crate::data::{Entry, Method};

/// Where and how an upload is sent.
///
/// Declaring a total length with [`UploadTarget::resumable`] switches the
/// upload to the resumable session protocol. Without it, the content is sent
/// as a single streamed request, wrapped in a multipart body when an entry is
/// attached.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::{Method, UploadTarget};
///
/// let target = UploadTarget::new(Method::Post, "https://example.com/upload", "image/png")
///     .slug("holiday.png")
///     .resumable(1_048_576);
/// assert_eq!(target.content_length(), Some(1_048_576));
/// ```
#[derive(Clone)]
pub struct UploadTarget {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) content_type: String,
    pub(crate) entry: Option<Arc<dyn Entry>>,
    pub(crate) slug: Option<String>,
    pub(crate) content_length: Option<u64>,
}

impl UploadTarget {
    pub fn new(method: Method, url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            content_type: content_type.into(),
            entry: None,
            slug: None,
            content_length: None,
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn entry(mut self, entry: impl Entry + 'static) -> Self {
        self.entry = Some(Arc::new(entry));
        self
    }

    /// Set the `Slug` header, the file name suggested to the server.
    #[must_use]
    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Use the resumable protocol for `content_length` bytes of content.
    #[must_use]
    pub fn resumable(mut self, content_length: u64) -> Self {
        self.content_length = Some(content_length);
        self
    }

    pub fn method(&self) -> Method { self.method }

    pub fn url(&self) -> &str { &self.url }

    pub fn content_type(&self) -> &str { &self.content_type }

    pub fn content_length(&self) -> Option<u64> { self.content_length }

    pub fn is_resumable(&self) -> bool { self.content_length.is_some() }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("entry", &self.entry.as_ref().map(|e| e.content_type().to_owned()))
            .field("slug", &self.slug)
            .field("content_length", &self.content_length)
            .finish()
    }
}
