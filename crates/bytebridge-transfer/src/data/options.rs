use std::fmt;
use std::sync::Arc;

use bytebridge_buffer::CancellationToken;

use super::http::ContentInfo;
use super::progress::Progress;
use crate::core::MAX_RESUMABLE_CHUNK_SIZE;

/// Bytes moved from the channel to the network per step.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Configuration for a [`FetchStream`](crate::FetchStream).
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::FetchOptions;
/// use std::sync::Arc;
///
/// let options = FetchOptions::default()
///     .header("Authorization", "Bearer token")
///     .on_headers(Arc::new(|info| {
///         println!("type: {:?}, length: {:?}", info.content_type, info.content_length);
///     }));
/// ```
#[derive(Clone)]
pub struct FetchOptions {
    /// Extra headers sent with every request, including the ones issued after a seek.
    ///
    /// Default: empty
    pub headers: Arc<[(String, String)]>,

    /// Stream-wide cancellation. Cancelling it aborts the network thread and
    /// makes every later read fail with `Cancelled`.
    ///
    /// Default: a fresh token
    pub cancellable: Option<CancellationToken>,

    /// Invoked on the network thread when a successful response's headers arrive.
    ///
    /// Default: None
    pub on_headers: Option<Arc<dyn Fn(&ContentInfo) + Send + Sync>>,

    /// Name given to the network thread.
    ///
    /// Default: `bytebridge-fetch`
    pub thread_name: String,
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("headers", &self.headers)
            .field("cancellable", &self.cancellable)
            .field("on_headers", &self.on_headers.as_ref().map(|_| "{ ... }"))
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: Arc::new([]),
            cancellable: None,
            on_headers: None,
            thread_name: "bytebridge-fetch".to_owned(),
        }
    }
}

impl FetchOptions {
    /// Add a single custom HTTP header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = push_header(&self.headers, key.into(), value.into());
        self
    }

    /// Replace all custom headers.
    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Arc::from(headers);
        self
    }

    #[must_use]
    pub fn cancellable(mut self, token: CancellationToken) -> Self {
        self.cancellable = Some(token);
        self
    }

    #[must_use]
    pub fn on_headers(mut self, on_headers: Arc<dyn Fn(&ContentInfo) + Send + Sync>) -> Self {
        self.on_headers = Some(on_headers);
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Configuration for a [`SendStream`](crate::SendStream).
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::SendOptions;
/// use std::sync::Arc;
///
/// let options = SendOptions::default()
///     .chunk_size(16 * 1024)
///     .on_progress(Arc::new(|progress| {
///         if let Some(pct) = progress.percentage() {
///             println!("{pct:.1}%");
///         }
///     }));
/// ```
#[derive(Clone)]
pub struct SendOptions {
    /// Extra headers sent with every request of the upload.
    ///
    /// Default: empty
    pub headers: Arc<[(String, String)]>,

    /// Stream-wide cancellation.
    ///
    /// Default: a fresh token
    pub cancellable: Option<CancellationToken>,

    /// Largest piece taken from the channel in one network step.
    ///
    /// Default: 8 KiB
    pub chunk_size: usize,

    /// Content bytes carried by each request of a resumable upload.
    ///
    /// Clamped to `1..=512 KiB`.
    ///
    /// Default: 512 KiB
    pub resumable_chunk_size: u64,

    /// Invoked on the network thread whenever more caller bytes are confirmed as sent.
    ///
    /// Default: None
    pub on_progress: Option<Arc<dyn Fn(&Progress) + Send + Sync>>,

    /// Name given to the network thread.
    ///
    /// Default: `bytebridge-send`
    pub thread_name: String,
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("headers", &self.headers)
            .field("cancellable", &self.cancellable)
            .field("chunk_size", &self.chunk_size)
            .field("resumable_chunk_size", &self.resumable_chunk_size)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "{ ... }"))
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            headers: Arc::new([]),
            cancellable: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            resumable_chunk_size: MAX_RESUMABLE_CHUNK_SIZE,
            on_progress: None,
            thread_name: "bytebridge-send".to_owned(),
        }
    }
}

impl SendOptions {
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = push_header(&self.headers, key.into(), value.into());
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Arc::from(headers);
        self
    }

    #[must_use]
    pub fn cancellable(mut self, token: CancellationToken) -> Self {
        self.cancellable = Some(token);
        self
    }

    /// Set the network step size. Zero is treated as one byte.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn resumable_chunk_size(mut self, size: u64) -> Self {
        self.resumable_chunk_size = size.clamp(1, MAX_RESUMABLE_CHUNK_SIZE);
        self
    }

    #[must_use]
    pub fn on_progress(mut self, on_progress: Arc<dyn Fn(&Progress) + Send + Sync>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

fn push_header(headers: &[(String, String)], key: String, value: String) -> Arc<[(String, String)]> {
    let mut headers = headers.to_vec();
    headers.push((key, value));
    Arc::from(headers)
}
