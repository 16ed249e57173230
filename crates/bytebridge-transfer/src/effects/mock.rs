//! In-memory transport for tests and offline demos.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytebridge_buffer::CancellationToken;
use bytes::Bytes;

use super::transport::{HttpTransport, TransferEvents};
use crate::core::parse_range_start;
use crate::data::{BodyChunk, HttpRequest, Method, RequestBody, ResponseHead};
use crate::error::{Error, Result};

/// A request as the mock server saw it, body fully collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockResponse {
    pub fn new(status: u16) -> Self { Self { status, headers: Vec::new(), body: Bytes::new() } }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

type Responder = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

/// Transport that answers requests from a closure instead of the network.
///
/// Streamed request bodies are drained before the responder runs, and the
/// response body is delivered in `chunk_size` pieces with an optional delay
/// between them. Cancellation is honoured between pieces.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::{FetchOptions, FetchStream, MockTransport};
/// use std::io::Read;
/// use std::sync::Arc;
///
/// let transport = Arc::new(MockTransport::serving("hello world", "text/plain"));
/// let mut stream = FetchStream::new(transport, "mock://hello", FetchOptions::default());
///
/// let mut text = String::new();
/// stream.read_to_string(&mut text).unwrap();
/// assert_eq!(text, "hello world");
/// ```
pub struct MockTransport {
    responder: Box<Responder>,
    requests: Mutex<Vec<RecordedRequest>>,
    chunk_size: usize,
    chunk_delay: Duration,
    poll_interval: Duration,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            chunk_size: 4096,
            chunk_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
        }
    }

    /// Serve `content` to every request, honouring `Range: bytes=N-` with a
    /// `206` and answering `416` for a start past the end.
    pub fn serving(content: impl Into<Bytes>, content_type: &str) -> Self {
        let content: Bytes = content.into();
        let content_type = content_type.to_owned();

        Self::new(move |request| {
            let total = content.len() as u64;
            let start = request.header("Range").and_then(parse_range_start);

            match start {
                Some(start) if start > 0 && start >= total => MockResponse::new(416)
                    .with_header("Content-Range", format!("bytes */{total}")),
                Some(start) if start > 0 => {
                    let body = content.slice(start as usize..);
                    MockResponse::new(206)
                        .with_header("Content-Type", content_type.as_str())
                        .with_header("Content-Length", body.len().to_string())
                        .with_header("Content-Range", format!("bytes {start}-{}/{total}", total - 1))
                        .with_body(body)
                }
                _ => MockResponse::new(200)
                    .with_header("Content-Type", content_type.as_str())
                    .with_header("Content-Length", total.to_string())
                    .with_body(content.clone()),
            }
        })
    }

    /// Size of the pieces the response body is delivered in.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pause before each response body piece.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Every request executed so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn collect_body(
        &self,
        body: RequestBody,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        match body {
            RequestBody::Empty => Ok(Vec::new()),
            RequestBody::Full(bytes) => Ok(bytes.to_vec()),
            RequestBody::Streamed => {
                let mut collected = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    match events.next_body_chunk() {
                        BodyChunk::Data(chunk) => {
                            collected.extend_from_slice(&chunk);
                            events.on_body_written(chunk.len());
                        }
                        BodyChunk::Pending => thread::sleep(self.poll_interval),
                        BodyChunk::End => return Ok(collected),
                    }
                }
            }
        }
    }
}

impl HttpTransport for MockTransport {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        let HttpRequest { method, url, headers, body } = request;
        let body = self.collect_body(body, events, cancel)?;

        let recorded = RecordedRequest { method, url, headers, body };
        tracing::trace!(method = %recorded.method, url = %recorded.url, "mock request");
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(recorded.clone());

        let response = (self.responder)(&recorded);
        let head = ResponseHead { status: response.status, reason: None, headers: response.headers };
        events.on_headers(&head);

        let mut offset = 0;
        while offset < response.body.len() {
            if !self.chunk_delay.is_zero() {
                thread::sleep(self.chunk_delay);
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let end = (offset + self.chunk_size).min(response.body.len());
            events.on_body_chunk(response.body.slice(offset..end));
            offset = end;
        }

        Ok(head)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("responder", &"{ ... }")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_delay", &self.chunk_delay)
            .finish()
    }
}
