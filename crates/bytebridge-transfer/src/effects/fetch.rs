//! Blocking, seekable reader over an HTTP download.
//!
//! The first read (not construction) issues the request, so a seek made
//! before any read costs nothing and simply becomes the `Range` of that first
//! request. A seek after the transfer started tears the network thread down
//! and starts a fresh one at the new offset.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use bytebridge_buffer::{BoundedByteChannel, CancellationToken};
use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::transport::{HttpTransport, TransferEvents};
use crate::core::range_header;
use crate::data::{ContentInfo, FetchOptions, HttpRequest, Method, ResponseHead, TransferPhase};
use crate::error::{Error, Result};

type HeadersCallback = Arc<dyn Fn(&ContentInfo) + Send + Sync>;

/// A download exposed as a blocking [`Read`] + [`Seek`] stream.
///
/// Bytes are produced by a dedicated network thread into a
/// [`BoundedByteChannel`] and consumed by [`read_cancellable`](Self::read_cancellable).
/// A failed response status surfaces as an error from the first read that
/// finds the channel drained, and only from that one.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::{FetchOptions, FetchStream, MockTransport};
/// use std::io::{Read, Seek, SeekFrom};
/// use std::sync::Arc;
///
/// let transport = Arc::new(MockTransport::serving("0123456789", "text/plain"));
/// let mut stream = FetchStream::new(transport, "mock://digits", FetchOptions::default());
///
/// stream.seek(SeekFrom::Start(6)).unwrap();
/// let mut tail = String::new();
/// stream.read_to_string(&mut tail).unwrap();
///
/// assert_eq!(tail, "6789");
/// assert_eq!(stream.content_length(), Some(10));
/// ```
pub struct FetchStream {
    transport: Arc<dyn HttpTransport>,
    url: String,
    options: FetchOptions,
    cancellable: CancellationToken,
    content: Arc<Mutex<ContentInfo>>,
    position: u64,
    network: Option<NetworkThread>,
    closed: bool,
}

struct NetworkThread {
    channel: BoundedByteChannel,
    status: Arc<TransferStatus>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct TransferStatus {
    state: Mutex<StatusState>,
    changed: Condvar,
}

#[derive(Default)]
struct StatusState {
    started: bool,
    phase: TransferPhase,
    error: Option<Error>,
}

impl TransferStatus {
    fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_started(&self) {
        let mut state = self.lock();
        state.started = true;
        state.phase = TransferPhase::Fetching;
        drop(state);
        self.changed.notify_all();
    }

    fn wait_started(&self) {
        let mut state = self.lock();
        while !state.started {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self, phase: TransferPhase, error: Option<Error>) {
        let mut state = self.lock();
        state.phase = phase;
        state.error = error;
        drop(state);
        self.changed.notify_all();
    }

    fn take_error(&self) -> Option<Error> { self.lock().error.take() }

    fn phase(&self) -> TransferPhase { self.lock().phase }
}

impl FetchStream {
    /// Create a stream for `url`. No request is made until the first read.
    pub fn new(transport: Arc<dyn HttpTransport>, url: impl Into<String>, options: FetchOptions) -> Self {
        let cancellable = options.cancellable.clone().unwrap_or_default();
        Self {
            transport,
            url: url.into(),
            options,
            cancellable,
            content: Arc::new(Mutex::new(ContentInfo::default())),
            position: 0,
            network: None,
            closed: false,
        }
    }

    pub fn url(&self) -> &str { &self.url }

    /// Stream-wide cancellation token.
    pub fn cancellable(&self) -> &CancellationToken { &self.cancellable }

    /// Offset of the next byte a read returns.
    pub fn position(&self) -> u64 { self.position }

    /// `Content-Type` of the latest successful response, once headers arrived.
    pub fn content_type(&self) -> Option<String> { self.lock_content().content_type.clone() }

    /// Length of the whole resource, once headers arrived.
    pub fn content_length(&self) -> Option<u64> { self.lock_content().content_length }

    pub fn content_info(&self) -> ContentInfo { self.lock_content().clone() }

    pub fn phase(&self) -> TransferPhase {
        self.network.as_ref().map_or(TransferPhase::Idle, |network| network.status.phase())
    }

    pub fn is_closed(&self) -> bool { self.closed }

    /// Read up to `buf.len()` bytes, blocking until that many arrive, the
    /// download ends, or cancellation fires.
    ///
    /// Returns `Ok(0)` at end of stream. A cancelled read returns the bytes
    /// that had arrived, or `Err(Cancelled)` if there were none.
    pub fn read_cancellable(&mut self, buf: &mut [u8], cancel: Option<&CancellationToken>) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.cancellable.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let (channel, status) = self.ensure_started()?;

        let token = self.cancellable.child_token();
        let _link = cancel.map(|call| {
            let token = token.clone();
            call.connect(move || token.cancel())
        });

        let popped = channel.pop(buf, Some(&token));
        self.position += popped.len as u64;
        trace!(requested = buf.len(), len = popped.len, position = self.position, "fetch stream read");

        if popped.len > 0 {
            return Ok(popped.len);
        }
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Nothing left: report a failure once, then plain end of stream.
        match status.take_error() {
            Some(error) => Err(error),
            None => Ok(0),
        }
    }

    /// Move the read position.
    ///
    /// Seeking relative to the end is unsupported because the total length
    /// is not reliably known.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.closed {
            return Err(Error::Closed);
        }

        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(_) => return Err(Error::Unsupported("seeking relative to the end of a download")),
        };
        let target = u64::try_from(target).map_err(|_| Error::InvalidSeek { offset: target })?;

        if self.network.is_none() {
            self.position = target;
            return Ok(target);
        }
        if target == self.position {
            return Ok(target);
        }

        debug!(from = self.position, to = target, url = %self.url, "restarting download at new offset");
        self.stop_network();
        self.position = target;
        self.ensure_started()?;
        Ok(target)
    }

    /// Stop the download without waiting for the network thread.
    ///
    /// Idempotent. Later reads and seeks fail with `Closed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(network) = &self.network {
            network.cancel.cancel();
        }
        debug!(url = %self.url, position = self.position, "fetch stream closed");
    }

    fn ensure_started(&mut self) -> Result<(BoundedByteChannel, Arc<TransferStatus>)> {
        if self.network.is_none() {
            self.network = Some(self.spawn_network()?);
        }
        match &self.network {
            Some(network) => Ok((network.channel.clone(), Arc::clone(&network.status))),
            None => Err(Error::Closed),
        }
    }

    fn spawn_network(&self) -> Result<NetworkThread> {
        let mut request = HttpRequest::new(Method::Get, &self.url).with_headers(&self.options.headers);
        if self.position > 0 {
            request = request.with_header("Range", range_header(self.position));
        }

        let channel = BoundedByteChannel::new();
        let status = Arc::new(TransferStatus::default());
        let cancel = self.cancellable.child_token();

        let job = DownloadJob {
            transport: Arc::clone(&self.transport),
            request,
            channel: channel.clone(),
            status: Arc::clone(&status),
            content: Arc::clone(&self.content),
            on_headers: self.options.on_headers.clone(),
            cancel: cancel.clone(),
        };

        let handle = thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || job.run())
            .map_err(Error::Spawn)?;

        status.wait_started();
        debug!(url = %self.url, offset = self.position, "download thread started");

        Ok(NetworkThread { channel, status, cancel, handle: Some(handle) })
    }

    fn stop_network(&mut self) {
        let Some(mut network) = self.network.take() else {
            return;
        };
        network.cancel.cancel();
        if let Some(handle) = network.handle.take() {
            if handle.join().is_err() {
                warn!(url = %self.url, "download thread panicked");
            }
        }
    }

    fn lock_content(&self) -> MutexGuard<'_, ContentInfo> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for FetchStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_cancellable(buf, None).map_err(io::Error::from)
    }
}

impl Seek for FetchStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.seek_to(pos).map_err(io::Error::from) }
}

impl Drop for FetchStream {
    fn drop(&mut self) { self.close(); }
}

impl fmt::Debug for FetchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchStream")
            .field("url", &self.url)
            .field("position", &self.position)
            .field("phase", &self.phase())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Everything the network thread owns for one request.
struct DownloadJob {
    transport: Arc<dyn HttpTransport>,
    request: HttpRequest,
    channel: BoundedByteChannel,
    status: Arc<TransferStatus>,
    content: Arc<Mutex<ContentInfo>>,
    on_headers: Option<HeadersCallback>,
    cancel: CancellationToken,
}

impl DownloadJob {
    fn run(self) {
        self.status.mark_started();

        let mut sink = DownloadSink {
            channel: &self.channel,
            content: &self.content,
            on_headers: self.on_headers.as_ref(),
            success: false,
            error_body: Vec::new(),
        };
        let result = self.transport.execute(self.request.clone(), &mut sink, &self.cancel);
        let error_body = std::mem::take(&mut sink.error_body);

        let (phase, error) = match result {
            Ok(head) if head.is_success() => {
                debug!(status = head.status, "download finished");
                (TransferPhase::Complete, None)
            }
            Ok(head) => {
                warn!(status = head.status, url = %self.request.url, "download failed");
                (TransferPhase::Failed, Some(Error::transport(&head, Bytes::from(error_body))))
            }
            Err(Error::Cancelled) => {
                debug!(url = %self.request.url, "download cancelled");
                (TransferPhase::Cancelled, None)
            }
            Err(error) => {
                warn!(url = %self.request.url, %error, "download aborted");
                (TransferPhase::Failed, Some(error))
            }
        };

        // Recorded before end-of-stream so a reader woken by it sees the error.
        self.status.finish(phase, error);
        self.channel.close();
    }
}

struct DownloadSink<'a> {
    channel: &'a BoundedByteChannel,
    content: &'a Mutex<ContentInfo>,
    on_headers: Option<&'a HeadersCallback>,
    success: bool,
    error_body: Vec<u8>,
}

impl TransferEvents for DownloadSink<'_> {
    fn on_headers(&mut self, head: &ResponseHead) {
        self.success = head.is_success();
        if !self.success {
            return;
        }

        let info = ContentInfo {
            content_type: head.content_type().map(str::to_owned),
            content_length: head.resource_length(),
        };
        trace!(status = head.status, ?info.content_type, ?info.content_length, "download headers");
        *self.content.lock().unwrap_or_else(PoisonError::into_inner) = info.clone();

        if let Some(callback) = self.on_headers {
            callback(&info);
        }
    }

    fn on_body_chunk(&mut self, chunk: Bytes) {
        if self.success {
            self.channel.push_chunk(chunk);
        } else {
            self.error_body.extend_from_slice(&chunk);
        }
    }
}
