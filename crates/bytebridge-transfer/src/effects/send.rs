//! Blocking writer over an HTTP upload.
//!
//! Caller writes go into a [`BoundedByteChannel`]; a network thread drains it
//! into the request body. `write` returns only once its bytes have been handed
//! to the connection, which bounds memory to roughly one write's worth.
//!
//! Two locks guard the shared state, always taken in this order:
//! the response lock, then the progress lock.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use bytebridge_buffer::{BoundedByteChannel, CancellationToken};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use super::transport::{HttpTransport, TransferEvents};
use crate::core::{
    RESUME_INCOMPLETE, content_range_header, multipart_content_type, multipart_footer, multipart_preamble,
    next_chunk_length,
};
use crate::data::{
    BodyChunk, Entry, HttpRequest, Method, Progress, RequestBody, ResponseHead, SendOptions, TransferPhase,
    UploadTarget, parse_json,
};
use crate::error::{Error, Result};

type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// What the server answered, as far as the upload has got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResponse {
    /// The final response has not arrived yet.
    InProgress,
    /// The upload ended without a success status.
    Failed,
    Complete { status: u16, body: Bytes },
}

/// An upload exposed as a blocking [`Write`] stream.
///
/// Nothing is sent until the first write (or [`close`](Self::close) for an
/// empty upload). [`close`](Self::close) marks the end of the content and
/// blocks until the server's final response; its result is the upload's
/// result. A stream dropped without being closed aborts its upload.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::{Method, MockResponse, MockTransport, SendOptions, SendStream, UploadTarget};
/// use std::io::Write;
/// use std::sync::Arc;
///
/// let transport = Arc::new(MockTransport::new(|request| {
///     MockResponse::new(201).with_body(format!("{{\"size\":{}}}", request.body.len()))
/// }));
/// let target = UploadTarget::new(Method::Post, "mock://upload", "text/plain");
/// let mut stream = SendStream::new(transport, target, SendOptions::default());
///
/// stream.write_all(b"hello world").unwrap();
/// stream.close().unwrap();
///
/// let reply: serde_json::Value = stream.parse_response().unwrap();
/// assert_eq!(reply["size"], 11);
/// ```
pub struct SendStream {
    transport: Arc<dyn HttpTransport>,
    target: UploadTarget,
    options: SendOptions,
    cancellable: CancellationToken,
    network_cancel: CancellationToken,
    shared: Arc<SendShared>,
    handle: Option<JoinHandle<()>>,
    started: bool,
    closed: bool,
}

struct SendShared {
    channel: BoundedByteChannel,
    response: Mutex<ResponseState>,
    finished: Condvar,
    progress: Mutex<WriteState>,
    chunk_written: Condvar,
}

#[derive(Default)]
struct ResponseState {
    finished: bool,
    status: Option<u16>,
    body: Bytes,
    error: Option<Error>,
}

#[derive(Default)]
struct WriteState {
    phase: TransferPhase,
    /// Bytes pushed into the channel, preamble included.
    queued: u64,
    /// Bytes taken from the channel and handed to the connection.
    written: u64,
    preamble: u64,
}

impl WriteState {
    fn caller_written(&self) -> u64 { self.written.saturating_sub(self.preamble) }
}

struct Waited {
    written: u64,
    finished: bool,
    cancelled: bool,
}

impl SendShared {
    fn new() -> Self {
        Self {
            channel: BoundedByteChannel::new(),
            response: Mutex::new(ResponseState::default()),
            finished: Condvar::new(),
            progress: Mutex::new(WriteState::default()),
            chunk_written: Condvar::new(),
        }
    }

    fn lock_response(&self) -> MutexGuard<'_, ResponseState> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_progress(&self) -> MutexGuard<'_, WriteState> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `data`, returning the queued total once it is in.
    fn enqueue(&self, data: &[u8]) -> Result<u64> {
        let mut progress = self.lock_progress();
        self.channel.try_push(data)?;
        progress.queued += data.len() as u64;
        Ok(progress.queued)
    }

    fn enqueue_preamble(&self, preamble: &[u8]) -> Result<()> {
        let mut progress = self.lock_progress();
        self.channel.try_push(preamble)?;
        progress.queued += preamble.len() as u64;
        progress.preamble += preamble.len() as u64;
        Ok(())
    }

    /// Returns the caller bytes written so far.
    fn mark_written(&self, len: u64) -> u64 {
        let mut progress = self.lock_progress();
        progress.written += len;
        let written = progress.caller_written();
        drop(progress);
        self.chunk_written.notify_all();
        written
    }

    fn set_phase(&self, phase: TransferPhase) { self.lock_progress().phase = phase; }

    /// Take back the newest `len` queued bytes the network thread has not
    /// popped yet, returning how many were removed.
    fn retract(&self, len: usize) -> usize {
        let mut progress = self.lock_progress();
        let removed = self.channel.retract(len);
        progress.queued -= removed as u64;
        removed
    }

    fn take_error(&self) -> Option<Error> { self.lock_response().error.take() }

    fn queued(&self) -> u64 { self.lock_progress().queued }
}

impl SendStream {
    pub fn new(transport: Arc<dyn HttpTransport>, target: UploadTarget, options: SendOptions) -> Self {
        let cancellable = options.cancellable.clone().unwrap_or_default();
        let network_cancel = cancellable.child_token();
        Self {
            transport,
            target,
            options,
            cancellable,
            network_cancel,
            shared: Arc::new(SendShared::new()),
            handle: None,
            started: false,
            closed: false,
        }
    }

    pub fn target(&self) -> &UploadTarget { &self.target }

    /// Stream-wide cancellation token.
    pub fn cancellable(&self) -> &CancellationToken { &self.cancellable }

    pub fn phase(&self) -> TransferPhase { self.shared.lock_progress().phase }

    /// Caller bytes handed to the connection so far.
    pub fn bytes_written(&self) -> u64 { self.shared.lock_progress().caller_written() }

    pub fn is_closed(&self) -> bool { self.closed }

    /// Write `buf`, blocking until the network thread has sent all of it.
    ///
    /// A cancelled write takes back the bytes the network thread has not
    /// picked up yet. It returns how many were kept, or `Err(Cancelled)` when
    /// none were, in which case nothing of `buf` is sent. The cancellation
    /// only affects this call.
    pub fn write_cancellable(&mut self, buf: &[u8], cancel: Option<&CancellationToken>) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        if let Some(error) = self.shared.take_error() {
            return Err(error);
        }
        if self.cancellable.is_cancelled() || cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        self.start()?;
        let target = match self.shared.enqueue(buf) {
            Ok(target) => target,
            Err(error) => return Err(self.shared.take_error().unwrap_or(error)),
        };

        let waited = self.wait_written(target, cancel);
        if waited.written >= target {
            trace!(len = buf.len(), "send stream write");
            return Ok(buf.len());
        }
        if waited.cancelled {
            let kept = buf.len() - self.shared.retract(buf.len());
            trace!(len = buf.len(), kept, "send stream write cancelled");
            return if kept == 0 { Err(Error::Cancelled) } else { Ok(kept) };
        }

        debug_assert!(waited.finished);
        Err(self
            .shared
            .take_error()
            .unwrap_or_else(|| Error::Protocol("upload finished before all written bytes were sent".to_owned())))
    }

    /// Block until every byte written so far has been handed to the connection.
    pub fn flush_cancellable(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if let Some(error) = self.shared.take_error() {
            return Err(error);
        }
        if !self.started {
            return Ok(());
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let target = self.shared.queued();
        let waited = self.wait_written(target, cancel);
        if waited.written >= target {
            return Ok(());
        }
        if waited.cancelled {
            return Err(Error::Cancelled);
        }
        Err(self
            .shared
            .take_error()
            .unwrap_or_else(|| Error::Protocol("upload finished before all written bytes were sent".to_owned())))
    }

    /// Finish the upload and wait for the server's final response.
    ///
    /// Idempotent: only the first call reports the outcome, later calls
    /// return `Ok(())`. A cancelled close returns `Err(Cancelled)` while the
    /// network thread keeps winding down in the background.
    pub fn close_cancellable(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.cancellable.is_cancelled() {
            return Err(self.shared.take_error().unwrap_or(Error::Cancelled));
        }

        // An upload with no writes still has to be sent.
        self.start()?;
        self.shared.channel.close();

        let token = self.cancellable.child_token();
        let _link = cancel.map(|call| {
            let token = token.clone();
            call.connect(move || token.cancel())
        });

        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = token.connect({
            let shared = Arc::clone(&self.shared);
            let cancelled = Arc::clone(&cancelled);
            move || {
                let _response = shared.lock_response();
                cancelled.store(true, Ordering::SeqCst);
                shared.finished.notify_all();
            }
        });

        let mut response = self.shared.lock_response();
        while !response.finished && !cancelled.load(Ordering::SeqCst) {
            response = self.shared.finished.wait(response).unwrap_or_else(PoisonError::into_inner);
        }
        let finished = response.finished;
        let error = response.error.take();
        drop(response);

        if finished {
            if let Some(handle) = self.handle.take() {
                if handle.join().is_err() {
                    warn!(url = %self.target.url, "upload thread panicked");
                }
            }
        }

        debug!(url = %self.target.url, finished, ok = error.is_none(), "send stream closed");
        match error {
            Some(error) => Err(error),
            None if finished => Ok(()),
            None => Err(Error::Cancelled),
        }
    }

    pub fn close(&mut self) -> Result<()> { self.close_cancellable(None) }

    /// The server's final response, once there is one.
    pub fn response(&self) -> UploadResponse {
        let response = self.shared.lock_response();
        if !response.finished {
            return UploadResponse::InProgress;
        }
        match response.status {
            Some(status) if crate::core::is_success(status) => {
                UploadResponse::Complete { status, body: response.body.clone() }
            }
            _ => UploadResponse::Failed,
        }
    }

    /// Deserialize the final response body as JSON.
    pub fn parse_response<T: DeserializeOwned>(&self) -> Result<T> {
        match self.response() {
            UploadResponse::Complete { body, .. } => parse_json(&body),
            UploadResponse::InProgress => Err(Error::Protocol("upload has not finished".to_owned())),
            UploadResponse::Failed => Err(Error::Protocol("upload did not succeed".to_owned())),
        }
    }

    fn start(&mut self) -> Result<()> {
        let thread_name = self.options.thread_name.clone();
        self.start_with(|job| thread::Builder::new().name(thread_name).spawn(move || job.run()))
    }

    fn start_with<F>(&mut self, spawn: F) -> Result<()>
    where
        F: FnOnce(UploadJob) -> io::Result<JoinHandle<()>>,
    {
        if self.started {
            return Ok(());
        }

        let entry = self.target.entry.as_deref().map(|entry| PreparedEntry::new(entry)).transpose()?;
        let preamble = match (&entry, self.target.is_resumable()) {
            (Some(entry), false) => {
                Some(multipart_preamble(&entry.content_type, &entry.body, &self.target.content_type))
            }
            _ => None,
        };

        let job = UploadJob {
            transport: Arc::clone(&self.transport),
            target: self.target.clone(),
            entry,
            headers: Arc::clone(&self.options.headers),
            chunk_size: self.options.chunk_size.max(1),
            resumable_chunk_size: self.options.resumable_chunk_size,
            on_progress: self.options.on_progress.clone(),
            shared: Arc::clone(&self.shared),
            cancel: self.network_cancel.clone(),
        };

        self.shared.set_phase(TransferPhase::Sending);
        let handle = match spawn(job) {
            Ok(handle) => handle,
            Err(error) => {
                self.shared.set_phase(TransferPhase::Idle);
                return Err(Error::Spawn(error));
            }
        };
        self.handle = Some(handle);
        self.started = true;

        debug!(
            url = %self.target.url,
            method = %self.target.method,
            resumable = self.target.is_resumable(),
            "upload thread started"
        );

        // Queued only once the thread exists, so a failed spawn leaves the channel untouched.
        if let Some(preamble) = preamble {
            if let Err(error) = self.shared.enqueue_preamble(&preamble) {
                return Err(self.shared.take_error().unwrap_or(error));
            }
        }
        Ok(())
    }

    fn wait_written(&self, target: u64, cancel: Option<&CancellationToken>) -> Waited {
        let token = self.cancellable.child_token();
        let _link = cancel.map(|call| {
            let token = token.clone();
            call.connect(move || token.cancel())
        });

        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = token.connect({
            let shared = Arc::clone(&self.shared);
            let cancelled = Arc::clone(&cancelled);
            move || {
                let _progress = shared.lock_progress();
                cancelled.store(true, Ordering::SeqCst);
                shared.chunk_written.notify_all();
            }
        });

        let mut progress = self.shared.lock_progress();
        while progress.written < target && !progress.phase.is_terminal() && !cancelled.load(Ordering::SeqCst) {
            progress = self.shared.chunk_written.wait(progress).unwrap_or_else(PoisonError::into_inner);
        }

        Waited {
            written: progress.written,
            finished: progress.phase.is_terminal(),
            cancelled: cancelled.load(Ordering::SeqCst),
        }
    }
}

impl Write for SendStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_cancellable(buf, None).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> { self.flush_cancellable(None).map_err(io::Error::from) }
}

impl Drop for SendStream {
    fn drop(&mut self) {
        if self.started && !self.closed {
            warn!(url = %self.target.url, "send stream dropped before close; aborting upload");
            self.network_cancel.cancel();
        }
    }
}

impl fmt::Debug for SendStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendStream")
            .field("target", &self.target)
            .field("phase", &self.phase())
            .field("started", &self.started)
            .field("closed", &self.closed)
            .finish()
    }
}

struct PreparedEntry {
    content_type: String,
    etag: Option<String>,
    body: Bytes,
}

impl PreparedEntry {
    fn new(entry: &dyn Entry) -> Result<Self> {
        Ok(Self {
            content_type: entry.content_type().to_owned(),
            etag: entry.etag().map(str::to_owned),
            body: Bytes::from(entry.to_bytes()?),
        })
    }
}

struct Finished {
    head: ResponseHead,
    body: Bytes,
}

/// Everything the network thread owns for one upload.
struct UploadJob {
    transport: Arc<dyn HttpTransport>,
    target: UploadTarget,
    entry: Option<PreparedEntry>,
    headers: Arc<[(String, String)]>,
    chunk_size: usize,
    resumable_chunk_size: u64,
    on_progress: Option<ProgressCallback>,
    shared: Arc<SendShared>,
    cancel: CancellationToken,
}

impl UploadJob {
    fn run(self) {
        let outcome = match self.target.content_length {
            Some(total) => self.run_resumable(total),
            None => self.run_single(),
        };
        self.finish(outcome);
    }

    fn base_request(&self, method: Method, url: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, url).with_headers(&self.headers);
        if let Some(slug) = &self.target.slug {
            request = request.with_header("Slug", slug.as_str());
        }
        if let Some(etag) = self.entry.as_ref().and_then(|entry| entry.etag.as_deref()) {
            request = request.with_header("If-Match", etag);
        }
        request
    }

    /// One streamed request carrying all content, multipart when an entry is attached.
    fn run_single(&self) -> Result<Finished> {
        let request = self.base_request(self.target.method, &self.target.url);
        let (request, footer) = match &self.entry {
            Some(_) => (request.with_header("Content-Type", multipart_content_type()), Some(multipart_footer())),
            None => (request.with_header("Content-Type", self.target.content_type.as_str()), None),
        };

        let mut body = BodySource::new(self, None, footer, true);
        let head = self.transport.execute(request.with_body(RequestBody::Streamed), &mut body, &self.cancel)?;
        Ok(Finished { head, body: body.into_response() })
    }

    /// Session-initiating request, then one `PUT` per piece until the server
    /// stops answering "resume incomplete".
    fn run_resumable(&self, total: u64) -> Result<Finished> {
        let request = self
            .base_request(self.target.method, &self.target.url)
            .with_header("X-Upload-Content-Type", self.target.content_type.as_str())
            .with_header("X-Upload-Content-Length", total.to_string());
        let request = match &self.entry {
            Some(entry) => request
                .with_header("Content-Type", format!("{}; charset=UTF-8", entry.content_type))
                .with_body(RequestBody::Full(entry.body.clone())),
            None => request.with_header("Content-Length", "0"),
        };

        let mut initial = BodySource::new(self, Some(0), None, false);
        let head = self.transport.execute(request, &mut initial, &self.cancel)?;
        if !head.is_success() {
            return Ok(Finished { head, body: initial.into_response() });
        }
        if total == 0 && head.status == 201 {
            debug!("metadata-only resumable upload finished with the initial request");
            return Ok(Finished { head, body: initial.into_response() });
        }

        let mut session_url = head.location().unwrap_or(self.target.url.as_str()).to_owned();
        let mut sent = 0u64;
        loop {
            let len = next_chunk_length(total, sent, self.resumable_chunk_size);
            let request = HttpRequest::new(Method::Put, &session_url)
                .with_headers(&self.headers)
                .with_header("Content-Type", self.target.content_type.as_str())
                .with_header("Content-Length", len.to_string())
                .with_header("Content-Range", content_range_header(sent, len, total))
                .with_body(RequestBody::Streamed);
            debug!(url = %session_url, offset = sent, len, total, "sending resumable piece");

            let mut body = BodySource::new(self, Some(len), None, sent + len >= total);
            let head = self.transport.execute(request, &mut body, &self.cancel)?;
            let piece = body.sent;
            sent += piece;

            if head.status != RESUME_INCOMPLETE {
                return Ok(Finished { head, body: body.into_response() });
            }
            if sent >= total {
                return Err(Error::Protocol(format!(
                    "server expects more than the declared {total} bytes"
                )));
            }
            if piece < len {
                return Err(Error::Protocol(format!(
                    "content ended after {sent} of the declared {total} bytes"
                )));
            }
            if let Some(location) = head.location() {
                session_url = location.to_owned();
            }
        }
    }

    fn finish(&self, outcome: Result<Finished>) {
        let (phase, status, body, error) = match outcome {
            Ok(Finished { head, body }) if head.is_success() => {
                debug!(status = head.status, url = %self.target.url, "upload finished");
                (TransferPhase::Complete, Some(head.status), body, None)
            }
            Ok(Finished { head, body }) => {
                warn!(status = head.status, url = %self.target.url, "upload rejected");
                (TransferPhase::Failed, Some(head.status), Bytes::new(), Some(Error::transport(&head, body)))
            }
            Err(Error::Cancelled) => {
                debug!(url = %self.target.url, "upload cancelled");
                (TransferPhase::Cancelled, None, Bytes::new(), Some(Error::Cancelled))
            }
            Err(error) => {
                warn!(url = %self.target.url, %error, "upload aborted");
                (TransferPhase::Failed, None, Bytes::new(), Some(error))
            }
        };

        // Later writes fail fast instead of queueing into a dead upload.
        self.shared.channel.close();

        let written = {
            let mut response = self.shared.lock_response();
            response.finished = true;
            response.status = status;
            response.body = body;
            if response.error.is_none() {
                response.error = error;
            }

            let mut progress = self.shared.lock_progress();
            progress.phase = phase;
            let written = progress.caller_written();
            drop(progress);

            self.shared.chunk_written.notify_all();
            self.shared.finished.notify_all();
            written
        };

        if let Some(callback) = &self.on_progress {
            callback(&Progress { phase, bytes_transferred: written, total_bytes: self.target.content_length });
        }
    }
}

/// Feeds channel bytes into one request body and collects its response body.
struct BodySource<'a> {
    job: &'a UploadJob,
    /// Content bytes this request may still carry; `None` means until end-of-stream.
    remaining: Option<u64>,
    footer: Option<Bytes>,
    last_request: bool,
    scratch: Vec<u8>,
    /// Channel bytes handed to the transport.
    sent: u64,
    unconfirmed: u64,
    done: bool,
    response: Vec<u8>,
}

impl<'a> BodySource<'a> {
    fn new(job: &'a UploadJob, remaining: Option<u64>, footer: Option<Bytes>, last_request: bool) -> Self {
        Self {
            job,
            remaining,
            footer,
            last_request,
            scratch: vec![0; job.chunk_size],
            sent: 0,
            unconfirmed: 0,
            done: false,
            response: Vec::new(),
        }
    }

    fn end_body(&mut self) -> BodyChunk {
        if let Some(footer) = self.footer.take() {
            return BodyChunk::Data(footer);
        }
        self.done = true;
        if self.last_request {
            self.job.shared.set_phase(TransferPhase::AwaitingResponse);
        }
        BodyChunk::End
    }

    fn into_response(self) -> Bytes { Bytes::from(self.response) }
}

impl TransferEvents for BodySource<'_> {
    fn on_headers(&mut self, head: &ResponseHead) {
        trace!(status = head.status, "upload response headers");
    }

    fn on_body_chunk(&mut self, chunk: Bytes) { self.response.extend_from_slice(&chunk); }

    fn next_body_chunk(&mut self) -> BodyChunk {
        if self.done {
            return BodyChunk::End;
        }

        let want = match self.remaining {
            Some(remaining) => remaining.min(self.scratch.len() as u64) as usize,
            None => self.scratch.len(),
        };
        if want == 0 {
            return self.end_body();
        }

        // Never block here: the writer may be waiting on this very thread.
        let popped = self.job.shared.channel.pop_available(&mut self.scratch[..want]);
        if popped.len > 0 {
            let len = popped.len as u64;
            self.sent += len;
            self.unconfirmed += len;
            if let Some(remaining) = &mut self.remaining {
                *remaining -= len;
            }
            return BodyChunk::Data(Bytes::copy_from_slice(&self.scratch[..popped.len]));
        }
        if popped.reached_eof {
            return self.end_body();
        }
        BodyChunk::Pending
    }

    fn on_body_written(&mut self, len: usize) {
        // Anything past the unconfirmed channel bytes is the footer.
        let confirmed = (len as u64).min(self.unconfirmed);
        if confirmed == 0 {
            return;
        }
        self.unconfirmed -= confirmed;
        let written = self.job.shared.mark_written(confirmed);

        if let Some(callback) = &self.job.on_progress {
            callback(&Progress {
                phase: TransferPhase::Sending,
                bytes_transferred: written,
                total_bytes: self.job.target.content_length,
            });
        }
    }
}
