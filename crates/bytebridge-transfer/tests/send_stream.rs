use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytebridge_transfer::core::parse_content_range;
use bytebridge_transfer::{
    BodyChunk, CancellationToken, Error, HttpRequest, HttpTransport, JsonEntry, Method, MockResponse,
    MockTransport, RequestBody, ResponseHead, Result, SendOptions, SendStream, TransferEvents,
    TransferPhase, UploadResponse, UploadTarget,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, PartialEq)]
struct Created {
    id: String,
    size: usize,
}

/// A resumable session server: the initial request opens `mock://session/N`,
/// pieces are acknowledged with 308 until the declared length has arrived.
fn resumable_server() -> Arc<MockTransport> {
    let received = Arc::new(Mutex::new(Vec::<u8>::new()));
    Arc::new(MockTransport::new(move |request| {
        if request.method != Method::Put {
            return MockResponse::new(200).with_header("Location", "mock://session/1");
        }

        let range = request.header("Content-Range").and_then(parse_content_range);
        let mut received = received.lock().unwrap();
        received.extend_from_slice(&request.body);

        match range {
            Some(range) if Some(range.end + 1) < range.total => MockResponse::new(308)
                .with_header("Range", format!("bytes=0-{}", range.end))
                .with_header("Location", format!("mock://session/{}", range.end + 1)),
            _ => MockResponse::new(201).with_body(format!(r#"{{"id":"doc-1","size":{}}}"#, received.len())),
        }
    }))
}

#[test]
fn test_resumable_upload_in_pieces() {
    let transport = resumable_server();
    let content: Vec<u8> = (0..10u8).collect();
    let target = UploadTarget::new(Method::Post, "mock://uploads", "application/octet-stream")
        .slug("blob.bin")
        .entry(JsonEntry::new(json!({ "title": "blob" })))
        .resumable(content.len() as u64);
    let mut stream = SendStream::new(transport.clone(), target, SendOptions::default().resumable_chunk_size(4));

    stream.write_all(&content).unwrap();
    stream.close().unwrap();

    let created: Created = stream.parse_response().unwrap();
    assert_eq!(created, Created { id: "doc-1".into(), size: 10 });

    let requests = transport.requests();
    assert_eq!(requests.len(), 4);

    let initial = &requests[0];
    assert_eq!(initial.method, Method::Post);
    assert_eq!(initial.header("Slug"), Some("blob.bin"));
    assert_eq!(initial.header("X-Upload-Content-Type"), Some("application/octet-stream"));
    assert_eq!(initial.header("X-Upload-Content-Length"), Some("10"));
    assert_eq!(initial.header("Content-Type"), Some("application/json; charset=UTF-8"));
    assert_eq!(initial.body, br#"{"title":"blob"}"#);

    let pieces: Vec<_> = requests[1..]
        .iter()
        .map(|r| (r.url.as_str(), r.header("Content-Range").unwrap(), r.body.clone()))
        .collect();
    assert_eq!(pieces[0], ("mock://session/1", "bytes 0-3/10", vec![0, 1, 2, 3]));
    assert_eq!(pieces[1], ("mock://session/4", "bytes 4-7/10", vec![4, 5, 6, 7]));
    assert_eq!(pieces[2], ("mock://session/8", "bytes 8-9/10", vec![8, 9]));
    assert!(requests[1..].iter().all(|r| r.method == Method::Put));
    assert_eq!(requests[3].header("Content-Length"), Some("2"));
}

#[test]
fn test_metadata_only_resumable_upload() {
    let transport = Arc::new(MockTransport::new(|_| MockResponse::new(201).with_body(r#"{"id":"m","size":0}"#)));
    let target = UploadTarget::new(Method::Post, "mock://uploads", "text/plain")
        .entry(JsonEntry::new(json!({ "title": "empty" })))
        .resumable(0);
    let mut stream = SendStream::new(transport.clone(), target, SendOptions::default());

    stream.close().unwrap();

    assert_eq!(transport.requests().len(), 1);
    assert_eq!(transport.requests()[0].header("X-Upload-Content-Length"), Some("0"));
    assert!(matches!(stream.response(), UploadResponse::Complete { status: 201, .. }));
}

#[test]
fn test_resumable_session_rejected() {
    let transport = Arc::new(MockTransport::new(|_| MockResponse::new(412).with_body("etag mismatch")));
    let target = UploadTarget::new(Method::Put, "mock://doc", "text/plain")
        .entry(JsonEntry::new(json!({})).with_etag("\"old\""))
        .resumable(3);
    let mut stream = SendStream::new(transport.clone(), target, SendOptions::default());

    // The session never opens, so the write can only fail.
    assert!(stream.write_all(b"abc").is_err());
    stream.close().unwrap();
    assert_eq!(transport.requests()[0].header("If-Match"), Some("\"old\""));
    assert_eq!(stream.response(), UploadResponse::Failed);
}

#[test]
fn test_copy_from_reader() {
    let transport = Arc::new(MockTransport::new(|request| {
        MockResponse::new(201).with_body(format!(r#"{{"id":"c","size":{}}}"#, request.body.len()))
    }));
    let target = UploadTarget::new(Method::Post, "mock://uploads", "application/octet-stream");
    let mut stream = SendStream::new(transport, target, SendOptions::default());

    let data = vec![7u8; 200_000];
    let copied = io::copy(&mut data.as_slice(), &mut stream).unwrap();
    stream.close().unwrap();

    assert_eq!(copied, 200_000);
    assert_eq!(stream.bytes_written(), 200_000);
    let created: Created = stream.parse_response().unwrap();
    assert_eq!(created.size, 200_000);
}

/// Pulls the body slowly and answers after a pause, recording pull times.
struct SlowServer {
    pull_delay: Duration,
    response_delay: Duration,
}

impl HttpTransport for SlowServer {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        assert_eq!(request.body, RequestBody::Streamed);
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match events.next_body_chunk() {
                BodyChunk::Data(chunk) => {
                    thread::sleep(self.pull_delay);
                    events.on_body_written(chunk.len());
                }
                BodyChunk::Pending => thread::sleep(Duration::from_millis(1)),
                BodyChunk::End => break,
            }
        }
        thread::sleep(self.response_delay);
        let head = ResponseHead::new(200);
        events.on_headers(&head);
        Ok(head)
    }
}

#[test]
fn test_write_waits_for_network() {
    let transport = Arc::new(SlowServer { pull_delay: Duration::from_millis(10), response_delay: Duration::ZERO });
    let target = UploadTarget::new(Method::Post, "mock://slow", "application/octet-stream");
    let mut stream = SendStream::new(transport, target, SendOptions::default().chunk_size(1024));

    let started = Instant::now();
    assert_eq!(stream.write_cancellable(&[1u8; 4096], None).unwrap(), 4096);

    // Four 1 KiB pieces, each held for 10ms before being confirmed.
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(stream.bytes_written(), 4096);
    stream.close().unwrap();
}

#[test]
fn test_close_waits_for_final_response() {
    let transport = Arc::new(SlowServer { pull_delay: Duration::ZERO, response_delay: Duration::from_millis(80) });
    let target = UploadTarget::new(Method::Post, "mock://slow", "text/plain");
    let mut stream = SendStream::new(transport, target, SendOptions::default());

    stream.write_all(b"done").unwrap();
    assert_eq!(stream.response(), UploadResponse::InProgress);

    let started = Instant::now();
    stream.close().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(stream.phase(), TransferPhase::Complete);
    assert!(matches!(stream.response(), UploadResponse::Complete { status: 200, .. }));
}

/// Accepts the request but never reads its body until cancelled.
struct StalledServer;

impl HttpTransport for StalledServer {
    fn execute(
        &self,
        _request: HttpRequest,
        _events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        while !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(2));
        }
        Err(Error::Cancelled)
    }
}

fn cancel_after(token: &CancellationToken, delay: Duration) -> thread::JoinHandle<()> {
    let token = token.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        token.cancel();
    })
}

#[test]
fn test_cancelled_write_and_close_unblock() {
    let target = UploadTarget::new(Method::Post, "mock://stalled", "text/plain");
    let mut stream = SendStream::new(Arc::new(StalledServer), target, SendOptions::default());

    let call = CancellationToken::new();
    let canceller = cancel_after(&call, Duration::from_millis(20));
    let result = stream.write_cancellable(b"never sent", Some(&call));
    canceller.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    // The write's own cancellation is not reported twice.
    let call = CancellationToken::new();
    let canceller = cancel_after(&call, Duration::from_millis(20));
    let result = stream.close_cancellable(Some(&call));
    canceller.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(stream.response(), UploadResponse::InProgress);

    stream.cancellable().cancel();
}

#[test]
fn test_write_with_cancelled_token_queues_nothing() {
    let transport = Arc::new(MockTransport::new(|_| MockResponse::new(201)));
    let target = UploadTarget::new(Method::Post, "mock://uploads", "text/plain");
    let mut stream = SendStream::new(transport.clone(), target, SendOptions::default());

    let call = CancellationToken::new();
    call.cancel();
    assert!(matches!(stream.write_cancellable(b"abc", Some(&call)), Err(Error::Cancelled)));
    assert!(stream.flush_cancellable(Some(&call)).is_ok());
    assert_eq!(stream.phase(), TransferPhase::Idle);

    // Retrying after the failed call sends the bytes exactly once.
    stream.write_all(b"abc").unwrap();
    stream.close().unwrap();
    assert_eq!(transport.requests()[0].body, b"abc");
}

/// Holds the request body back until `open` is set, then serves like `inner`.
struct GatedServer {
    open: Arc<AtomicBool>,
    inner: Arc<MockTransport>,
}

impl HttpTransport for GatedServer {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        while !self.open.load(Ordering::SeqCst) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.inner.execute(request, events, cancel)
    }
}

#[test]
fn test_cancelled_pending_write_is_not_sent() {
    let inner = Arc::new(MockTransport::new(|_| MockResponse::new(201)));
    let open = Arc::new(AtomicBool::new(false));
    let server = GatedServer { open: Arc::clone(&open), inner: Arc::clone(&inner) };
    let target = UploadTarget::new(Method::Post, "mock://gated", "text/plain");
    let mut stream = SendStream::new(Arc::new(server), target, SendOptions::default());

    let call = CancellationToken::new();
    let canceller = cancel_after(&call, Duration::from_millis(20));
    let result = stream.write_cancellable(b"dropped", Some(&call));
    canceller.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(stream.bytes_written(), 0);

    open.store(true, Ordering::SeqCst);
    stream.write_all(b"kept").unwrap();
    stream.close().unwrap();
    assert_eq!(inner.requests()[0].body, b"kept");
}

/// Fires `call` as each body piece is pulled, before confirming it.
struct CancelOnPull {
    call: CancellationToken,
    body: Mutex<Vec<u8>>,
}

impl HttpTransport for CancelOnPull {
    fn execute(
        &self,
        _request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match events.next_body_chunk() {
                BodyChunk::Data(chunk) => {
                    self.call.cancel();
                    self.body.lock().unwrap().extend_from_slice(&chunk);
                    events.on_body_written(chunk.len());
                }
                BodyChunk::Pending => thread::sleep(Duration::from_millis(1)),
                BodyChunk::End => break,
            }
        }
        let head = ResponseHead::new(201);
        events.on_headers(&head);
        Ok(head)
    }
}

#[test]
fn test_cancel_racing_confirmation_leaves_upload_healthy() {
    let call = CancellationToken::new();
    let server = Arc::new(CancelOnPull { call: call.clone(), body: Mutex::new(Vec::new()) });
    let target = UploadTarget::new(Method::Post, "mock://racing", "text/plain");
    let mut stream = SendStream::new(server.clone(), target, SendOptions::default());

    // Every byte was already picked up when the cancellation landed.
    assert_eq!(stream.write_cancellable(b"whole", Some(&call)).unwrap(), 5);
    stream.write_all(b" rest").unwrap();
    stream.close().unwrap();

    assert_eq!(*server.body.lock().unwrap(), b"whole rest");
    assert_eq!(stream.phase(), TransferPhase::Complete);
}

#[test]
fn test_stream_cancel_aborts_upload() {
    let token = CancellationToken::new();
    let target = UploadTarget::new(Method::Post, "mock://stalled", "text/plain");
    let mut stream =
        SendStream::new(Arc::new(StalledServer), target, SendOptions::default().cancellable(token.clone()));

    let canceller = cancel_after(&token, Duration::from_millis(20));
    let result = stream.write_cancellable(b"payload", None);
    canceller.join().unwrap();

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(matches!(stream.write_cancellable(b"more", None), Err(Error::Cancelled)));
    assert!(matches!(stream.close(), Err(Error::Cancelled)));
}

#[test]
fn test_dropping_unclosed_stream_aborts() {
    let transport = Arc::new(MockTransport::new(|_| MockResponse::new(201)));
    let target = UploadTarget::new(Method::Post, "mock://uploads", "text/plain");
    let mut stream = SendStream::new(transport.clone(), target, SendOptions::default());

    stream.write_all(b"half").unwrap();
    drop(stream);

    // Give the aborted network thread a moment; nothing must have been answered.
    thread::sleep(Duration::from_millis(20));
    assert!(transport.requests().is_empty());
}
