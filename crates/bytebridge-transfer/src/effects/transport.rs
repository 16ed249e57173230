use std::sync::Arc;

use bytebridge_buffer::CancellationToken;
use bytes::Bytes;

use crate::data::{BodyChunk, HttpRequest, ResponseHead};
use crate::error::Result;

/// Callbacks a transport drives while executing one request.
///
/// All methods run on the thread that called [`HttpTransport::execute`].
pub trait TransferEvents {
    /// Status and headers of the response arrived.
    fn on_headers(&mut self, head: &ResponseHead);

    /// A piece of the response body arrived.
    fn on_body_chunk(&mut self, chunk: Bytes);

    /// Next piece of a [`RequestBody::Streamed`](crate::RequestBody::Streamed) body.
    fn next_body_chunk(&mut self) -> BodyChunk { BodyChunk::End }

    /// `len` bytes of streamed request body were handed to the connection.
    fn on_body_written(&mut self, _len: usize) {}
}

/// Blocking HTTP client abstraction.
///
/// `execute` runs one request to completion on the calling thread, which is
/// always a stream's dedicated network thread. Implementations must return
/// `Err(Error::Cancelled)` promptly once `cancel` fires, and must deliver
/// every response body chunk through `events` before returning.
///
/// # Implementations
///
/// - [`ReqwestTransport`](crate::ReqwestTransport): production implementation using `reqwest`
/// - [`MockTransport`](crate::MockTransport): in-memory server for tests
pub trait HttpTransport: Send + Sync + 'static {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        (**self).execute(request, events, cancel)
    }
}

impl<T: HttpTransport + ?Sized> HttpTransport for Box<T> {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        (**self).execute(request, events, cancel)
    }
}
