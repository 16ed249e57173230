//! Blocking byte streams over HTTP transfers.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Options, request/response descriptions and entries
//! - [`core`] - Pure header formatting, framing and status classification
//! - [`effects`] - Network threads, the streams and the transports behind them
//!
//! # Key Features
//!
//! - **Thread per transfer**: [`FetchStream`] and [`SendStream`] each drive
//!   their HTTP exchange on a dedicated thread and meet the caller at a
//!   [`BoundedByteChannel`](bytebridge_buffer::BoundedByteChannel)
//! - **Plain std I/O**: the streams implement [`std::io::Read`] + [`std::io::Seek`]
//!   and [`std::io::Write`], so `std::io::copy` splices them with files
//! - **Cooperative cancellation**: every blocking call has a `_cancellable`
//!   form taking a [`CancellationToken`]
//! - **Resumable uploads**: declaring a content length switches uploads to the
//!   session protocol, sent in pieces of at most 512 KiB
//! - **Transport seam**: [`HttpTransport`] with a reqwest implementation and
//!   an in-memory [`MockTransport`]

pub mod core;
pub mod data;
mod effects;
mod error;

pub use bytebridge_buffer::{CancelGuard, CancellationToken};
pub use data::{
    BodyChunk, ContentInfo, Entry, FetchOptions, HttpRequest, JsonEntry, Method, Progress, RequestBody,
    ResponseHead, SendOptions, TransferPhase, UploadTarget,
};
pub use effects::{
    FetchStream, HttpTransport, MockResponse, MockTransport, RecordedRequest, SendStream, TransferEvents,
    UploadResponse,
};

#[cfg(feature = "reqwest")]
pub use effects::{ClientSettings, ReqwestTransport};

pub use crate::core::ServiceErrorKind;
pub use error::{Error, Result};
