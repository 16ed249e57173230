//! Error types for bytebridge-transfer.

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::core::ServiceErrorKind;
use crate::data::ResponseHead;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stream already reached end-of-stream")]
    ChannelClosed,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("{kind} (HTTP {status}): {message}")]
    Transport {
        status: u16,
        kind: ServiceErrorKind,
        message: String,
        body: Bytes,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to serialize entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("invalid seek to offset {offset}")]
    InvalidSeek { offset: i128 },

    #[error("stream is closed")]
    Closed,

    #[error("failed to spawn network thread: {0}")]
    Spawn(#[source] io::Error),
}

impl Error {
    /// Build the error for a response whose status is not a success.
    pub fn transport(head: &ResponseHead, body: Bytes) -> Self {
        let kind = crate::core::classify_status(head.status);
        let message = crate::core::error_message(head.status, head.reason.as_deref(), &body);
        Error::Transport { status: head.status, kind, message, body }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, Error::Cancelled) }

    /// HTTP status carried by a transport error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<bytebridge_buffer::Error> for Error {
    fn from(e: bytebridge_buffer::Error) -> Self {
        match e {
            bytebridge_buffer::Error::ChannelClosed => Error::ChannelClosed,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        // Cancellation stays `Other`: std helpers retry `Interrupted` forever.
        let kind = match &e {
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::Closed | Error::ChannelClosed => io::ErrorKind::BrokenPipe,
            Error::InvalidSeek { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
