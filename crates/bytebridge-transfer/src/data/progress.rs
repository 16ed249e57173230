use std::fmt;

/// Lifecycle of a transfer.
///
/// Downloads move `Idle → Fetching → Complete | Failed | Cancelled`.
/// Uploads move `Idle → Sending → AwaitingResponse → Complete | Failed`, and
/// may also end `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    /// No request has been issued yet.
    #[default]
    Idle,
    /// Response body bytes are flowing into the stream.
    Fetching,
    /// Request body bytes are flowing out to the server.
    Sending,
    /// The request body is complete and the final response is outstanding.
    AwaitingResponse,
    Complete,
    Failed,
    Cancelled,
}

impl TransferPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Complete | TransferPhase::Failed | TransferPhase::Cancelled)
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPhase::Idle => write!(f, "Idle"),
            TransferPhase::Fetching => write!(f, "Fetching"),
            TransferPhase::Sending => write!(f, "Sending"),
            TransferPhase::AwaitingResponse => write!(f, "AwaitingResponse"),
            TransferPhase::Complete => write!(f, "Complete"),
            TransferPhase::Failed => write!(f, "Failed"),
            TransferPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Snapshot handed to upload progress callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub phase: TransferPhase,

    /// Caller bytes confirmed as sent.
    pub bytes_transferred: u64,

    /// Declared upload size, known only for resumable uploads.
    pub total_bytes: Option<u64>,
}

impl Progress {
    /// Percentage complete, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}
