//! Plain data passed between the caller, the streams and the transports.
//!
//! Nothing in here performs I/O. Option builders, request and response
//! descriptions, entry serialization and progress snapshots all live here so
//! the same types can be shared by every transport implementation.

pub mod entry;
pub mod http;
pub mod options;
pub mod progress;
pub mod upload;

pub use entry::{Entry, JsonEntry, parse_json};
pub use http::{BodyChunk, ContentInfo, HttpRequest, Method, RequestBody, ResponseHead};
pub use options::{DEFAULT_CHUNK_SIZE, FetchOptions, SendOptions};
pub use progress::{Progress, TransferPhase};
pub use upload::UploadTarget;
