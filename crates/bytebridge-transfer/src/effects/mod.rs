//! Everything that touches threads or the network.

mod fetch;
mod mock;
mod send;
mod transport;

#[cfg(feature = "reqwest")]
mod http;

pub use fetch::FetchStream;
pub use mock::{MockResponse, MockTransport, RecordedRequest};
pub use send::{SendStream, UploadResponse};
pub use transport::{HttpTransport, TransferEvents};

#[cfg(feature = "reqwest")]
pub use http::{ClientSettings, ReqwestTransport};
