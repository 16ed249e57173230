//! Production transport backed by `reqwest`.
//!
//! Each `execute` call runs a current-thread tokio runtime on the stream's
//! network thread, so the blocking stream API never needs an ambient runtime.

use std::io;
use std::time::Duration;

use bytebridge_buffer::CancellationToken;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy, StatusCode, Url};
use tokio::sync::mpsc;

use super::transport::{HttpTransport, TransferEvents};
use crate::data::{BodyChunk, HttpRequest, Method, RequestBody, ResponseHead};
use crate::error::{Error, Result};

const MAX_REDIRECTS: usize = 10;

/// How the underlying `reqwest::Client` is built.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::ClientSettings;
/// use std::time::Duration;
///
/// let settings = ClientSettings::default()
///     .user_agent("bytebridge/0.1")
///     .connect_timeout(Duration::from_secs(10));
/// assert!(settings.build().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Proxies, routed by scheme: `https` proxies carry HTTPS traffic, the rest HTTP.
    pub proxies: Option<Vec<Url>>,
    pub user_agent: Option<String>,
    pub connect_timeout: Option<Duration>,
    /// Sleep between checks of an upload channel that has nothing buffered.
    pub idle_poll_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            proxies: None,
            user_agent: None,
            connect_timeout: None,
            idle_poll_interval: Duration::from_millis(5),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn proxies(mut self, proxies: Vec<Url>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn build(&self) -> Result<Client> {
        // 308 is "resume incomplete" in the resumable upload protocol, never a redirect.
        let policy = Policy::custom(|attempt| {
            if attempt.status() == StatusCode::PERMANENT_REDIRECT {
                attempt.stop()
            } else if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        });
        let mut builder = Client::builder().redirect(policy);

        if let Some(proxies) = &self.proxies {
            let (secure, insecure): (Vec<&Url>, Vec<&Url>) =
                proxies.iter().partition(|url| url.scheme() == "https");

            for url in secure {
                let proxy = Proxy::https(url.as_str())
                    .map_err(|e| Error::Network(format!("invalid proxy URL {url}: {e}")))?;
                builder = builder.proxy(proxy);
            }
            for url in insecure {
                let proxy = Proxy::http(url.as_str())
                    .map_err(|e| Error::Network(format!("invalid proxy URL {url}: {e}")))?;
                builder = builder.proxy(proxy);
            }
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        builder.build().map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))
    }
}

/// Production HTTP transport using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    idle_poll_interval: Duration,
}

impl ReqwestTransport {
    /// Create a transport with default client settings.
    pub fn new() -> Result<Self> { Self::with_settings(&ClientSettings::default()) }

    pub fn with_settings(settings: &ClientSettings) -> Result<Self> {
        Ok(Self { client: settings.build()?, idle_poll_interval: settings.idle_poll_interval })
    }

    async fn drive(&self, request: HttpRequest, events: &mut dyn TransferEvents) -> Result<ResponseHead> {
        let mut builder = self.client.request(reqwest_method(request.method), request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = match request.body {
            RequestBody::Empty => builder.send().await.map_err(network_error)?,
            RequestBody::Full(bytes) => builder.body(bytes).send().await.map_err(network_error)?,
            RequestBody::Streamed => {
                let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(1);
                let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                let send = builder.body(reqwest::Body::wrap_stream(stream)).send();
                tokio::pin!(send);

                let mut tx = Some(tx);
                loop {
                    let feeding = tx.is_some();
                    tokio::select! {
                        response = &mut send => break response.map_err(network_error)?,
                        _ = feed_body(&mut tx, events, self.idle_poll_interval), if feeding => {}
                    }
                }
            }
        };

        let status = response.status();
        let head = ResponseHead {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_owned),
            headers: response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
                })
                .collect(),
        };
        tracing::debug!(status = head.status, url = %request.url, "response headers received");
        events.on_headers(&head);

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            events.on_body_chunk(chunk.map_err(network_error)?);
        }

        Ok(head)
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(
        &self,
        request: HttpRequest,
        events: &mut dyn TransferEvents,
        cancel: &CancellationToken,
    ) -> Result<ResponseHead> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Network(format!("failed to start HTTP runtime: {e}")))?;

        runtime.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = self.drive(request, events) => result,
            }
        })
    }
}

/// Move one step of the streamed body into the request. Dropping the sender
/// ends the body.
async fn feed_body(
    tx: &mut Option<mpsc::Sender<io::Result<Bytes>>>,
    events: &mut dyn TransferEvents,
    idle_poll_interval: Duration,
) {
    let Some(sender) = tx.as_ref() else {
        return;
    };

    match events.next_body_chunk() {
        BodyChunk::Data(chunk) => {
            let len = chunk.len();
            if sender.send(Ok(chunk)).await.is_err() {
                // The connection stopped reading the body; the response says why.
                *tx = None;
                return;
            }
            events.on_body_written(len);
        }
        BodyChunk::Pending => tokio::time::sleep(idle_poll_interval).await,
        BodyChunk::End => *tx = None,
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
    }
}

fn network_error(e: reqwest::Error) -> Error { Error::Network(e.to_string()) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_proxies() {
        let settings = ClientSettings::default().proxies(vec![
            Url::parse("https://proxy.example.com:8443").unwrap(),
            Url::parse("http://proxy.example.com:8080").unwrap(),
        ]);
        assert!(ReqwestTransport::with_settings(&settings).is_ok());
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(reqwest_method(Method::Get), reqwest::Method::GET);
        assert_eq!(reqwest_method(Method::Patch), reqwest::Method::PATCH);
    }

    #[test]
    fn test_cancelled_before_execute() {
        struct Ignore;
        impl TransferEvents for Ignore {
            fn on_headers(&mut self, _head: &ResponseHead) {}
            fn on_body_chunk(&mut self, _chunk: Bytes) {}
        }

        let transport = ReqwestTransport::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        // Port 9 on localhost is never served; cancellation must win regardless.
        let result = transport.execute(
            HttpRequest::new(Method::Get, "http://127.0.0.1:9/"),
            &mut Ignore,
            &token,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
