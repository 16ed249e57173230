//! Transport-neutral request and response descriptions.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::core::{ContentRange, parse_content_range};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::Unsupported("HTTP method")),
        }
    }
}

/// Where the request body comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// A body known up front.
    Full(Bytes),
    /// A body pulled chunk by chunk through [`TransferEvents::next_body_chunk`].
    ///
    /// [`TransferEvents::next_body_chunk`]: crate::TransferEvents::next_body_chunk
    Streamed,
}

/// One step of a streamed request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk {
    Data(Bytes),
    /// Nothing to send yet; ask again later.
    Pending,
    /// The body is complete.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: RequestBody::Empty }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append every header in `headers`.
    #[must_use]
    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// First value of the header called `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> { find_header(&self.headers, name) }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self { Self { status, reason: None, headers: Vec::new() } }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool { crate::core::is_success(self.status) }

    pub fn header(&self, name: &str) -> Option<&str> { find_header(&self.headers, name) }

    pub fn content_type(&self) -> Option<&str> { self.header("Content-Type") }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    pub fn content_range(&self) -> Option<ContentRange> {
        self.header("Content-Range").and_then(parse_content_range)
    }

    pub fn location(&self) -> Option<&str> { self.header("Location") }

    /// Size of the whole resource, preferring the `Content-Range` total over
    /// `Content-Length` for partial responses.
    pub fn resource_length(&self) -> Option<u64> {
        self.content_range().and_then(|range| range.total).or_else(|| self.content_length())
    }
}

/// Content metadata captured from a successful download response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentInfo {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
