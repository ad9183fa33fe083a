//! # Hypercat Net
//!
//! Request/response model, network transport, and request interception for the
//! Hypercat offline cache.
//!
//! ## Design Goals
//!
//! 1. **Single-read bodies**: a [`Response`] body is consumed by value; sharing it
//!    between the page and the cache requires an explicit [`Response::tee`]
//! 2. **Pluggable transport**: the engine talks to the network through [`Fetcher`]
//! 3. **Request interception**: a handler may answer a request or let it pass
//!    through to the network untouched

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use hypercat_common::HypercatError;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod intercept;
pub mod loader;

pub use intercept::{InterceptAction, InterceptHandler, Intercepted, RequestInterceptor, ResponseSource};
pub use loader::{Fetcher, HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Body read failed: {0}")]
    BodyRead(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<HypercatError> for NetError {
    fn from(err: HypercatError) -> Self {
        match err {
            HypercatError::Timeout(after) => NetError::Timeout(after),
            other => NetError::RequestFailed(other.to_string()),
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An outgoing page request.
///
/// The URL is kept exactly as the page issued it. Parsing happens at the point
/// of use so that a malformed URL can be classified instead of rejected.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request with the given method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the `Accept` header. Invalid header values are ignored.
    pub fn accept(mut self, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.insert(ACCEPT, v);
        }
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The `Accept` header, if present and valid UTF-8.
    pub fn accept_header(&self) -> Option<&str> {
        self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
    }

    /// Parse the request URL.
    pub fn parse_url(&self) -> Result<Url, NetError> {
        Url::parse(&self.url).map_err(|e| NetError::InvalidUrl(format!("{}: {}", self.url, e)))
    }
}

/// How much of a response the page may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response whose status and body are hidden.
    Opaque,
    /// Constructed locally rather than fetched.
    Synthetic,
}

/// Response body variants.
#[derive(Debug)]
enum ResponseBody {
    /// Full body already loaded.
    Full(Bytes),
    /// Streaming body, readable once.
    Stream(mpsc::Receiver<Result<Bytes, NetError>>),
    /// Empty.
    Empty,
}

/// HTTP response.
///
/// Deliberately not `Clone`: reading the body consumes the response.
#[derive(Debug)]
pub struct Response {
    pub url: Option<Url>,
    /// Status code; `0` for opaque responses.
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: ResponseBody,
}

impl Response {
    /// Create a response with a fully loaded body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            url: None,
            status,
            status_text: default_status_text(status).to_string(),
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            body: if body.is_empty() {
                ResponseBody::Empty
            } else {
                ResponseBody::Full(body)
            },
        }
    }

    /// Create a response without a body.
    pub fn empty(status: u16) -> Self {
        Self::new(status, Bytes::new())
    }

    /// Create a response whose body arrives in chunks.
    pub fn streaming(status: u16, chunks: mpsc::Receiver<Result<Bytes, NetError>>) -> Self {
        Self {
            body: ResponseBody::Stream(chunks),
            ..Self::empty(status)
        }
    }

    /// Create an opaque cross-origin response.
    pub fn opaque(body: impl Into<Bytes>) -> Self {
        Self {
            status_text: String::new(),
            response_type: ResponseType::Opaque,
            ..Self::new(0, body)
        }
    }

    /// Add a header. Invalid header values are ignored.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
        self
    }

    /// Set the status text.
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Check if the status is in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if this is an opaque response.
    pub fn is_opaque(&self) -> bool {
        self.response_type == ResponseType::Opaque
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get content-type from headers.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Read the body to completion, consuming the response.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        read_body(self.body).await
    }

    /// Read the body as UTF-8 text.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::BodyRead(e.to_string()))
    }

    /// Split into two independent responses with identical status, headers and body.
    ///
    /// A streaming body is buffered once; both halves then share the same bytes.
    pub async fn tee(self) -> Result<(Response, Response), NetError> {
        let Response {
            url,
            status,
            status_text,
            headers,
            response_type,
            body,
        } = self;

        let body = match read_body(body).await? {
            b if b.is_empty() => ResponseBody::Empty,
            b => ResponseBody::Full(b),
        };
        let copy = match &body {
            ResponseBody::Full(b) => ResponseBody::Full(b.clone()),
            _ => ResponseBody::Empty,
        };

        let first = Response {
            url: url.clone(),
            status,
            status_text: status_text.clone(),
            headers: headers.clone(),
            response_type,
            body,
        };
        let second = Response {
            url,
            status,
            status_text,
            headers,
            response_type,
            body: copy,
        };
        Ok((first, second))
    }
}

async fn read_body(body: ResponseBody) -> Result<Bytes, NetError> {
    match body {
        ResponseBody::Full(b) => Ok(b),
        ResponseBody::Stream(mut rx) => {
            let mut buf = BytesMut::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok(buf.freeze())
        }
        ResponseBody::Empty => Ok(Bytes::new()),
    }
}

fn default_status_text(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
