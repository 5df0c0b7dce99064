//! # Rockfest Net
//!
//! Request/response model and the fetch pipeline used by the Rockfest offline worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped types**: requests carry a destination, responses carry a type
//!    (`basic`, `cors`, `opaque`) so caching policy can be decided without a browser
//! 2. **One seam for the network**: everything goes through [`Fetcher`], which tests
//!    replace with scripted fetchers
//! 3. **Async HTTP**: [`HttpFetcher`] wraps a `reqwest` client

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
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

/// What the request is for, as reported by `Request.destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    /// Top-level or nested navigation.
    Document,
    Audio,
    Video,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    /// `fetch()`/XHR and anything else without a destination.
    #[default]
    Empty,
}

impl RequestDestination {
    /// Audio and video are streamed with byte ranges.
    pub fn is_media(&self) -> bool {
        matches!(self, RequestDestination::Audio | RequestDestination::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestDestination::Document => "document",
            RequestDestination::Audio => "audio",
            RequestDestination::Video => "video",
            RequestDestination::Image => "image",
            RequestDestination::Script => "script",
            RequestDestination::Style => "style",
            RequestDestination::Font => "font",
            RequestDestination::Manifest => "manifest",
            RequestDestination::Empty => "",
        }
    }
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: RequestDestination,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: RequestDestination::Empty,
            timeout: None,
        }
    }

    /// Create a navigation (GET, document destination).
    pub fn navigate(url: Url) -> Self {
        Self::get(url).destination(RequestDestination::Document)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether the request asks for a byte range.
    pub fn has_range(&self) -> bool {
        self.headers.contains_key(header::RANGE)
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Copy of this request with a fresh id, for a second trip to the network.
    pub fn fork(&self) -> Self {
        Self {
            id: RequestId::new(),
            ..self.clone()
        }
    }
}

/// Response tainting, as reported by `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin.
    #[default]
    Basic,
    /// Cross-origin with CORS.
    Cors,
    /// Cross-origin, no-cors. Status and headers are hidden.
    Opaque,
    /// Network error.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::Error => "error",
        }
    }
}

/// HTTP response. Cloning is cheap; the body is reference counted.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Whether this response was served from a cache bucket.
    pub from_cache: bool,
}

impl Response {
    /// Create a same-origin response.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    /// Create a JSON response with `Content-Type: application/json`.
    pub fn json(url: Url, status: StatusCode, value: &serde_json::Value) -> Self {
        let mut response = Self::new(url, status, value.to_string());
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed `Content-Type`.
    pub fn content_type(&self) -> Option<Mime> {
        self.header("content-type").and_then(|s| s.parse().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network, as seen by the worker.
///
/// Resolves with a response for any HTTP status; only transport failures are errors.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>>;
}
