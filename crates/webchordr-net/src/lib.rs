//! # webchordr Net
//!
//! Request and response model used by the offline cache, plus the seam
//! through which it reaches the network.
//!
//! A [`Response`] body can only be handed out once by a real transport, yet the
//! cache has to both return it and store it. Bodies are therefore kept as
//! [`Bytes`] and [`Response::duplicate`] produces an independent copy without
//! consuming the original.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{HttpNetwork, LoaderConfig};

/// Errors that can occur while fetching.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// An outbound request as issued by the application.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request with the given method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// How a response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin response, delivered without a redirect.
    Basic,
    /// Cross-origin response whose contents the cache must not trust.
    Opaque,
    /// Network error placeholder.
    Error,
    /// Same-origin response reached through one or more redirects.
    Redirect,
}

impl ResponseKind {
    /// Whether a response of this kind and status may be written to the cache.
    pub fn is_storable(self, status: StatusCode) -> bool {
        self == ResponseKind::Basic && status == StatusCode::OK
    }
}

/// A response snapshot: status, headers and the fully read body.
#[derive(Debug, PartialEq)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub kind: ResponseKind,
    body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(url: Url, status: StatusCode, kind: ResponseKind, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            kind,
            body: body.into(),
        }
    }

    /// Create a `200 OK` basic response.
    pub fn basic(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(url, StatusCode::OK, ResponseKind::Basic, body)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this response may be written to the cache.
    pub fn is_storable(&self) -> bool {
        self.kind.is_storable(self.status)
    }

    /// The response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Copy the response without consuming it.
    pub fn duplicate(&self) -> Self {
        Self {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            kind: self.kind,
            body: self.body.clone(),
        }
    }
}

/// Transport used to reach the network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Send the request unchanged and return the genuine response.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}
