//! Blocking HTTP transport contract used by [`RegistryClient`](crate::RegistryClient).
//!
//! The registry client never opens sockets itself. Every request is handed to a
//! [`Transport`], which may be a real HTTP client, a sandbox capability, or a
//! test fake.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use thiserror::Error;

pub type HttpRequest = http::Request<Body>;
pub type HttpResponse = http::Response<Body>;

/// Request or response payload.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

impl Body {
    /// Number of bytes in the body, when known without reading it.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Reader(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content_length() == Some(0)
    }

    /// Read the whole body into memory.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Body::Empty => Ok(Vec::new()),
            Body::Bytes(b) => Ok(b),
            Body::Reader(mut r) => {
                let mut out = Vec::new();
                r.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Reader(_) => f.write_str("Body::Reader(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value)
    }
}

impl From<&[u8]> for Body {
    fn from(value: &[u8]) -> Self {
        Body::Bytes(value.to_vec())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Bytes(value.into_bytes())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported method: {0}")]
    UnsupportedMethod(http::Method),
    #[error("failed to read body: {0}")]
    Body(#[source] io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// Send one request, receive one response.
///
/// Implementations block until the response is complete. Non-2xx statuses are
/// responses, not errors.
pub trait Transport: Send + Sync {
    fn round_trip(&self, req: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).round_trip(req)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn round_trip(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).round_trip(req)
    }
}
