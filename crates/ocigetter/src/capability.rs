//! HTTP over a host capability.
//!
//! Inside the sandbox the module cannot open sockets. The host exposes a single
//! blocking "perform this request" call instead; [`CapabilityTransport`] adapts
//! that call to the registry client's [`Transport`] contract.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use ocigetter_registry::{Body, HttpRequest, HttpResponse, Transport, TransportError};
use thiserror::Error;
use tracing::debug;

/// Methods the host capability can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMethod {
    Get,
    Head,
}

impl HostMethod {
    pub fn from_method(method: &Method) -> Option<Self> {
        if method == Method::GET {
            Some(HostMethod::Get)
        } else if method == Method::HEAD {
            Some(HostMethod::Head)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostMethod::Get => "GET",
            HostMethod::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRequest {
    pub method: HostMethod,
    pub url: String,
    /// One entry per header value; names may repeat.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
#[error("host http request failed: {0}")]
pub struct CapabilityError(pub String);

/// The host's network primitive: one complete request in, one complete
/// response out, blocking the caller.
pub trait HostCapability: Send + Sync {
    fn send(&self, req: HostRequest) -> Result<HostResponse, CapabilityError>;
}

pub struct CapabilityTransport<H> {
    host: H,
}

impl<H: HostCapability> CapabilityTransport<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &H {
        &self.host
    }
}

impl<H: HostCapability> Transport for CapabilityTransport<H> {
    fn round_trip(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (parts, body) = req.into_parts();
        let method = HostMethod::from_method(&parts.method)
            .ok_or_else(|| TransportError::UnsupportedMethod(parts.method.clone()))?;
        let url = parts.uri.to_string();

        let mut headers = Vec::with_capacity(parts.headers.len());
        for (name, value) in &parts.headers {
            let value = value.to_str().map_err(|_| TransportError::Request {
                url: url.clone(),
                message: format!("header {name} is not valid text"),
            })?;
            headers.push((name.as_str().to_string(), value.to_string()));
        }

        // The host takes complete buffers only.
        let body = if carries_body(&parts.method) {
            Some(body.into_bytes().map_err(TransportError::Body)?)
        } else {
            None
        };

        debug!(method = method.as_str(), %url, "forwarding request to host");
        let resp = self
            .host
            .send(HostRequest {
                method,
                url: url.clone(),
                headers,
                body,
            })
            .map_err(|e| TransportError::Request {
                url,
                message: e.to_string(),
            })?;

        into_response(resp)
    }
}

fn carries_body(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::POST
}

fn into_response(resp: HostResponse) -> Result<HttpResponse, TransportError> {
    let status = StatusCode::from_u16(resp.status)
        .map_err(|_| TransportError::Malformed(format!("invalid status code {}", resp.status)))?;

    let mut headers = HeaderMap::with_capacity(resp.headers.len());
    for (name, value) in resp.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::Malformed(format!("invalid header name {name:?}")))?;
        let header_value = HeaderValue::from_str(&value)
            .map_err(|_| TransportError::Malformed(format!("invalid value for header {name}")))?;
        headers.append(header_name, header_value);
    }

    // The host does not report the protocol version.
    let mut out = http::Response::new(Body::Bytes(resp.body));
    *out.status_mut() = status;
    *out.version_mut() = Version::HTTP_11;
    *out.headers_mut() = headers;
    Ok(out)
}
