//! Socket-backed transport for running the getter outside the sandbox.

use std::fs;
use std::sync::Arc;

use ocigetter_registry::{Body, HttpRequest, HttpResponse, Transport, TransportError};
use reqwest::blocking::Client;
use reqwest::{Certificate, Identity};
use thiserror::Error;
use tracing::debug;

use crate::getter::{GetterError, TransportFactory};
use crate::options::GetterOptions;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS material in {path}: {source}")]
    Tls {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("cert_file and key_file must be given together")]
    IncompleteIdentity,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Blocking `reqwest` client configured from [`GetterOptions`].
///
/// Redirects are not followed here; the registry client follows them itself so
/// it can decide where credentials go.
pub struct DirectTransport {
    client: Client,
}

impl DirectTransport {
    pub fn new(opts: &GetterOptions) -> Result<Self, SetupError> {
        let mut builder = Client::builder()
            .timeout(opts.timeout())
            .redirect(reqwest::redirect::Policy::none());

        if opts.insecure_skip_verify_tls() {
            debug!("TLS certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(path) = &opts.ca_file {
            let pem = read(path)?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|source| SetupError::Tls {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path, count = certs.len(), "adding CA certificates");
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        match (&opts.cert_file, &opts.key_file) {
            (Some(cert), Some(key)) => {
                let mut pem = read(cert)?;
                pem.push(b'\n');
                pem.extend(read(key)?);
                let identity = Identity::from_pem(&pem).map_err(|source| SetupError::Tls {
                    path: cert.clone(),
                    source,
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => return Err(SetupError::IncompleteIdentity),
        }

        let client = builder.build().map_err(SetupError::Client)?;
        Ok(Self { client })
    }

    /// Factory building a fresh direct transport from each getter's options.
    pub fn factory() -> TransportFactory {
        Arc::new(|opts: &GetterOptions| {
            let transport =
                DirectTransport::new(opts).map_err(|e| GetterError::Setup(Box::new(e)))?;
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }
}

impl Transport for DirectTransport {
    fn round_trip(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (parts, body) = req.into_parts();
        let url = parts.uri.to_string();
        let body = body.into_bytes().map_err(TransportError::Body)?;

        let mut builder = self
            .client
            .request(parts.method, url.as_str())
            .headers(parts.headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let resp = builder.send().map_err(|e| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let status = resp.status();
        let version = resp.version();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().map_err(|e| TransportError::Request {
            url,
            message: e.to_string(),
        })?;

        let mut out = http::Response::new(Body::Bytes(bytes.to_vec()));
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

fn read(path: &str) -> Result<Vec<u8>, SetupError> {
    fs::read(path).map_err(|source| SetupError::Read {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        assert!(DirectTransport::new(&GetterOptions::default()).is_ok());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let opts = GetterOptions {
            ca_file: Some("/nonexistent/ocigetter-ca.pem".into()),
            ..GetterOptions::default()
        };
        match DirectTransport::new(&opts) {
            Err(SetupError::Read { path, .. }) => assert_eq!(path, "/nonexistent/ocigetter-ca.pem"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn half_an_identity_is_rejected() {
        let opts = GetterOptions {
            cert_file: Some("client.pem".into()),
            ..GetterOptions::default()
        };
        assert!(matches!(
            DirectTransport::new(&opts),
            Err(SetupError::IncompleteIdentity)
        ));
    }
}
