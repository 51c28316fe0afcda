use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("invalid reference {reference:?}: {message}")]
    InvalidReference { reference: String, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("registry returned HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("manifest does not contain a layer with media type {0}")]
    MissingLayer(&'static str),
    #[error("manifest has more than one layer with media type {0}")]
    DuplicateLayer(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),
}
