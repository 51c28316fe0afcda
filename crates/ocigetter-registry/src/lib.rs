//! Pull-only OCI registry client for Helm charts.
//!
//! This crate speaks just enough of the OCI Distribution API (`/v2`) to pull a
//! chart archive and its detached provenance file: manifest, config and layer
//! blobs, token/basic authentication challenges, and blob redirects.
//!
//! The HTTP layer is a caller-supplied blocking [`Transport`], and the crate
//! pulls in no socket, TLS or async runtime of its own, so it also builds for
//! wasm32 where every request has to go through a host-provided capability.
//!
//! # Example
//!
//! ```no_run
//! use ocigetter_registry::{ClientOptions, PullOptions, Puller, RegistryClient, Transport};
//!
//! # fn run(transport: impl Transport) -> Result<(), ocigetter_registry::RegistryError> {
//! let client = RegistryClient::new(transport, ClientOptions::default())?;
//! let result = client.pull("ghcr.io/org/charts/app:1.2.3", &PullOptions::chart())?;
//! println!("downloaded {} bytes", result.chart.map_or(0, |c| c.data.len()));
//! # Ok(()) }
//! ```

mod auth;
mod error;
mod manifest;
mod media_types;
mod oci;
mod reference;
mod transport;
mod util;

pub use auth::{Challenge, RegistryAuth};
pub use error::RegistryError;
pub use manifest::{OciDescriptor, OciImageManifest};
pub use media_types::*;
pub use oci::*;
pub use reference::{Reference, ReferenceError};
pub use transport::*;
pub use util::{auth_from_credentials, authorization_header, chart_tag, sha256_digest, verify_digest};
