//! Helm getter for `oci://` chart references.
//!
//! The getter resolves a chart locator to a registry reference, pulls the
//! chart (or its provenance file) with [`ocigetter_registry`], and returns the
//! raw bytes. All network traffic goes through a [`Transport`] built once per
//! getter: inside a plugin sandbox that is a [`CapabilityTransport`] over the
//! host's HTTP call, natively it is a [`DirectTransport`].
//!
//! Plugin hosts drive the getter through the [`exports`] table.

mod capability;
#[cfg(not(target_arch = "wasm32"))]
mod direct;
mod envelope;
pub mod exports;
mod getter;
mod options;
#[cfg(test)]
mod testing;

pub use capability::{
    CapabilityError, CapabilityTransport, HostCapability, HostMethod, HostRequest, HostResponse,
};
#[cfg(not(target_arch = "wasm32"))]
pub use direct::{DirectTransport, SetupError};
pub use envelope::{GetterPluginInput, GetterPluginOutput};
pub use exports::{EXPORTS, Export, ExportError, PLUGIN_HELM_GETTER, handle, lookup, run_getter};
pub use getter::{
    Directive, GetterError, OCI_SCHEME, OciGetter, Resolved, TransportFactory, resolve,
};
pub use options::GetterOptions;

pub use ocigetter_registry::Transport;
