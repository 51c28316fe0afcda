//! Extism guest exposing the Helm OCI getter.
//!
//! The module has no sockets: every registry request is handed to the host's
//! `http_request` function through [`ExtismHost`].
#![cfg(target_arch = "wasm32")]

mod host;
mod log;

use std::sync::Arc;

use extism_pdk::{Error, FnResult, WithReturnCode, plugin_fn};
use ocigetter::exports::STATUS_CODEC;
use ocigetter::{
    CapabilityTransport, GetterOptions, PLUGIN_HELM_GETTER, Transport, TransportFactory, lookup,
};

pub use host::ExtismHost;

/// Helm's getter entry point: `GetterPluginInput` in, `GetterPluginOutput` out.
#[plugin_fn]
pub fn pluginhelmgetter(input: Vec<u8>) -> FnResult<Vec<u8>> {
    run_export(PLUGIN_HELM_GETTER, &input)
}

/// Failures carry the export's status code back to the host.
fn run_export(name: &str, input: &[u8]) -> FnResult<Vec<u8>> {
    log::init();

    let Some(export) = lookup(name) else {
        tracing::error!(export = name, "unknown export");
        return Err(WithReturnCode::new(
            Error::msg(format!("unknown export {name}")),
            STATUS_CODEC,
        ));
    };

    let factory: TransportFactory = Arc::new(|_opts: &GetterOptions| {
        Ok(Arc::new(CapabilityTransport::new(ExtismHost)) as Arc<dyn Transport>)
    });

    export.call(input, factory).map_err(|e| {
        tracing::error!("{e}");
        let status = e.status();
        WithReturnCode::new(Error::new(e), status)
    })
}
