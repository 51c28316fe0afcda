//! Named operations exposed to plugin hosts.
//!
//! Every export takes a JSON envelope and returns a JSON envelope. Failures are
//! reported as a status code plus message instead of a response.

use thiserror::Error;
use tracing::{error, info};

use crate::envelope::{GetterPluginInput, GetterPluginOutput};
use crate::getter::{GetterError, OciGetter, TransportFactory};

pub const STATUS_OK: i32 = 0;
/// The envelope could not be decoded or encoded.
pub const STATUS_CODEC: i32 = 1;
/// The fetch itself failed.
pub const STATUS_FETCH: i32 = 2;

/// Export Helm calls for `oci://` downloads.
pub const PLUGIN_HELM_GETTER: &str = "pluginhelmgetter";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid input: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to fetch {href}: {source}")]
    Fetch {
        href: String,
        #[source]
        source: GetterError,
    },
    #[error("failed to encode output: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ExportError {
    pub fn status(&self) -> i32 {
        match self {
            ExportError::Decode(_) | ExportError::Encode(_) => STATUS_CODEC,
            ExportError::Fetch { .. } => STATUS_FETCH,
        }
    }
}

pub type Handler = fn(&[u8], TransportFactory) -> Result<Vec<u8>, ExportError>;

/// One entry in the export table.
pub struct Export {
    pub name: &'static str,
    pub summary: &'static str,
    /// Envelope type names, for listing.
    pub input: &'static str,
    pub output: &'static str,
    handler: Handler,
}

impl Export {
    pub fn call(&self, input: &[u8], factory: TransportFactory) -> Result<Vec<u8>, ExportError> {
        (self.handler)(input, factory)
    }
}

pub static EXPORTS: &[Export] = &[Export {
    name: PLUGIN_HELM_GETTER,
    summary: "Download a chart or provenance file from an OCI registry",
    input: "GetterPluginInput",
    output: "GetterPluginOutput",
    handler: handle,
}];

pub fn lookup(name: &str) -> Option<&'static Export> {
    EXPORTS.iter().find(|e| e.name == name)
}

/// Fetch `input.href` with a getter built from `input.options`.
pub fn run_getter(
    input: GetterPluginInput,
    factory: TransportFactory,
) -> Result<GetterPluginOutput, GetterError> {
    let getter = OciGetter::new(input.options, factory);
    let chart_data = getter.get(&input.href)?;
    Ok(GetterPluginOutput { chart_data })
}

/// Decode a [`GetterPluginInput`], fetch, and encode a [`GetterPluginOutput`].
pub fn handle(input: &[u8], factory: TransportFactory) -> Result<Vec<u8>, ExportError> {
    let input: GetterPluginInput = serde_json::from_slice(input).map_err(|e| {
        error!(error = %e, "failed to decode getter input");
        ExportError::Decode(e)
    })?;
    let href = input.href.clone();
    info!(%href, "fetching");

    let output = run_getter(input, factory).map_err(|source| {
        error!(%href, error = %source, "fetch failed");
        ExportError::Fetch {
            href: href.clone(),
            source,
        }
    })?;
    info!(%href, bytes = output.chart_data.len(), "fetched");

    serde_json::to_vec(&output).map_err(ExportError::Encode)
}
