//! Media types used by Helm charts stored as OCI artifacts.

/// Helm chart config blob (`Chart.yaml` as JSON).
pub const HELM_CONFIG_MEDIA_TYPE: &str = "application/vnd.cncf.helm.config.v1+json";

/// Packaged chart layer.
pub const HELM_CHART_CONTENT_LAYER_MEDIA_TYPE: &str =
    "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

/// Chart layer written by Helm releases before the content type was registered.
pub const LEGACY_CHART_LAYER_MEDIA_TYPE: &str = "application/tar+gzip";

/// Detached provenance file layer.
pub const HELM_PROVENANCE_LAYER_MEDIA_TYPE: &str =
    "application/vnd.cncf.helm.chart.provenance.v1.prov";

/// OCI image manifest media type.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// `Accept` value sent when pulling a chart manifest.
pub const MANIFEST_ACCEPT: &str = OCI_IMAGE_MANIFEST_MEDIA_TYPE;

pub fn is_chart_layer(media_type: &str) -> bool {
    media_type == HELM_CHART_CONTENT_LAYER_MEDIA_TYPE || media_type == LEGACY_CHART_LAYER_MEDIA_TYPE
}
