//! In-memory registries and pullers shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ocigetter_registry::{
    Body, ChartConfig, HELM_CHART_CONTENT_LAYER_MEDIA_TYPE, HELM_CONFIG_MEDIA_TYPE,
    HELM_PROVENANCE_LAYER_MEDIA_TYPE, HttpRequest, HttpResponse, OciImageManifest, Payload,
    PullOptions, PullResult, Puller, RegistryError, Transport, TransportError, sha256_digest,
};

use crate::capability::{CapabilityError, HostCapability, HostRequest, HostResponse};

/// Records every pull and answers with fixed payloads.
pub struct FakePuller {
    chart: Vec<u8>,
    prov: Option<Vec<u8>>,
    calls: Mutex<Vec<(String, PullOptions)>>,
}

impl FakePuller {
    pub fn new(chart: &[u8], prov: Option<&[u8]>) -> Self {
        Self {
            chart: chart.to_vec(),
            prov: prov.map(<[u8]>::to_vec),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, PullOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

fn payload(data: &[u8]) -> Payload {
    Payload {
        digest: sha256_digest(data),
        size: data.len() as u64,
        data: data.to_vec(),
    }
}

impl Puller for FakePuller {
    fn pull(&self, reference: &str, opts: &PullOptions) -> Result<PullResult, RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push((reference.to_string(), *opts));

        let manifest: OciImageManifest = serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": HELM_CONFIG_MEDIA_TYPE,
                "digest": sha256_digest(b"{}"),
                "size": 2,
            },
            "layers": [],
        }))
        .unwrap();

        // A real client only returns what was asked for; hand back both so
        // callers are forced to pick.
        Ok(PullResult {
            reference: reference.to_string(),
            manifest_digest: sha256_digest(b"manifest"),
            manifest,
            config: ChartConfig::default(),
            chart: Some(payload(&self.chart)),
            prov: self.prov.as_deref().map(payload),
        })
    }
}

/// A registry serving fixed blobs by URL.
pub struct MemoryRegistry {
    routes: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryRegistry {
    pub const CHART: &'static [u8] = b"\x1f\x8b\x08\x00chart-archive";
    pub const PROV: &'static [u8] = b"-----BEGIN PGP SIGNED MESSAGE-----\napp-1.2.3\n";
    pub const CONFIG: &'static [u8] = br#"{"apiVersion":"v2","name":"app","version":"1.2.3"}"#;

    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `ghcr.io/org/charts/app:1.2.3` with chart and provenance layers.
    pub fn ghcr_app() -> Self {
        Self::serving("https://ghcr.io/v2/org/charts/app", "1.2.3")
    }

    pub fn serving(repository_url: &str, tag: &str) -> Self {
        let manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": HELM_CONFIG_MEDIA_TYPE,
                "digest": sha256_digest(Self::CONFIG),
                "size": Self::CONFIG.len(),
            },
            "layers": [
                {
                    "mediaType": HELM_CHART_CONTENT_LAYER_MEDIA_TYPE,
                    "digest": sha256_digest(Self::CHART),
                    "size": Self::CHART.len(),
                },
                {
                    "mediaType": HELM_PROVENANCE_LAYER_MEDIA_TYPE,
                    "digest": sha256_digest(Self::PROV),
                    "size": Self::PROV.len(),
                },
            ],
        }))
        .unwrap();

        let mut routes = HashMap::new();
        routes.insert(format!("{repository_url}/manifests/{tag}"), manifest);
        for blob in [Self::CONFIG, Self::CHART, Self::PROV] {
            routes.insert(
                format!("{repository_url}/blobs/{}", sha256_digest(blob)),
                blob.to_vec(),
            );
        }
        Self {
            routes,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MemoryRegistry {
    fn round_trip(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = req.uri().to_string();
        self.requests.lock().unwrap().push(url.clone());
        let resp = match self.routes.get(&url) {
            Some(body) => http::Response::new(Body::Bytes(body.clone())),
            None => {
                let mut resp = http::Response::new(Body::from(b"not found".to_vec()));
                *resp.status_mut() = http::StatusCode::NOT_FOUND;
                resp
            }
        };
        Ok(resp)
    }
}

/// A host whose HTTP call is served by an in-memory registry.
pub struct RegistryHost {
    registry: Arc<MemoryRegistry>,
}

impl RegistryHost {
    pub fn new(registry: Arc<MemoryRegistry>) -> Self {
        Self { registry }
    }
}

impl HostCapability for RegistryHost {
    fn send(&self, req: HostRequest) -> Result<HostResponse, CapabilityError> {
        let mut builder = http::Request::builder()
            .method(req.method.as_str())
            .uri(req.url.as_str());
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(req.body.map(Body::Bytes).unwrap_or_default())
            .map_err(|e| CapabilityError(e.to_string()))?;

        let (parts, body) = self
            .registry
            .round_trip(request)
            .map_err(|e| CapabilityError(e.to_string()))?
            .into_parts();
        Ok(HostResponse {
            status: parts.status.as_u16(),
            headers: parts
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap().to_string()))
                .collect(),
            body: body.into_bytes().unwrap(),
        })
    }
}
