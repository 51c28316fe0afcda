use std::fmt;
use std::time::{Duration, Instant};

use http::header::{ACCEPT, AUTHORIZATION, LOCATION, USER_AGENT, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::auth::{Challenge, RegistryAuth, parse_token, token_url};
use crate::error::RegistryError;
use crate::manifest::{OciDescriptor, OciImageManifest};
use crate::media_types::{
    HELM_CHART_CONTENT_LAYER_MEDIA_TYPE, HELM_CONFIG_MEDIA_TYPE, HELM_PROVENANCE_LAYER_MEDIA_TYPE,
    MANIFEST_ACCEPT, is_chart_layer,
};
use crate::reference::Reference;
use crate::transport::{Body, Transport, TransportError};
use crate::util::{authorization_header, chart_tag, sha256_digest, verify_digest};

const MAX_REDIRECTS: usize = 10;
const DEFAULT_USER_AGENT: &str = concat!("ocigetter-registry/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct ClientOptions {
    /// Talk to the registry over `http://` instead of `https://`.
    pub plain_http: bool,
    /// Deadline for a whole pull, checked before and after every request. A
    /// single request in flight is bounded only by the transport.
    pub timeout: Option<Duration>,
    pub auth: RegistryAuth,
    pub user_agent: Option<String>,
    /// `Some(false)` keeps credentials away from a token realm hosted
    /// elsewhere than the registry.
    pub pass_credentials_all: Option<bool>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            plain_http: false,
            timeout: None,
            auth: RegistryAuth::Anonymous,
            user_agent: None,
            pass_credentials_all: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = match self.auth {
            RegistryAuth::Anonymous => "anonymous",
            RegistryAuth::Basic(..) => "basic",
            RegistryAuth::Bearer(_) => "bearer",
        };
        f.debug_struct("ClientOptions")
            .field("plain_http", &self.plain_http)
            .field("timeout", &self.timeout)
            .field("auth", &auth)
            .field("user_agent", &self.user_agent)
            .field("pass_credentials_all", &self.pass_credentials_all)
            .finish()
    }
}

/// Which payloads a pull must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOptions {
    pub with_chart: bool,
    pub with_prov: bool,
    /// Treat an absent provenance layer as "no provenance" instead of an error.
    pub ignore_missing_prov: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            with_chart: true,
            with_prov: true,
            ignore_missing_prov: true,
        }
    }
}

impl PullOptions {
    /// Chart archive only.
    pub const fn chart() -> Self {
        Self {
            with_chart: true,
            with_prov: false,
            ignore_missing_prov: false,
        }
    }

    /// Provenance file only; a chart without one is an error.
    pub const fn provenance() -> Self {
        Self {
            with_chart: false,
            with_prov: true,
            ignore_missing_prov: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub digest: String,
    pub size: u64,
    pub data: Vec<u8>,
}

/// The subset of `Chart.yaml` Helm stores in the config blob.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub app_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PullResult {
    /// Fully-qualified reference that was pulled.
    pub reference: String,
    pub manifest_digest: String,
    pub manifest: OciImageManifest,
    pub config: ChartConfig,
    pub chart: Option<Payload>,
    pub prov: Option<Payload>,
}

/// Anything that can pull a chart by reference.
///
/// [`RegistryClient`] is the real implementation; callers that manage their own
/// registry sessions can supply another.
pub trait Puller: Send + Sync {
    fn pull(&self, reference: &str, opts: &PullOptions) -> Result<PullResult, RegistryError>;
}

pub struct RegistryClient<T> {
    transport: T,
    options: ClientOptions,
    user_agent: HeaderValue,
}

impl<T: Transport> RegistryClient<T> {
    pub fn new(transport: T, options: ClientOptions) -> Result<Self, RegistryError> {
        let ua = options
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = HeaderValue::from_str(ua)
            .map_err(|_| RegistryError::Config(format!("invalid user agent: {ua:?}")))?;

        Ok(Self {
            transport,
            options,
            user_agent,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn pull_chart(&self, reference: &str, opts: &PullOptions) -> Result<PullResult, RegistryError> {
        let parsed = parse_reference(reference)?;
        let scheme = if self.options.plain_http {
            "http"
        } else {
            "https"
        };
        let base_str = format!("{scheme}://{}", parsed.resolve_registry());
        let base = Url::parse(&base_str).map_err(|e| RegistryError::InvalidReference {
            reference: reference.to_string(),
            message: format!("bad registry host {base_str:?}: {e}"),
        })?;
        let target = match parsed.digest() {
            Some(digest) => digest.to_string(),
            None => parsed.tag().unwrap_or("latest").to_string(),
        };

        let mut session = Session {
            base,
            repository: parsed.repository().to_string(),
            authorization: match &self.options.auth {
                RegistryAuth::Bearer(_) => authorization_header(&self.options.auth),
                _ => None,
            },
            deadline: Deadline::start(self.options.timeout),
        };
        info!(
            reference = %parsed.whole(),
            plain_http = self.options.plain_http,
            with_chart = opts.with_chart,
            with_prov = opts.with_prov,
            "pulling chart"
        );

        let manifest_url = session.endpoint(&format!("manifests/{target}"))?;
        let (status, headers, body) =
            self.get(&mut session, manifest_url.clone(), Some(MANIFEST_ACCEPT))?;
        ensure_success(status, &manifest_url, &body)?;
        if let Some(digest) = parsed.digest() {
            verify_digest(digest, &body)?;
        }
        let manifest_digest = headers
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| sha256_digest(&body));

        let manifest: OciImageManifest =
            serde_json::from_slice(&body).map_err(|e| RegistryError::Manifest(e.to_string()))?;
        if manifest.config.media_type != HELM_CONFIG_MEDIA_TYPE {
            return Err(RegistryError::Manifest(format!(
                "config media type {:?} is not a Helm chart config",
                manifest.config.media_type
            )));
        }

        let chart_layer = single_layer(&manifest.layers, is_chart_layer)?;
        let prov_layer =
            single_layer(&manifest.layers, |m| m == HELM_PROVENANCE_LAYER_MEDIA_TYPE)?;
        if opts.with_chart && chart_layer.is_none() {
            return Err(RegistryError::MissingLayer(
                HELM_CHART_CONTENT_LAYER_MEDIA_TYPE,
            ));
        }
        if opts.with_prov && prov_layer.is_none() && !opts.ignore_missing_prov {
            return Err(RegistryError::MissingLayer(HELM_PROVENANCE_LAYER_MEDIA_TYPE));
        }

        let config_blob = self.fetch_blob(&mut session, &manifest.config)?;
        let config: ChartConfig = serde_json::from_slice(&config_blob.data)
            .map_err(|e| RegistryError::Manifest(format!("invalid chart config: {e}")))?;

        let chart = match chart_layer {
            Some(layer) if opts.with_chart => Some(self.fetch_blob(&mut session, layer)?),
            _ => None,
        };
        let prov = match prov_layer {
            Some(layer) if opts.with_prov => Some(self.fetch_blob(&mut session, layer)?),
            _ => None,
        };

        info!(
            name = %config.name,
            version = %config.version,
            digest = %manifest_digest,
            chart_bytes = chart.as_ref().map_or(0, |p| p.data.len()),
            prov_bytes = prov.as_ref().map_or(0, |p| p.data.len()),
            "pulled chart"
        );

        Ok(PullResult {
            reference: parsed.whole(),
            manifest_digest,
            manifest,
            config,
            chart,
            prov,
        })
    }

    fn fetch_blob(
        &self,
        session: &mut Session,
        desc: &OciDescriptor,
    ) -> Result<Payload, RegistryError> {
        let url = session.endpoint(&format!("blobs/{}", desc.digest))?;
        let (status, _, data) = self.get(session, url.clone(), None)?;
        ensure_success(status, &url, &data)?;
        if desc.size >= 0 && desc.size as u64 != data.len() as u64 {
            return Err(RegistryError::Manifest(format!(
                "blob {} is {} bytes, manifest says {}",
                desc.digest,
                data.len(),
                desc.size
            )));
        }
        verify_digest(&desc.digest, &data)?;
        debug!(digest = %desc.digest, bytes = data.len(), "fetched blob");

        Ok(Payload {
            digest: desc.digest.clone(),
            size: data.len() as u64,
            data,
        })
    }

    /// GET with redirect following and at most one authentication round per call.
    fn get(
        &self,
        session: &mut Session,
        mut url: Url,
        accept: Option<&'static str>,
    ) -> Result<(StatusCode, HeaderMap, Vec<u8>), RegistryError> {
        let mut hops = 0;
        let mut challenged = false;
        loop {
            session.deadline.check()?;

            let mut builder = Request::builder()
                .method(Method::GET)
                .uri(url.as_str())
                .header(USER_AGENT, self.user_agent.clone());
            if let Some(accept) = accept {
                builder = builder.header(ACCEPT, accept);
            }
            let registry_origin = same_origin(&url, &session.base);
            if registry_origin && let Some(auth) = &session.authorization {
                builder = builder.header(AUTHORIZATION, auth.clone());
            }
            let req = builder.body(Body::Empty).map_err(|e| TransportError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            debug!(%url, "GET");
            let (parts, body) = self.transport.round_trip(req)?.into_parts();
            debug!(%url, status = parts.status.as_u16(), "response");
            session.deadline.check()?;

            if parts.status == StatusCode::UNAUTHORIZED && registry_origin && !challenged {
                challenged = true;
                self.authenticate(session, &parts.headers)?;
                continue;
            }

            if parts.status.is_redirection()
                && let Some(location) = parts.headers.get(LOCATION).and_then(|v| v.to_str().ok())
            {
                hops += 1;
                if hops > MAX_REDIRECTS {
                    return Err(RegistryError::TooManyRedirects(url.to_string()));
                }
                let next = url.join(location).map_err(|e| {
                    TransportError::Malformed(format!("invalid redirect location {location:?}: {e}"))
                })?;
                debug!(from = %url, to = %next, "following redirect");
                url = next;
                continue;
            }

            let bytes = body.into_bytes().map_err(TransportError::Body)?;
            return Ok((parts.status, parts.headers, bytes));
        }
    }

    fn authenticate(&self, session: &mut Session, headers: &HeaderMap) -> Result<(), RegistryError> {
        let challenge = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(Challenge::parse)
            .ok_or_else(|| {
                RegistryError::Auth("registry answered 401 without a supported challenge".into())
            })?;

        match challenge {
            Challenge::Basic => {
                if !matches!(self.options.auth, RegistryAuth::Basic(..)) {
                    return Err(RegistryError::Auth(
                        "registry requires username and password".into(),
                    ));
                }
                debug!("answering basic challenge");
                session.authorization = authorization_header(&self.options.auth);
            }
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let scope =
                    scope.unwrap_or_else(|| format!("repository:{}:pull", session.repository));
                let url = token_url(&realm, service.as_deref(), Some(&scope))?;
                session.deadline.check()?;

                let mut builder = Request::builder()
                    .method(Method::GET)
                    .uri(url.as_str())
                    .header(USER_AGENT, self.user_agent.clone());
                if matches!(self.options.auth, RegistryAuth::Basic(..)) {
                    let same_host = url.host_str() == session.base.host_str();
                    if same_host || self.options.pass_credentials_all != Some(false) {
                        if let Some(value) = authorization_header(&self.options.auth) {
                            builder = builder.header(AUTHORIZATION, value);
                        }
                    } else {
                        debug!(%realm, "withholding credentials from token realm on another host");
                    }
                }
                let req = builder.body(Body::Empty).map_err(|e| TransportError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

                debug!(%realm, %scope, "requesting bearer token");
                let resp = self.transport.round_trip(req)?;
                session.deadline.check()?;
                let status = resp.status();
                let body = resp.into_body().into_bytes().map_err(TransportError::Body)?;
                if !status.is_success() {
                    return Err(RegistryError::Auth(format!(
                        "token endpoint {realm} returned HTTP {}",
                        status.as_u16()
                    )));
                }
                let token = parse_token(&body)?;
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| RegistryError::Auth("token is not a valid header value".into()))?;
                value.set_sensitive(true);
                session.authorization = Some(value);
            }
        }
        Ok(())
    }
}

impl<T: Transport> Puller for RegistryClient<T> {
    fn pull(&self, reference: &str, opts: &PullOptions) -> Result<PullResult, RegistryError> {
        self.pull_chart(reference, opts)
    }
}

/// Parse a chart reference, mapping `+` in the tag to `_` first.
pub fn parse_reference(reference: &str) -> Result<Reference, RegistryError> {
    let normalized = match reference.rsplit_once('/') {
        Some((repo, last)) if !reference.contains('@') => match last.split_once(':') {
            Some((name, tag)) => format!("{repo}/{name}:{}", chart_tag(tag)),
            None => reference.to_string(),
        },
        _ => reference.to_string(),
    };
    normalized
        .parse::<Reference>()
        .map_err(|e| RegistryError::InvalidReference {
            reference: reference.to_string(),
            message: e.to_string(),
        })
}

struct Session {
    base: Url,
    repository: String,
    authorization: Option<HeaderValue>,
    deadline: Deadline,
}

impl Session {
    fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        self.base
            .join(&format!("/v2/{}/{path}", self.repository))
            .map_err(|e| RegistryError::Config(format!("cannot build registry URL: {e}")))
    }
}

struct Deadline(Option<(Instant, Duration)>);

impl Deadline {
    fn start(timeout: Option<Duration>) -> Self {
        // No monotonic clock on wasm32-unknown-unknown; the host enforces its own limit there.
        if cfg!(all(target_arch = "wasm32", target_os = "unknown")) {
            return Deadline(None);
        }
        Deadline(
            timeout
                .filter(|t| !t.is_zero())
                .map(|t| (Instant::now(), t)),
        )
    }

    fn check(&self) -> Result<(), RegistryError> {
        match self.0 {
            Some((start, limit)) if start.elapsed() >= limit => {
                Err(RegistryError::DeadlineExceeded(limit))
            }
            _ => Ok(()),
        }
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn single_layer(
    layers: &[OciDescriptor],
    matches: impl Fn(&str) -> bool,
) -> Result<Option<&OciDescriptor>, RegistryError> {
    let mut found = layers.iter().filter(|l| matches(&l.media_type));
    let first = found.next();
    if let Some(dup) = found.next() {
        return Err(RegistryError::DuplicateLayer(dup.media_type.clone()));
    }
    Ok(first)
}

fn ensure_success(status: StatusCode, url: &Url, body: &[u8]) -> Result<(), RegistryError> {
    if status.is_success() {
        return Ok(());
    }
    let mut text = String::from_utf8_lossy(body).into_owned();
    if text.len() > 512 {
        let mut cut = 512;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    Err(RegistryError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        body: text,
    })
}
