//! Locator resolution and pull dispatch.

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use ocigetter_registry::{
    ClientOptions, PullOptions, PullResult, Puller, RegistryClient, RegistryError, Transport,
    auth_from_credentials,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::options::GetterOptions;

/// Locator scheme handled by this getter.
pub const OCI_SCHEME: &str = "oci";

const PROV_SUFFIX: &str = ".prov";

/// Builds the transport a getter pulls through.
pub type TransportFactory =
    Arc<dyn Fn(&GetterOptions) -> Result<Arc<dyn Transport>, GetterError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum GetterError {
    #[error("failed to set up transport: {0}")]
    Setup(#[source] Box<dyn StdError + Send + Sync>),
    #[error("no transport configured")]
    NoTransport,
    #[error("failed to create registry client: {0}")]
    Client(#[source] RegistryError),
    #[error("failed to pull {href}: {source}")]
    Pull {
        href: String,
        #[source]
        source: RegistryError,
    },
    #[error("pull of {reference} returned no {directive} payload")]
    MissingPayload {
        reference: String,
        directive: Directive,
    },
}

/// Which payload a fetch returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Chart,
    Provenance,
}

impl Directive {
    pub fn pull_options(self) -> PullOptions {
        match self {
            Directive::Chart => PullOptions::chart(),
            Directive::Provenance => PullOptions::provenance(),
        }
    }

    /// Take exactly this directive's payload out of a pull result.
    pub fn extract(self, result: PullResult) -> Option<Vec<u8>> {
        let (wanted, other) = match self {
            Directive::Chart => (result.chart, result.prov),
            Directive::Provenance => (result.prov, result.chart),
        };
        if other.is_some() {
            debug!(directive = %self, "ignoring payload outside the active directive");
        }
        wanted.map(|p| p.data)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Directive::Chart => "chart",
            Directive::Provenance => "provenance",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub reference: String,
    pub directive: Directive,
}

/// Turn a locator into a registry reference and directive.
///
/// The `oci://` prefix and then a `.prov` suffix are stripped; `version` is
/// appended as a tag only when the last path segment carries none.
pub fn resolve(href: &str, version: Option<&str>) -> Resolved {
    let trimmed = href
        .strip_prefix(OCI_SCHEME)
        .and_then(|rest| rest.strip_prefix("://"))
        .unwrap_or(href);

    let (base, directive) = match trimmed.strip_suffix(PROV_SUFFIX) {
        Some(base) => (base, Directive::Provenance),
        None => (trimmed, Directive::Chart),
    };

    let last_segment = base
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let reference = match version {
        Some(version) if !last_segment.contains(':') => format!("{base}:{version}"),
        _ => base.to_string(),
    };

    Resolved {
        reference,
        directive,
    }
}

/// Fetches charts and provenance files from OCI registries.
pub struct OciGetter {
    opts: GetterOptions,
    registry_client: Option<Arc<dyn Puller>>,
    make_transport: Option<TransportFactory>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
}

impl OciGetter {
    /// The transport is built on first use, once per getter.
    pub fn new(opts: GetterOptions, make_transport: TransportFactory) -> Self {
        Self {
            opts,
            registry_client: None,
            make_transport: Some(make_transport),
            transport: Mutex::new(None),
        }
    }

    pub fn with_transport(opts: GetterOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            opts,
            registry_client: None,
            make_transport: None,
            transport: Mutex::new(Some(transport)),
        }
    }

    /// Use a caller-owned client, e.g. one carrying its own credentials.
    pub fn with_registry_client(opts: GetterOptions, client: Arc<dyn Puller>) -> Self {
        Self {
            opts,
            registry_client: Some(client),
            make_transport: None,
            transport: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &GetterOptions {
        &self.opts
    }

    pub fn get(&self, href: &str) -> Result<Vec<u8>, GetterError> {
        let resolved = resolve(href, self.opts.version());
        debug!(
            href,
            reference = %resolved.reference,
            directive = %resolved.directive,
            "resolved chart reference"
        );

        let pull_opts = resolved.directive.pull_options();
        let result = match &self.registry_client {
            Some(client) => client.pull(&resolved.reference, &pull_opts),
            None => self
                .new_registry_client()?
                .pull(&resolved.reference, &pull_opts),
        }
        .map_err(|source| GetterError::Pull {
            href: href.to_string(),
            source,
        })?;

        resolved
            .directive
            .extract(result)
            .ok_or(GetterError::MissingPayload {
                reference: resolved.reference,
                directive: resolved.directive,
            })
    }

    pub fn new_registry_client(&self) -> Result<RegistryClient<Arc<dyn Transport>>, GetterError> {
        if self.opts.ca_file.is_some()
            || self.opts.cert_file.is_some()
            || self.opts.insecure_skip_verify_tls.is_some()
        {
            debug!("TLS options are applied by the transport");
        }

        let options = ClientOptions {
            plain_http: self.opts.plain_http,
            timeout: self.opts.timeout(),
            auth: auth_from_credentials(
                self.opts.username.as_deref(),
                self.opts.password.as_deref(),
            ),
            user_agent: self.opts.user_agent.clone(),
            pass_credentials_all: self.opts.pass_credentials_all,
        };
        if self.opts.username.is_some() != self.opts.password.is_some() {
            warn!("ignoring incomplete credentials: username and password must both be set");
        }

        RegistryClient::new(self.transport()?, options).map_err(GetterError::Client)
    }

    /// The shared transport, constructing it if this is the first call.
    fn transport(&self) -> Result<Arc<dyn Transport>, GetterError> {
        // The slot only ever holds a complete transport, so a poisoned lock is still usable.
        let mut slot = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(transport) = slot.as_ref() {
            return Ok(transport.clone());
        }
        let make = self.make_transport.as_ref().ok_or(GetterError::NoTransport)?;
        let transport = make(&self.opts)?;
        debug!("transport initialized");
        *slot = Some(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityTransport;
    use crate::testing::{FakePuller, MemoryRegistry, RegistryHost};
    use ocigetter_registry::sha256_digest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn appends_version_when_untagged() {
        let r = resolve("oci://ghcr.io/org/charts/app", Some("1.2.3"));
        assert_eq!(r.reference, "ghcr.io/org/charts/app:1.2.3");
        assert_eq!(r.directive, Directive::Chart);
    }

    #[test]
    fn explicit_tag_wins_over_version() {
        for version in [Some("9.9.9"), Some(""), None] {
            let r = resolve("oci://ghcr.io/org/charts/app:1.0.0", version);
            assert_eq!(r.reference, "ghcr.io/org/charts/app:1.0.0");
        }
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let r = resolve("oci://localhost:5000/charts/app", Some("0.1.0"));
        assert_eq!(r.reference, "localhost:5000/charts/app:0.1.0");
    }

    #[test]
    fn prov_suffix_is_stripped_once_before_versioning() {
        let r = resolve("oci://ghcr.io/org/charts/app.prov", None);
        assert_eq!(r.reference, "ghcr.io/org/charts/app");
        assert_eq!(r.directive, Directive::Provenance);

        let r = resolve("oci://ghcr.io/org/charts/app.prov", Some("1.2.3"));
        assert_eq!(r.reference, "ghcr.io/org/charts/app:1.2.3");
        assert_eq!(r.directive, Directive::Provenance);

        let r = resolve("oci://ghcr.io/org/charts/app:1.0.0.prov", Some("1.2.3"));
        assert_eq!(r.reference, "ghcr.io/org/charts/app:1.0.0");

        let r = resolve("oci://ghcr.io/org/charts/app.prov.prov", None);
        assert_eq!(r.reference, "ghcr.io/org/charts/app.prov");
        assert_eq!(r.directive, Directive::Provenance);
    }

    #[test]
    fn missing_scheme_is_tolerated() {
        let r = resolve("ghcr.io/org/charts/app", Some("1.2.3"));
        assert_eq!(r.reference, "ghcr.io/org/charts/app:1.2.3");

        let r = resolve("https://ghcr.io/org/charts/app:1.0.0", None);
        assert_eq!(r.reference, "https://ghcr.io/org/charts/app:1.0.0");
    }

    #[test]
    fn chart_directive_returns_chart_bytes() {
        let puller = Arc::new(FakePuller::new(b"chart", Some(b"prov")));
        let opts = GetterOptions {
            version: Some("1.2.3".into()),
            ..GetterOptions::default()
        };
        let getter = OciGetter::with_registry_client(opts, puller.clone());

        let data = getter.get("oci://ghcr.io/org/charts/app").unwrap();
        assert_eq!(data, b"chart");
        assert_eq!(
            puller.calls(),
            [("ghcr.io/org/charts/app:1.2.3".to_string(), PullOptions::chart())]
        );
    }

    #[test]
    fn prov_directive_returns_provenance_bytes() {
        let puller = Arc::new(FakePuller::new(b"chart", Some(b"prov")));
        let getter = OciGetter::with_registry_client(GetterOptions::default(), puller.clone());

        let data = getter.get("oci://ghcr.io/org/charts/app.prov").unwrap();
        assert_eq!(data, b"prov");
        assert_eq!(
            puller.calls(),
            [("ghcr.io/org/charts/app".to_string(), PullOptions::provenance())]
        );
    }

    #[test]
    fn absent_payload_is_an_error() {
        let puller = Arc::new(FakePuller::new(b"chart", None));
        let getter = OciGetter::with_registry_client(GetterOptions::default(), puller);
        let err = getter.get("oci://ghcr.io/org/charts/app:1.0.0.prov").unwrap_err();
        assert!(matches!(
            err,
            GetterError::MissingPayload {
                directive: Directive::Provenance,
                ..
            }
        ));
    }

    #[test]
    fn pull_errors_carry_the_href() {
        let getter = OciGetter::with_transport(
            GetterOptions::default(),
            Arc::new(MemoryRegistry::empty()),
        );
        let err = getter.get("oci://ghcr.io/org/charts/missing:0.1.0").unwrap_err();
        match &err {
            GetterError::Pull { href, source } => {
                assert_eq!(href, "oci://ghcr.io/org/charts/missing:0.1.0");
                assert!(matches!(source, RegistryError::Status { status: 404, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("oci://ghcr.io/org/charts/missing:0.1.0"));
    }

    #[test]
    fn pulls_through_registry_client() {
        let getter = OciGetter::with_transport(
            GetterOptions {
                version: Some("1.2.3".into()),
                ..GetterOptions::default()
            },
            Arc::new(MemoryRegistry::ghcr_app()),
        );
        assert_eq!(
            getter.get("oci://ghcr.io/org/charts/app").unwrap(),
            MemoryRegistry::CHART
        );
        assert_eq!(
            getter.get("oci://ghcr.io/org/charts/app.prov").unwrap(),
            MemoryRegistry::PROV
        );
    }

    #[test]
    fn pulls_through_host_capability() {
        let registry = Arc::new(MemoryRegistry::ghcr_app());
        let transport = CapabilityTransport::new(RegistryHost::new(registry.clone()));
        let getter = OciGetter::with_transport(
            GetterOptions {
                version: Some("1.2.3".into()),
                ..GetterOptions::default()
            },
            Arc::new(transport),
        );

        assert_eq!(
            getter.get("oci://ghcr.io/org/charts/app").unwrap(),
            MemoryRegistry::CHART
        );
        let chart_requests = registry.requests();
        assert_eq!(
            chart_requests,
            [
                "https://ghcr.io/v2/org/charts/app/manifests/1.2.3".to_string(),
                format!(
                    "https://ghcr.io/v2/org/charts/app/blobs/{}",
                    sha256_digest(MemoryRegistry::CONFIG)
                ),
                format!(
                    "https://ghcr.io/v2/org/charts/app/blobs/{}",
                    sha256_digest(MemoryRegistry::CHART)
                ),
            ]
        );

        assert_eq!(
            getter.get("oci://ghcr.io/org/charts/app.prov").unwrap(),
            MemoryRegistry::PROV
        );
        let prov_requests = &registry.requests()[chart_requests.len()..];
        assert_eq!(prov_requests.len(), 3);
        assert!(prov_requests[2].ends_with(&sha256_digest(MemoryRegistry::PROV)));
    }

    #[test]
    fn transport_is_built_once_across_threads() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let factory: TransportFactory = Arc::new(move |_opts: &GetterOptions| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryRegistry::ghcr_app()) as Arc<dyn Transport>)
        });
        let getter = Arc::new(OciGetter::new(
            GetterOptions {
                version: Some("1.2.3".into()),
                ..GetterOptions::default()
            },
            factory,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let getter = getter.clone();
                thread::spawn(move || getter.get("oci://ghcr.io/org/charts/app").unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), MemoryRegistry::CHART);
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_construction_is_retried_on_next_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let factory: TransportFactory = Arc::new(move |_opts: &GetterOptions| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GetterError::NoTransport)
            } else {
                Ok(Arc::new(MemoryRegistry::ghcr_app()) as Arc<dyn Transport>)
            }
        });
        let getter = OciGetter::new(GetterOptions::default(), factory);

        assert!(matches!(
            getter.get("oci://ghcr.io/org/charts/app:1.2.3"),
            Err(GetterError::NoTransport)
        ));
        assert!(getter.get("oci://ghcr.io/org/charts/app:1.2.3").is_ok());
        assert!(getter.get("oci://ghcr.io/org/charts/app:1.2.3").is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registry_client_reflects_options() {
        let getter = OciGetter::with_transport(
            GetterOptions {
                plain_http: true,
                username: Some("user".into()),
                password: Some("pw".into()),
                timeout: std::time::Duration::from_secs(30),
                user_agent: Some("helm/3".into()),
                ..GetterOptions::default()
            },
            Arc::new(MemoryRegistry::empty()),
        );
        let client = getter.new_registry_client().unwrap();
        let options = client.options();
        assert!(options.plain_http);
        assert_eq!(options.timeout, Some(std::time::Duration::from_secs(30)));
        assert_eq!(options.user_agent.as_deref(), Some("helm/3"));
        assert!(matches!(
            options.auth,
            ocigetter_registry::RegistryAuth::Basic(..)
        ));
    }

    #[test]
    fn caller_client_needs_no_transport() {
        let puller = Arc::new(FakePuller::new(b"chart", None));
        let getter = OciGetter::with_registry_client(GetterOptions::default(), puller);
        assert!(matches!(
            getter.new_registry_client(),
            Err(GetterError::NoTransport)
        ));
        assert!(getter.get("oci://ghcr.io/org/charts/app:1.0.0").is_ok());
    }
}
