//! Per-request getter configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Options for a single fetch.
///
/// `Option<bool>` fields are three-state: absent, explicitly `false`, or
/// explicitly `true`. The JSON field names match the Helm getter plugin
/// protocol.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetterOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub untar: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify_tls: Option<bool>,
    #[serde(deserialize_with = "null_as_false")]
    pub plain_http: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_credentials_all: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Integer nanoseconds on the wire; zero means no deadline.
    #[serde(with = "duration_nanos")]
    pub timeout: Duration,
}

impl GetterOptions {
    /// The explicit version, ignoring blank values.
    pub fn version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn insecure_skip_verify_tls(&self) -> bool {
        self.insecure_skip_verify_tls.unwrap_or(false)
    }
}

impl fmt::Debug for GetterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetterOptions")
            .field("url", &self.url)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("ca_file", &self.ca_file)
            .field("untar", &self.untar)
            .field("insecure_skip_verify_tls", &self.insecure_skip_verify_tls)
            .field("plain_http", &self.plain_http)
            .field("accept_header", &self.accept_header)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pass_credentials_all", &self.pass_credentials_all)
            .field("user_agent", &self.user_agent)
            .field("version", &self.version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn null_as_false<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(false))
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = Option::<i64>::deserialize(d)?.unwrap_or(0);
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}
