use base64::Engine;
use http::HeaderValue;
use sha2::{Digest, Sha256};

use crate::auth::RegistryAuth;
use crate::error::RegistryError;

/// Build registry credentials from an optional username/password pair.
///
/// Both halves must be present and non-empty to produce `Basic`; anything else
/// is anonymous.
pub fn auth_from_credentials(username: Option<&str>, password: Option<&str>) -> RegistryAuth {
    match (username.map(str::trim), password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => {
            RegistryAuth::Basic(u.to_string(), p.to_string())
        }
        _ => RegistryAuth::Anonymous,
    }
}

/// `Authorization` header value for the given credentials, if any.
pub fn authorization_header(auth: &RegistryAuth) -> Option<HeaderValue> {
    let raw = match auth {
        RegistryAuth::Anonymous => return None,
        RegistryAuth::Basic(u, p) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{u}:{p}"));
            format!("Basic {encoded}")
        }
        RegistryAuth::Bearer(t) => format!("Bearer {t}"),
    };
    let mut value = HeaderValue::from_str(&raw).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// OCI tags cannot carry `+`, so chart versions with build metadata are
/// pushed with `_` in its place.
pub fn chart_tag(tag: &str) -> String {
    tag.replace('+', "_")
}

/// Check `data` against an OCI digest string (`sha256:<hex>`).
pub fn verify_digest(expected: &str, data: &[u8]) -> Result<(), RegistryError> {
    let Some(hex_digest) = expected.strip_prefix("sha256:") else {
        return Err(RegistryError::UnsupportedDigest(expected.to_string()));
    };
    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(hex_digest) {
        Ok(())
    } else {
        Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            actual: format!("sha256:{actual}"),
        })
    }
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_need_both_halves() {
        assert!(matches!(
            auth_from_credentials(Some("user"), None),
            RegistryAuth::Anonymous
        ));
        assert!(matches!(
            auth_from_credentials(Some("  "), Some("pw")),
            RegistryAuth::Anonymous
        ));
        match auth_from_credentials(Some(" user "), Some("pw")) {
            RegistryAuth::Basic(u, p) => {
                assert_eq!(u, "user");
                assert_eq!(p, "pw");
            }
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn basic_authorization_header_is_base64() {
        let header =
            authorization_header(&RegistryAuth::Basic("user".into(), "pass".into())).unwrap();
        assert_eq!(header.to_str().unwrap(), "Basic dXNlcjpwYXNz");
        assert!(header.is_sensitive());
        assert!(authorization_header(&RegistryAuth::Anonymous).is_none());
    }

    #[test]
    fn chart_tag_replaces_build_metadata_separator() {
        assert_eq!(chart_tag("1.2.3+build.7"), "1.2.3_build.7");
        assert_eq!(chart_tag("1.2.3"), "1.2.3");
    }

    #[test]
    fn verify_digest_detects_mismatch() {
        let data = b"hello";
        let good = sha256_digest(data);
        assert!(verify_digest(&good, data).is_ok());

        let err = verify_digest(&good, b"other").unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));

        let err = verify_digest("md5:abc", data).unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedDigest(_)));
    }
}
