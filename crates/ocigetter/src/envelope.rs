//! Request and response envelopes exchanged with the plugin host.

use serde::{Deserialize, Serialize};

use crate::options::GetterOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetterPluginInput {
    #[serde(default)]
    pub options: GetterOptions,
    pub href: String,
}

/// Chart or provenance bytes, base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetterPluginOutput {
    #[serde(with = "base64_bytes")]
    pub chart_data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
