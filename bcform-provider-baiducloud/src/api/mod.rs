//! Typed bindings for the BCE REST endpoints used by the resources

pub mod bbc;
pub mod bcc;
pub mod bes;
pub mod blb;
pub mod cce;
pub mod cert;

pub use bbc::BbcClient;
pub use bcc::BccClient;
pub use bes::BesClient;
pub use blb::BlbClient;
pub use cce::CceClient;
pub use cert::CertClient;

use serde::{Deserialize, Deserializer, Serialize};

/// Key/value tag as the vendor models it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tag {
    pub tag_key: String,
    pub tag_value: String,
}

/// Some endpoints report numbers as strings ("80"); accept both
pub(crate) fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Int(n)) => Ok(n),
        Some(Raw::Str(s)) if s.is_empty() => Ok(0),
        Some(Raw::Str(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Port {
        #[serde(deserialize_with = "int_or_string", default)]
        port: i64,
    }

    #[test]
    fn numbers_as_strings() {
        let a: Port = serde_json::from_str(r#"{"port": "80"}"#).unwrap();
        let b: Port = serde_json::from_str(r#"{"port": 443}"#).unwrap();
        let c: Port = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!((a.port, b.port, c.port), (80, 443, 0));
        assert!(serde_json::from_str::<Port>(r#"{"port": "http"}"#).is_err());
    }
}
