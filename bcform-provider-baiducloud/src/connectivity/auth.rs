//! `bce-auth-v1` request signing
//!
//! ```text
//! prefix      = bce-auth-v1/{access_key}/{timestamp}/{expiration}
//! signing_key = hex(HMAC-SHA256(secret_key, prefix))
//! signature   = hex(HMAC-SHA256(signing_key, METHOD\nURI\nQUERY\nHEADERS))
//! header      = {prefix}/{signed_headers}/{signature}
//! ```

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BceError, BceResult};

type HmacSha256 = Hmac<Sha256>;

/// Headers that take part in the signature besides `x-bce-*`
const SIGNED_HEADERS: &[&str] = &["host", "content-length", "content-type", "content-md5"];

#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BceSigner {
    credentials: Credentials,
    expiration_secs: u32,
}

impl BceSigner {
    pub const DEFAULT_EXPIRATION_SECS: u32 = 1800;

    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            expiration_secs: Self::DEFAULT_EXPIRATION_SECS,
        }
    }

    pub fn access_key(&self) -> &str {
        &self.credentials.access_key
    }

    /// Value of the `Authorization` header for a request
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        timestamp: DateTime<Utc>,
    ) -> BceResult<String> {
        let prefix = format!(
            "bce-auth-v1/{}/{}/{}",
            self.credentials.access_key,
            format_timestamp(timestamp),
            self.expiration_secs
        );
        let signing_key = hmac_hex(self.credentials.secret_key.as_bytes(), &prefix)?;

        let (canonical_headers, signed_headers) = canonical_headers(headers);
        let canonical_request = format!(
            "{}\n{}\n{}\n{}",
            method.to_uppercase(),
            uri_encode(path, false),
            canonical_query(query),
            canonical_headers
        );
        let signature = hmac_hex(signing_key.as_bytes(), &canonical_request)?;

        Ok(format!("{}/{}/{}", prefix, signed_headers, signature))
    }
}

/// ISO 8601 UTC timestamp used in `x-bce-date` and the auth prefix
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Percent-encode everything but `A-Za-z0-9-_.~` (and `/` unless `encode_slash`)
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}

/// Sorted `key=value` pairs without `authorization`
pub fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = query
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Canonical header block and the `;`-joined list of signed header names
fn canonical_headers(headers: &[(String, String)]) -> (String, String) {
    let mut entries: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .filter(|(k, v)| !v.is_empty() && (SIGNED_HEADERS.contains(&k.as_str()) || k.starts_with("x-bce-")))
        .collect();
    entries.sort();

    let canonical: Vec<String> = entries
        .iter()
        .map(|(k, v)| format!("{}:{}", uri_encode(k, true), uri_encode(v, true)))
        .collect();
    let signed: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    (canonical.join("\n"), signed.join(";"))
}

fn hmac_hex(key: &[u8], data: &str) -> BceResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| BceError::InvalidArgument(format!("signing key: {}", e)))?;
    mac.update(data.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("/v1/blb/lb-1", false), "/v1/blb/lb-1");
        assert_eq!(uri_encode("/v1/blb/lb-1", true), "%2Fv1%2Fblb%2Flb-1");
        assert_eq!(uri_encode("a b*c~", true), "a%20b%2Ac~");
        assert_eq!(uri_encode("ü", true), "%C3%BC");
    }

    #[test]
    fn query_is_sorted_and_skips_authorization() {
        let query = pairs(&[
            ("maxKeys", "1000"),
            ("authorization", "x"),
            ("batchdelete", ""),
            ("blbId", "lb-1"),
        ]);
        assert_eq!(
            canonical_query(&query),
            "batchdelete=&blbId=lb-1&maxKeys=1000"
        );
    }

    #[test]
    fn only_known_headers_are_signed() {
        let headers = pairs(&[
            ("Host", "blb.bj.baidubce.com"),
            ("Content-Type", "application/json"),
            ("X-Bce-Date", "2020-01-01T00:00:00Z"),
            ("User-Agent", "bcform"),
        ]);
        let (canonical, signed) = canonical_headers(&headers);
        assert_eq!(signed, "content-type;host;x-bce-date");
        assert_eq!(
            canonical,
            "content-type:application%2Fjson\nhost:blb.bj.baidubce.com\nx-bce-date:2020-01-01T00%3A00%3A00Z"
        );
    }

    #[test]
    fn authorization_header() {
        let signer = BceSigner::new(Credentials::new("ak-test", "sk-test"));
        let timestamp = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let headers = pairs(&[
            ("host", "blb.bj.baidubce.com"),
            ("x-bce-date", "2020-01-01T00:00:00Z"),
        ]);
        let query = pairs(&[("blbId", "lb-1")]);

        let auth = signer
            .authorization("GET", "/v1/blb", &query, &headers, timestamp)
            .unwrap();

        assert_eq!(
            auth,
            "bce-auth-v1/ak-test/2020-01-01T00:00:00Z/1800/host;x-bce-date/\
             64d482adc2b2910eee30536f884a0d4b9a01b0f8302938e17fe0f0e30485ac94"
        );
    }

    #[test]
    fn debug_hides_secret_key() {
        let printed = format!("{:?}", Credentials::new("ak", "sk-very-secret"));
        assert!(!printed.contains("sk-very-secret"));
    }
}
