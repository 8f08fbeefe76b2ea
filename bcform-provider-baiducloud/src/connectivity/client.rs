//! HTTP plumbing shared by every BCE service client

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::auth::{BceSigner, Credentials, format_timestamp};
use super::config::Config;
use super::region::Region;
use crate::api::{BbcClient, BccClient, BesClient, BlbClient, CceClient, CertClient};
use crate::error::{BceError, BceResult};

const CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Body keys never written to logs
const REDACTED_KEYS: &[&str] = &["certServerData", "certPrivateData", "password", "adminPassword"];

const CLIENT_TOKEN: &str = "clientToken";

/// Idempotency token for one logical mutation
///
/// Retries of the same create must send the same token so the service does
/// not create the object twice.
pub fn new_client_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Query carrying a caller-chosen `clientToken`
pub fn token_query(client_token: &str) -> [(&'static str, String); 1] {
    [(CLIENT_TOKEN, client_token.to_string())]
}

/// BCE sub-service reached through its own endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Blb,
    Cce,
    Bes,
    Cert,
    Bcc,
    Bbc,
}

impl Service {
    pub const ALL: [Service; 6] = [
        Service::Blb,
        Service::Cce,
        Service::Bes,
        Service::Cert,
        Service::Bcc,
        Service::Bbc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Service::Blb => "blb",
            Service::Cce => "cce",
            Service::Bes => "bes",
            Service::Cert => "cert",
            Service::Bcc => "bcc",
            Service::Bbc => "bbc",
        }
    }

    /// Endpoint host when no override is configured
    pub fn default_host(&self, region: Region) -> String {
        match self {
            Service::Cert => "certificate.baidubce.com".to_string(),
            other => format!("{}.{}.baidubce.com", other.name(), region),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|service| service.name() == s)
            .ok_or_else(|| format!("Unknown service '{}'", s))
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Path component of the URL
    pub fn path(&self) -> &str {
        let without_scheme = self.url.split_once("://").map_or(self.url.as_str(), |(_, rest)| rest);
        let path_and_query = without_scheme.find('/').map_or("/", |i| &without_scheme[i..]);
        path_and_query.split('?').next().unwrap_or("/")
    }

    /// Query parameters, percent-decoding not applied
    pub fn query(&self) -> Vec<(String, String)> {
        let Some((_, query)) = self.url.split_once('?') else {
            return Vec::new();
        };
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body.as_deref().and_then(|b| serde_json::from_str(b).ok())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends signed requests; swapped for a scripted fake in tests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> BceResult<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> BceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bcform/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> BceResult<HttpResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ErrorBody {
    code: String,
    message: String,
    request_id: String,
}

/// Response body whose content is not needed
#[derive(Debug, Default, serde::Deserialize)]
pub struct Empty {}

/// Signed JSON client bound to one service endpoint
#[derive(Clone)]
pub struct ServiceClient {
    service: Service,
    base_url: String,
    host: String,
    signer: Arc<BceSigner>,
    transport: Arc<dyn Transport>,
}

impl ServiceClient {
    pub fn new(
        service: Service,
        base_url: impl Into<String>,
        signer: Arc<BceSigner>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let base_url = base_url.into();
        let without_scheme = base_url.split_once("://").map_or(base_url.as_str(), |(_, rest)| rest);
        let host = without_scheme.split('/').next().unwrap_or_default().to_string();
        Self {
            service,
            base_url,
            host,
            signer,
            transport,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> BceResult<T>
    where
        T: DeserializeOwned + Default,
    {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post<B, T>(&self, path: &str, query: &[(&str, String)], body: &B) -> BceResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let body = serde_json::to_string(body)?;
        self.request(Method::POST, path, query, Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, query: &[(&str, String)], body: &B) -> BceResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let body = serde_json::to_string(body)?;
        self.request(Method::PUT, path, query, Some(body)).await
    }

    pub async fn delete<T>(&self, path: &str, query: &[(&str, String)]) -> BceResult<T>
    where
        T: DeserializeOwned + Default,
    {
        self.request(Method::DELETE, path, query, None).await
    }

    /// Sign and send one request
    ///
    /// Mutating requests without a caller-supplied `clientToken` get a fresh
    /// one. Non-2xx responses become `BceError::Service`; an empty body
    /// deserializes to `T::default()`.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<String>,
    ) -> BceResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let mut query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if method != Method::GET && !query.iter().any(|(k, _)| k == CLIENT_TOKEN) {
            query.push((CLIENT_TOKEN.to_string(), new_client_token()));
        }

        let timestamp = chrono::Utc::now();
        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("x-bce-date".to_string(), format_timestamp(timestamp)),
        ];
        let authorization =
            self.signer
                .authorization(method.as_str(), path, &query, &headers, timestamp)?;
        headers.push(("authorization".to_string(), authorization));

        let canonical = super::auth::canonical_query(&query);
        let url = if canonical.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, canonical)
        };

        log::debug!(
            "{} request: {} {} {}",
            self.service,
            method,
            url,
            body.as_deref().map(redact).unwrap_or_default()
        );

        let response = self
            .transport
            .send(HttpRequest {
                method: method.clone(),
                url,
                headers,
                body,
            })
            .await?;

        log::debug!(
            "{} response: {} {} -> {} {}",
            self.service,
            method,
            path,
            response.status,
            redact(&response.body)
        );

        if !response.is_success() {
            let parsed: ErrorBody = serde_json::from_str(&response.body).unwrap_or_default();
            let request_id = if parsed.request_id.is_empty() {
                response
                    .headers
                    .get("x-bce-request-id")
                    .cloned()
                    .unwrap_or_default()
            } else {
                parsed.request_id
            };
            let message = if parsed.message.is_empty() {
                response.body.clone()
            } else {
                parsed.message
            };
            return Err(BceError::service(response.status, parsed.code, message, request_id));
        }

        if response.body.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&response.body)
            .map_err(|e| BceError::Decode(format!("{} {}: {}", method, path, e)))
    }
}

/// JSON body with sensitive values masked, for logging
fn redact(body: &str) -> String {
    fn mask(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, v) in map.iter_mut() {
                    if REDACTED_KEYS.contains(&key.as_str()) {
                        *v = serde_json::Value::String("<redacted>".to_string());
                    } else {
                        mask(v);
                    }
                }
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(mask),
            _ => {}
        }
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(mut json) => {
            mask(&mut json);
            json.to_string()
        }
        Err(_) => body.to_string(),
    }
}

/// Entry point to every BCE service
///
/// Service clients are built on first use and cached for the lifetime of
/// the `BaiduClient`.
pub struct BaiduClient {
    config: Config,
    signer: Arc<BceSigner>,
    transport: Arc<dyn Transport>,
    blb: OnceLock<BlbClient>,
    cce: OnceLock<CceClient>,
    bes: OnceLock<BesClient>,
    cert: OnceLock<CertClient>,
    bcc: OnceLock<BccClient>,
    bbc: OnceLock<BbcClient>,
}

impl BaiduClient {
    /// Client sending real HTTPS requests
    pub fn new(config: Config) -> BceResult<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let signer = Arc::new(BceSigner::new(Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
        )));
        Self {
            config,
            signer,
            transport,
            blb: OnceLock::new(),
            cce: OnceLock::new(),
            bes: OnceLock::new(),
            cert: OnceLock::new(),
            bcc: OnceLock::new(),
            bbc: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn region(&self) -> Region {
        self.config.region
    }

    fn service_client(&self, service: Service) -> ServiceClient {
        let endpoint = self.config.endpoint(service);
        log::debug!("Initializing {} client for {}", service, endpoint);
        ServiceClient::new(service, endpoint, self.signer.clone(), self.transport.clone())
    }

    pub fn blb(&self) -> &BlbClient {
        self.blb
            .get_or_init(|| BlbClient::new(self.service_client(Service::Blb)))
    }

    pub fn cce(&self) -> &CceClient {
        self.cce
            .get_or_init(|| CceClient::new(self.service_client(Service::Cce)))
    }

    pub fn bes(&self) -> &BesClient {
        self.bes
            .get_or_init(|| BesClient::new(self.service_client(Service::Bes)))
    }

    pub fn cert(&self) -> &CertClient {
        self.cert
            .get_or_init(|| CertClient::new(self.service_client(Service::Cert)))
    }

    pub fn bcc(&self) -> &BccClient {
        self.bcc
            .get_or_init(|| BccClient::new(self.service_client(Service::Bcc)))
    }

    pub fn bbc(&self) -> &BbcClient {
        self.bbc
            .get_or_init(|| BbcClient::new(self.service_client(Service::Bbc)))
    }
}
