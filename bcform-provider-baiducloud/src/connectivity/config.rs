//! Provider configuration: credentials, region and endpoint overrides

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bcform_core::resource::Value;

use super::client::Service;
use super::region::Region;

pub const ACCESS_KEY_ENV: &str = "BAIDUCLOUD_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "BAIDUCLOUD_SECRET_KEY";
pub const REGION_ENV: &str = "BAIDUCLOUD_REGION";
/// Prefix of per-service endpoint overrides, e.g. `BAIDUCLOUD_ENDPOINT_BLB`
pub const ENDPOINT_ENV_PREFIX: &str = "BAIDUCLOUD_ENDPOINT_";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing credential: set '{attribute}' in the provider block or {env}")]
    MissingCredential {
        attribute: &'static str,
        env: &'static str,
    },

    #[error("{0}")]
    InvalidRegion(String),

    #[error("Unknown service '{0}' in endpoints")]
    UnknownService(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Clone)]
pub struct Config {
    pub access_key: String,
    pub secret_key: String,
    pub region: Region,
    /// Endpoint overrides, either a host or a full base URL
    pub endpoints: HashMap<Service, String>,
    pub request_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoints", &self.endpoints)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>, region: Region) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region,
            endpoints: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, service: Service, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(service, endpoint.into());
        self
    }

    /// Read configuration from `BAIDUCLOUD_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let region = match lookup(REGION_ENV).filter(|r| !r.is_empty()) {
            Some(r) => r.parse().map_err(ConfigError::InvalidRegion)?,
            None => Region::default(),
        };
        let mut config = Self::new(
            lookup(ACCESS_KEY_ENV).unwrap_or_default(),
            lookup(SECRET_KEY_ENV).unwrap_or_default(),
            region,
        );
        for service in Service::ALL {
            let var = format!("{}{}", ENDPOINT_ENV_PREFIX, service.name().to_uppercase());
            if let Some(endpoint) = lookup(&var).filter(|e| !e.is_empty()) {
                config.endpoints.insert(service, endpoint);
            }
        }
        Ok(config)
    }

    /// Configuration from a `provider baiducloud { ... }` block, falling back
    /// to the environment for anything the block leaves out
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        Self::from_attributes_with(attributes, Self::from_env()?)
    }

    fn from_attributes_with(
        attributes: &HashMap<String, Value>,
        mut config: Config,
    ) -> Result<Self, ConfigError> {
        if let Some(ak) = string_attr(attributes, "access_key")? {
            config.access_key = ak;
        }
        if let Some(sk) = string_attr(attributes, "secret_key")? {
            config.secret_key = sk;
        }
        if let Some(region) = string_attr(attributes, "region")? {
            config.region = region.parse().map_err(ConfigError::InvalidRegion)?;
        }
        if let Some(value) = attributes.get("request_timeout") {
            let secs = value
                .as_int()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "request_timeout".to_string(),
                    message: "expected a positive number of seconds".to_string(),
                })?;
            config.request_timeout = Duration::from_secs(secs as u64);
        }
        if let Some(value) = attributes.get("endpoints") {
            let map = value.as_map().ok_or_else(|| ConfigError::InvalidValue {
                key: "endpoints".to_string(),
                message: "expected a map of service to endpoint".to_string(),
            })?;
            for (name, endpoint) in map {
                let service: Service = name
                    .parse()
                    .map_err(|_| ConfigError::UnknownService(name.clone()))?;
                let endpoint = endpoint.as_str().ok_or_else(|| ConfigError::InvalidValue {
                    key: format!("endpoints.{}", name),
                    message: "expected a string".to_string(),
                })?;
                config.endpoints.insert(service, endpoint.to_string());
            }
        }
        Ok(config)
    }

    /// Check that credentials are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.is_empty() {
            return Err(ConfigError::MissingCredential {
                attribute: "access_key",
                env: ACCESS_KEY_ENV,
            });
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::MissingCredential {
                attribute: "secret_key",
                env: SECRET_KEY_ENV,
            });
        }
        Ok(())
    }

    /// Base URL of a service: the override if any, else the regional default
    pub fn endpoint(&self, service: Service) -> String {
        match self.endpoints.get(&service) {
            Some(endpoint) if endpoint.contains("://") => endpoint.trim_end_matches('/').to_string(),
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
            None => format!("https://{}", service.default_host(self.region)),
        }
    }
}

fn string_attr(attributes: &HashMap<String, Value>, key: &str) -> Result<Option<String>, ConfigError> {
    match attributes.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "expected a string".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn from_environment() {
        let config = Config::from_lookup(env(&[
            (ACCESS_KEY_ENV, "ak"),
            (SECRET_KEY_ENV, "sk"),
            (REGION_ENV, "gz"),
            ("BAIDUCLOUD_ENDPOINT_BLB", "blb.internal:8080"),
        ]))
        .unwrap();

        assert_eq!(config.access_key, "ak");
        assert_eq!(config.region, Region::GuangZhou);
        assert_eq!(config.endpoint(Service::Blb), "https://blb.internal:8080");
        assert_eq!(config.endpoint(Service::Cce), "https://cce.gz.baidubce.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_to_beijing() {
        let config = Config::from_lookup(env(&[])).unwrap();
        assert_eq!(config.region, Region::BeiJing);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingCredential {
                attribute: "access_key",
                env: ACCESS_KEY_ENV
            })
        );
    }

    #[test]
    fn invalid_region_in_environment() {
        let err = Config::from_lookup(env(&[(REGION_ENV, "mars")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegion(_)));
    }

    #[test]
    fn provider_block_overrides_environment() {
        let base = Config::from_lookup(env(&[(ACCESS_KEY_ENV, "env-ak"), (SECRET_KEY_ENV, "env-sk")])).unwrap();

        let mut endpoints = HashMap::new();
        endpoints.insert("cert".to_string(), Value::from("http://localhost:9000/"));
        let mut attrs = HashMap::new();
        attrs.insert("access_key".to_string(), Value::from("block-ak"));
        attrs.insert("region".to_string(), Value::from("hkg"));
        attrs.insert("request_timeout".to_string(), Value::Int(5));
        attrs.insert("endpoints".to_string(), Value::Map(endpoints));

        let config = Config::from_attributes_with(&attrs, base).unwrap();
        assert_eq!(config.access_key, "block-ak");
        assert_eq!(config.secret_key, "env-sk");
        assert_eq!(config.region, Region::HongKong);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.endpoint(Service::Cert), "http://localhost:9000");
    }

    #[test]
    fn unknown_endpoint_service() {
        let mut endpoints = HashMap::new();
        endpoints.insert("vpc".to_string(), Value::from("vpc.example"));
        let mut attrs = HashMap::new();
        attrs.insert("endpoints".to_string(), Value::Map(endpoints));

        let err = Config::from_attributes_with(&attrs, Config::new("a", "s", Region::BeiJing)).unwrap_err();
        assert_eq!(err, ConfigError::UnknownService("vpc".to_string()));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = Config::new("ak", "super-secret", Region::BeiJing);
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
