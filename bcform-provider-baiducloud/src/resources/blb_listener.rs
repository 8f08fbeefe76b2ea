//! baiducloud.blb_listener - one listener of a load balancer
//!
//! The identifier is `{blb_id}:{protocol}:{listener_port}` since listeners are
//! addressed through their load balancer and protocol.

use std::collections::HashMap;
use std::time::Duration;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};

use super::{Attrs, fail, invalid, list_value, opt_str, require_int, require_str, string_list};
use crate::api::blb::{ListenerModel, ListenerProtocol};
use crate::connectivity::BaiduClient;
use crate::connectivity::client::new_client_token;
use crate::retry::retry_bce;

const COMMON: &[&str] = &[
    "blb_id",
    "listener_port",
    "backend_port",
    "protocol",
    "scheduler",
    "health_check_timeout_in_second",
    "health_check_interval",
    "unhealthy_threshold",
    "healthy_threshold",
];
const HTTP_FIELDS: &[&str] = &[
    "health_check_port",
    "health_check_uri",
    "health_check_normal_status",
    "keep_session",
    "keep_session_type",
    "keep_session_timeout",
    "keep_session_cookie_name",
    "x_forwarded_for",
    "server_timeout",
];
const TLS_FIELDS: &[&str] = &[
    "cert_ids",
    "encryption_type",
    "encryption_protocols",
    "dual_auth",
    "client_cert_ids",
];
/// Attributes that can change without replacing the listener
const MUTABLE: &[&str] = &[
    "scheduler",
    "tcp_session_timeout",
    "health_check_timeout_in_second",
    "health_check_interval",
    "unhealthy_threshold",
    "healthy_threshold",
    "health_check_string",
    "health_check_port",
    "health_check_uri",
    "health_check_normal_status",
    "keep_session",
    "keep_session_type",
    "keep_session_timeout",
    "keep_session_cookie_name",
    "x_forwarded_for",
    "server_timeout",
    "redirect_port",
    "cert_ids",
    "encryption_type",
    "encryption_protocols",
    "dual_auth",
    "client_cert_ids",
];

/// Whether `attribute` applies to listeners of `protocol`
fn applies_to(protocol: ListenerProtocol, attribute: &str) -> bool {
    if COMMON.contains(&attribute) {
        return true;
    }
    match protocol {
        ListenerProtocol::Tcp => attribute == "tcp_session_timeout",
        ListenerProtocol::Udp => attribute == "health_check_string",
        ListenerProtocol::Http => HTTP_FIELDS.contains(&attribute) || attribute == "redirect_port",
        ListenerProtocol::Https => {
            HTTP_FIELDS.contains(&attribute) || TLS_FIELDS.contains(&attribute)
        }
        ListenerProtocol::Ssl => TLS_FIELDS.contains(&attribute),
    }
}

fn validate_listener(attributes: &HashMap<String, Value>) -> Result<(), Vec<String>> {
    let Some(protocol) = attributes.get("protocol").and_then(Value::as_str) else {
        return Ok(());
    };
    let protocol: ListenerProtocol = protocol.parse().map_err(|e| vec![e])?;
    let mut errors = Vec::new();

    let mut names: Vec<&String> = attributes.keys().filter(|k| !k.starts_with('_')).collect();
    names.sort();
    for name in names {
        if !applies_to(protocol, name) {
            errors.push(format!("'{}' is not supported by {} listeners", name, protocol));
        }
    }

    if matches!(protocol, ListenerProtocol::Http | ListenerProtocol::Https)
        && let Some(scheduler) = attributes.get("scheduler").and_then(Value::as_str)
        && scheduler == "Hash"
    {
        errors.push(format!(
            "{} listener scheduler only supports [RoundRobin, LeastConnection], got: {}",
            protocol, scheduler
        ));
    }

    if matches!(protocol, ListenerProtocol::Https | ListenerProtocol::Ssl)
        && attributes
            .get("cert_ids")
            .and_then(Value::as_list)
            .is_none_or(|ids| ids.is_empty())
    {
        errors.push(format!("{} listener requires cert_ids", protocol));
    }

    if attributes.contains_key("encryption_protocols")
        && attributes.get("encryption_type").and_then(Value::as_str) != Some("userDefind")
    {
        errors.push("encryption_protocols requires encryption_type = \"userDefind\"".to_string());
    }

    if attributes.contains_key("keep_session_cookie_name")
        && attributes.get("keep_session_type").and_then(Value::as_str) != Some("rewrite")
    {
        errors.push("keep_session_cookie_name requires keep_session_type = \"rewrite\"".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

pub struct BlbListenerType;

impl ResourceType for BlbListenerType {
    fn name(&self) -> &'static str {
        "blb_listener"
    }

    fn schema(&self) -> ResourceSchema {
        let strings = || AttributeType::List(Box::new(AttributeType::String));
        ResourceSchema::new("blb_listener")
            .with_description("Listener of an application load balancer")
            .with_timeouts(Timeouts::new(
                Duration::from_secs(10 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(20 * 60),
            ))
            .with_validator(validate_listener)
            .attribute(AttributeSchema::new("blb_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("listener_port", types::port()).required().force_new())
            .attribute(AttributeSchema::new("backend_port", types::port()).required().force_new())
            .attribute(
                AttributeSchema::new("protocol", types::one_of(&["TCP", "UDP", "HTTP", "HTTPS", "SSL"]))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("scheduler", types::one_of(&["RoundRobin", "LeastConnection", "Hash"]))
                    .required()
                    .with_description("HTTP/HTTPS listeners support RoundRobin and LeastConnection only"),
            )
            .attribute(
                AttributeSchema::new("tcp_session_timeout", AttributeType::IntRange { min: 10, max: 4000 })
                    .computed()
                    .with_description("TCP only, default 900"),
            )
            .attribute(AttributeSchema::new("health_check_timeout_in_second", AttributeType::Int))
            .attribute(AttributeSchema::new("health_check_interval", AttributeType::Int))
            .attribute(AttributeSchema::new("unhealthy_threshold", AttributeType::Int))
            .attribute(AttributeSchema::new("healthy_threshold", AttributeType::Int))
            .attribute(AttributeSchema::new("health_check_string", AttributeType::String))
            .attribute(AttributeSchema::new("health_check_port", types::port()))
            .attribute(
                AttributeSchema::new("health_check_uri", AttributeType::String)
                    .with_provider_name("healthCheckURI"),
            )
            .attribute(AttributeSchema::new("health_check_normal_status", AttributeType::String))
            .attribute(AttributeSchema::new("keep_session", AttributeType::Bool).computed())
            .attribute(
                AttributeSchema::new("keep_session_type", types::one_of(&["insert", "rewrite"]))
                    .computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "keep_session_timeout",
                    AttributeType::IntRange { min: 1, max: 15_552_000 },
                )
                .computed()
                .with_provider_name("keepSessionDuration"),
            )
            .attribute(AttributeSchema::new("keep_session_cookie_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("x_forwarded_for", AttributeType::Bool).computed())
            .attribute(
                AttributeSchema::new("server_timeout", AttributeType::IntRange { min: 1, max: 3600 })
                    .computed(),
            )
            .attribute(AttributeSchema::new("redirect_port", types::port()).computed())
            .attribute(AttributeSchema::new("cert_ids", strings()).computed())
            .attribute(
                AttributeSchema::new(
                    "encryption_type",
                    types::one_of(&["compatibleIE", "incompatibleIE", "userDefind"]),
                )
                .computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "encryption_protocols",
                    AttributeType::List(Box::new(types::one_of(&["sslv3", "tlsv10", "tlsv11", "tlsv12"]))),
                )
                .computed(),
            )
            .attribute(AttributeSchema::new("dual_auth", AttributeType::Bool))
            .attribute(AttributeSchema::new("client_cert_ids", strings()).computed())
    }
}

/// Listener identifier parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerKey {
    pub blb_id: String,
    pub protocol: ListenerProtocol,
    pub port: i64,
}

impl ListenerKey {
    pub fn parse(identifier: &str) -> Result<Self, String> {
        let mut parts = identifier.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(blb_id), Some(protocol), Some(port)) if !blb_id.is_empty() => Ok(Self {
                blb_id: blb_id.to_string(),
                protocol: protocol.parse()?,
                port: port
                    .parse()
                    .map_err(|_| format!("invalid listener port '{}'", port))?,
            }),
            _ => Err(format!(
                "invalid listener identifier '{}', expected <blb_id>:<protocol>:<port>",
                identifier
            )),
        }
    }
}

impl std::fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.blb_id, self.protocol, self.port)
    }
}

fn parse_key(id: &ResourceId, identifier: &str) -> ProviderResult<ListenerKey> {
    ListenerKey::parse(identifier).map_err(|e| invalid(id, e))
}

/// Request body for `protocol` built from the declared attributes
fn listener_body(resource: &Resource, protocol: ListenerProtocol) -> ProviderResult<ListenerModel> {
    let int = |key: &str| {
        applies_to(protocol, key)
            .then(|| resource.get_int(key))
            .flatten()
    };
    let bool_ = |key: &str| {
        applies_to(protocol, key)
            .then(|| resource.get_bool(key))
            .flatten()
    };
    let string = |key: &str| {
        applies_to(protocol, key)
            .then(|| opt_str(resource, key))
            .flatten()
    };
    let strings = |key: &str| {
        if applies_to(protocol, key) {
            string_list(resource.get(key))
        } else {
            Vec::new()
        }
    };

    let scheduler = require_str(resource, "scheduler")?;
    if matches!(protocol, ListenerProtocol::Http | ListenerProtocol::Https)
        && scheduler != "RoundRobin"
        && scheduler != "LeastConnection"
    {
        return Err(invalid(
            &resource.id,
            format!(
                "{} listener scheduler only supports [RoundRobin, LeastConnection], got: {}",
                protocol, scheduler
            ),
        ));
    }

    let body = ListenerModel {
        listener_port: require_int(resource, "listener_port")?,
        backend_port: resource.get_int("backend_port"),
        scheduler,
        tcp_session_timeout: int("tcp_session_timeout"),
        health_check_timeout_in_second: int("health_check_timeout_in_second"),
        health_check_interval: int("health_check_interval"),
        unhealthy_threshold: int("unhealthy_threshold"),
        healthy_threshold: int("healthy_threshold"),
        health_check_string: string("health_check_string"),
        health_check_port: int("health_check_port"),
        health_check_uri: string("health_check_uri"),
        health_check_normal_status: string("health_check_normal_status"),
        keep_session: bool_("keep_session"),
        keep_session_type: string("keep_session_type"),
        keep_session_duration: int("keep_session_timeout"),
        keep_session_cookie_name: string("keep_session_cookie_name"),
        x_forwarded_for: bool_("x_forwarded_for"),
        server_timeout: int("server_timeout"),
        redirect_port: int("redirect_port"),
        cert_ids: strings("cert_ids"),
        encryption_type: string("encryption_type"),
        encryption_protocols: strings("encryption_protocols"),
        dual_auth: bool_("dual_auth"),
        client_cert_ids: strings("client_cert_ids"),
    };

    if matches!(protocol, ListenerProtocol::Https | ListenerProtocol::Ssl) && body.cert_ids.is_empty() {
        return Err(invalid(&resource.id, format!("{} listener requires cert_ids", protocol)));
    }
    Ok(body)
}

/// State attributes reported for a listener of `protocol`
fn listener_attributes(key: &ListenerKey, model: &ListenerModel) -> HashMap<String, Value> {
    let protocol = key.protocol;
    let mut attrs = Attrs::new();
    attrs
        .set("blb_id", key.blb_id.clone())
        .set("protocol", protocol.as_str())
        .set("listener_port", model.listener_port)
        .set_opt("backend_port", model.backend_port)
        .set("scheduler", model.scheduler.clone())
        .set_opt("health_check_timeout_in_second", model.health_check_timeout_in_second)
        .set_opt("health_check_interval", model.health_check_interval)
        .set_opt("unhealthy_threshold", model.unhealthy_threshold)
        .set_opt("healthy_threshold", model.healthy_threshold);

    match protocol {
        ListenerProtocol::Tcp => {
            attrs.set_opt("tcp_session_timeout", model.tcp_session_timeout);
        }
        ListenerProtocol::Udp => {
            attrs.set_opt("health_check_string", model.health_check_string.clone());
        }
        ListenerProtocol::Http | ListenerProtocol::Https => {
            attrs
                .set_opt("health_check_port", model.health_check_port)
                .set_opt("health_check_uri", model.health_check_uri.clone())
                .set_opt("health_check_normal_status", model.health_check_normal_status.clone())
                .set_opt("keep_session", model.keep_session)
                .set_opt("keep_session_type", model.keep_session_type.clone())
                .set_opt("keep_session_timeout", model.keep_session_duration)
                .set_opt("keep_session_cookie_name", model.keep_session_cookie_name.clone())
                .set_opt("x_forwarded_for", model.x_forwarded_for)
                .set_opt("server_timeout", model.server_timeout);
            if protocol == ListenerProtocol::Http {
                attrs.set_opt("redirect_port", model.redirect_port);
            } else {
                attrs
                    .set("cert_ids", list_value(&model.cert_ids))
                    .set_opt("dual_auth", model.dual_auth)
                    .set("client_cert_ids", list_value(&model.client_cert_ids));
            }
        }
        ListenerProtocol::Ssl => {
            attrs
                .set("cert_ids", list_value(&model.cert_ids))
                .set_opt("encryption_type", model.encryption_type.clone())
                .set("encryption_protocols", list_value(&model.encryption_protocols))
                .set_opt("dual_auth", model.dual_auth)
                .set("client_cert_ids", list_value(&model.client_cert_ids));
        }
    }
    attrs.into_map()
}

fn protocol_of(resource: &Resource) -> ProviderResult<ListenerProtocol> {
    require_str(resource, "protocol")?
        .parse()
        .map_err(|e: String| invalid(&resource.id, e))
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let protocol = protocol_of(resource)?;
    let key = ListenerKey {
        blb_id: require_str(resource, "blb_id")?,
        protocol,
        port: require_int(resource, "listener_port")?,
    };
    let body = listener_body(resource, protocol)?;
    let timeout = BlbListenerType.schema().timeouts.create;

    let token = new_client_token();
    retry_bce(timeout, || {
        client.blb().create_listener(&key.blb_id, protocol, &body, &token)
    })
    .await
    .map_err(fail("Failed to create listener", id))?;
    log::info!("Created {} listener {} on {}", protocol, key.port, key.blb_id);

    read(client, id, &key.to_string()).await
}

pub async fn read(client: &BaiduClient, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let key = parse_key(id, identifier)?;
    match client
        .blb()
        .describe_listener(&key.blb_id, key.protocol, key.port)
        .await
    {
        Ok(model) => {
            Ok(State::existing(id.clone(), listener_attributes(&key, &model)).with_identifier(identifier))
        }
        Err(e) if e.is_not_found() => Ok(State::not_found(id.clone())),
        Err(e) => Err(e.into_provider_error("Failed to read listener", id)),
    }
}

pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    identifier: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    let key = parse_key(id, identifier)?;
    if super::changed(&from.attributes, to, MUTABLE) {
        let body = listener_body(to, key.protocol)?;
        match client.blb().update_listener(&key.blb_id, key.protocol, &body).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
            Err(e) => return Err(e.into_provider_error("Failed to update listener", id)),
        }
    }
    read(client, id, identifier).await
}

pub async fn delete(client: &BaiduClient, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
    let key = parse_key(id, identifier)?;
    let timeout = BlbListenerType.schema().timeouts.delete;
    let ports = [key.port];
    match retry_bce(timeout, || client.blb().delete_listeners(&key.blb_id, &ports)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into_provider_error("Failed to delete listener", id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::testing::FakeTransport;
    use crate::resources::test_support::client;
    use reqwest::Method;
    use serde_json::json;

    fn http_listener() -> Resource {
        Resource::new("blb_listener", "http")
            .with_attribute("blb_id", Value::from("lb-1"))
            .with_attribute("listener_port", Value::Int(80))
            .with_attribute("backend_port", Value::Int(8080))
            .with_attribute("protocol", Value::from("HTTP"))
            .with_attribute("scheduler", Value::from("RoundRobin"))
            .with_attribute("health_check_uri", Value::from("/health"))
            .with_attribute("keep_session", Value::Bool(true))
    }

    #[test]
    fn validator_rejects_fields_of_other_protocols() {
        let schema = BlbListenerType.schema();
        let mut attrs = http_listener().attributes;
        assert!(schema.validate(&attrs).is_ok());

        attrs.insert("tcp_session_timeout".to_string(), Value::Int(900));
        let errors = schema.validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("tcp_session_timeout"));
    }

    #[test]
    fn validator_checks_scheduler_and_certs() {
        let schema = BlbListenerType.schema();
        let mut attrs = http_listener().attributes;
        attrs.insert("scheduler".to_string(), Value::from("Hash"));
        assert!(schema.validate(&attrs).is_err());

        let mut ssl = HashMap::new();
        ssl.insert("blb_id".to_string(), Value::from("lb-1"));
        ssl.insert("listener_port".to_string(), Value::Int(443));
        ssl.insert("backend_port".to_string(), Value::Int(443));
        ssl.insert("protocol".to_string(), Value::from("SSL"));
        ssl.insert("scheduler".to_string(), Value::from("Hash"));
        let errors = schema.validate(&ssl).unwrap_err();
        assert!(errors[0].to_string().contains("cert_ids"));

        ssl.insert("cert_ids".to_string(), Value::List(vec![Value::from("cert-1")]));
        ssl.insert(
            "encryption_protocols".to_string(),
            Value::List(vec![Value::from("tlsv12")]),
        );
        let errors = schema.validate(&ssl).unwrap_err();
        assert!(errors[0].to_string().contains("userDefind"));

        ssl.insert("encryption_type".to_string(), Value::from("userDefind"));
        assert!(schema.validate(&ssl).is_ok());
    }

    #[test]
    fn identifier_round_trip() {
        let key = ListenerKey::parse("lb-1:HTTPS:443").unwrap();
        assert_eq!(key.protocol, ListenerProtocol::Https);
        assert_eq!(key.port, 443);
        assert_eq!(key.to_string(), "lb-1:HTTPS:443");
        assert!(ListenerKey::parse("443").is_err());
        assert!(ListenerKey::parse("lb-1:FTP:21").is_err());
    }

    #[test]
    fn body_only_carries_protocol_fields() {
        let resource = http_listener().with_attribute("health_check_string", Value::from("ping"));
        let body = listener_body(&resource, ListenerProtocol::Http).unwrap();
        assert_eq!(body.health_check_uri.as_deref(), Some("/health"));
        assert_eq!(body.health_check_string, None);
    }

    #[tokio::test]
    async fn create_then_read_http() {
        let fake = FakeTransport::new();
        fake.on(Method::POST, "/v1/blb/lb-1/HTTPlistener", 200, serde_json::Value::Null)
            .on(
                Method::GET,
                "/v1/blb/lb-1/HTTPlistener",
                200,
                json!({ "listenerList": [{
                    "listenerPort": 80,
                    "backendPort": 8080,
                    "scheduler": "RoundRobin",
                    "keepSession": true,
                    "keepSessionType": "insert",
                    "keepSessionDuration": 3600,
                    "xForwardedFor": false,
                    "serverTimeout": 30,
                    "healthCheckURI": "/health"
                }]}),
            );

        let state = create(&client(&fake), &http_listener()).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some("lb-1:HTTP:80"));
        assert_eq!(state.get("keep_session_timeout"), Some(&Value::Int(3600)));
        assert_eq!(state.get("health_check_uri"), Some(&Value::from("/health")));
        assert_eq!(state.get("protocol"), Some(&Value::from("HTTP")));
        assert!(state.get("tcp_session_timeout").is_none());

        let body = fake.requests_to(Method::POST, "/v1/blb/lb-1/HTTPlistener")[0]
            .body_json()
            .unwrap();
        assert_eq!(body["healthCheckURI"], "/health");
        assert_eq!(body["keepSession"], true);
    }

    #[tokio::test]
    async fn https_without_certs_fails_before_any_request() {
        let fake = FakeTransport::new();
        let resource = http_listener().with_attribute("protocol", Value::from("HTTPS"));
        let err = create(&client(&fake), &resource).await.unwrap_err();
        assert!(err.to_string().contains("cert_ids"));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn update_sends_full_body_when_scheduler_changes() {
        let fake = FakeTransport::new();
        fake.on(Method::PUT, "/v1/blb/lb-1/TCPlistener", 200, serde_json::Value::Null)
            .on(
                Method::GET,
                "/v1/blb/lb-1/TCPlistener",
                200,
                json!({ "listenerList": [{ "listenerPort": 22, "backendPort": 22, "scheduler": "Hash", "tcpSessionTimeout": 900 }] }),
            );
        let id = ResourceId::new("blb_listener", "ssh");
        let from = State::existing(
            id.clone(),
            HashMap::from([("scheduler".to_string(), Value::from("RoundRobin"))]),
        );
        let to = Resource::new("blb_listener", "ssh")
            .with_attribute("blb_id", Value::from("lb-1"))
            .with_attribute("listener_port", Value::Int(22))
            .with_attribute("backend_port", Value::Int(22))
            .with_attribute("protocol", Value::from("TCP"))
            .with_attribute("scheduler", Value::from("Hash"));

        let state = update(&client(&fake), &id, "lb-1:TCP:22", &from, &to).await.unwrap();
        assert_eq!(state.get("tcp_session_timeout"), Some(&Value::Int(900)));

        let put = &fake.requests_to(Method::PUT, "/v1/blb/lb-1/TCPlistener")[0];
        assert_eq!(put.query_param("listenerPort").as_deref(), Some("22"));
        assert_eq!(put.body_json().unwrap()["scheduler"], "Hash");
    }

    #[tokio::test]
    async fn update_of_missing_listener_clears_state() {
        let fake = FakeTransport::new();
        let id = ResourceId::new("blb_listener", "ssh");
        let from = State::existing(id.clone(), HashMap::new());
        let to = Resource::new("blb_listener", "ssh")
            .with_attribute("listener_port", Value::Int(22))
            .with_attribute("scheduler", Value::from("Hash"));

        let state = update(&client(&fake), &id, "lb-1:TCP:22", &from, &to).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn delete_sends_port_list() {
        let fake = FakeTransport::new();
        fake.on(Method::PUT, "/v1/blb/lb-1/listener", 200, serde_json::Value::Null);

        delete(&client(&fake), &ResourceId::new("blb_listener", "http"), "lb-1:HTTP:80")
            .await
            .unwrap();
        let request = &fake.requests()[0];
        assert_eq!(request.query_param("batchdelete").as_deref(), Some(""));
        assert_eq!(request.body_json(), Some(json!({ "portList": [80] })));
    }
}
