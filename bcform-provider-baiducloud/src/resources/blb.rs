//! baiducloud.blb - application load balancer

use std::time::Duration;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};

use super::{Attrs, fail, opt_str, require_str, string_pairs};
use crate::api::Tag;
use crate::api::blb::{CreateBlbArgs, UpdateBlbArgs};
use crate::connectivity::BaiduClient;
use crate::connectivity::client::new_client_token;
use crate::error::BceResult;
use crate::retry::{StateConf, retry_bce};

pub const PENDING: &[&str] = &["creating", "updating", "pending"];
pub const AVAILABLE: &[&str] = &["available"];
pub const FAILED: &[&str] = &["unavailable", "paused", "unknown"];

/// Settling time before the first status poll after create
const CREATE_SETTLE: Duration = Duration::from_secs(15);

pub struct BlbType;

impl ResourceType for BlbType {
    fn name(&self) -> &'static str {
        "blb"
    }

    fn schema(&self) -> ResourceSchema {
        let listener = types::blocks(vec![
            AttributeSchema::new("port", AttributeType::Int),
            AttributeSchema::new("type", AttributeType::String),
        ]);
        ResourceSchema::new("blb")
            .with_description("Application load balancer")
            .with_timeouts(Timeouts::new(
                Duration::from_secs(10 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(20 * 60),
            ))
            .attribute(
                AttributeSchema::new("name", types::name())
                    .computed()
                    .with_description("Name of the load balancer"),
            )
            .attribute(
                AttributeSchema::new("description", AttributeType::StringLength { min: 0, max: 450 })
                    .with_provider_name("desc"),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new()
                    .with_provider_name("vpcId"),
            )
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .required()
                    .force_new()
                    .with_provider_name("subnetId"),
            )
            .attribute(
                AttributeSchema::new("eip", AttributeType::String)
                    .force_new()
                    .write_only(),
            )
            .attribute(
                AttributeSchema::new("tags", AttributeType::Map(Box::new(AttributeType::String)))
                    .force_new(),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).output())
            .attribute(AttributeSchema::new("address", AttributeType::String).output())
            .attribute(AttributeSchema::new("vpc_name", AttributeType::String).output())
            .attribute(AttributeSchema::new("public_ip", AttributeType::String).output())
            .attribute(AttributeSchema::new("cidr", AttributeType::String).output())
            .attribute(AttributeSchema::new("create_time", AttributeType::String).output())
            .attribute(AttributeSchema::new("listener", listener).output())
    }
}

/// Poll until the load balancer is `available`
pub(crate) async fn wait_available(
    client: &BaiduClient,
    blb_id: &str,
    delay: Duration,
    timeout: Duration,
) -> BceResult<()> {
    StateConf::new(PENDING, AVAILABLE, timeout)
        .with_fail(FAILED)
        .with_delay(delay)
        .wait_for_state(|| async move {
            match client.blb().describe_blb(blb_id).await {
                Ok(blb) => {
                    let status = blb.status.clone();
                    Ok(Some(((), status)))
                }
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;
    Ok(())
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let timeouts = BlbType.schema().timeouts;
    let args = CreateBlbArgs {
        name: opt_str(resource, "name"),
        description: opt_str(resource, "description"),
        vpc_id: require_str(resource, "vpc_id")?,
        subnet_id: require_str(resource, "subnet_id")?,
        eip: opt_str(resource, "eip"),
        tags: string_pairs(resource.get("tags"))
            .into_iter()
            .map(|(tag_key, tag_value)| Tag { tag_key, tag_value })
            .collect(),
    };

    let token = new_client_token();
    let created = retry_bce(timeouts.create, || client.blb().create_blb(&args, &token))
        .await
        .map_err(fail("Failed to create blb", id))?;
    log::info!("Created blb {} ({})", created.blb_id, id);

    wait_available(client, &created.blb_id, CREATE_SETTLE, timeouts.create)
        .await
        .map_err(fail("Failed waiting for blb to become available", id))?;

    read(client, id, &created.blb_id).await
}

pub async fn read(client: &BaiduClient, id: &ResourceId, blb_id: &str) -> ProviderResult<State> {
    let model = match client.blb().describe_blb(blb_id).await {
        Ok(model) => model,
        Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
        Err(e) => return Err(e.into_provider_error("Failed to read blb", id)),
    };
    let detail = match client.blb().describe_blb_detail(blb_id).await {
        Ok(detail) => detail,
        Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
        Err(e) => return Err(e.into_provider_error("Failed to read blb detail", id)),
    };

    let tags = model
        .tags
        .iter()
        .map(|t| (t.tag_key.clone(), Value::String(t.tag_value.clone())))
        .collect();
    let listeners = detail
        .listener
        .iter()
        .map(|l| {
            Value::Map(
                [
                    ("port".to_string(), Value::Int(l.port)),
                    ("type".to_string(), Value::String(l.listener_type.clone())),
                ]
                .into(),
            )
        })
        .collect();

    let mut attrs = Attrs::new();
    attrs
        .set_str("name", &model.name)
        .set_str("description", &detail.desc)
        .set_str("vpc_id", &model.vpc_id)
        .set_str("subnet_id", &model.subnet_id)
        .set_str("status", &detail.status)
        .set_str("address", &detail.address)
        .set_str("vpc_name", &detail.vpc_name)
        .set_str("public_ip", &detail.public_ip)
        .set_str("cidr", &detail.cidr)
        .set_str("create_time", &detail.create_time)
        .set("listener", Value::List(listeners));
    if !model.tags.is_empty() {
        attrs.set("tags", Value::Map(tags));
    }
    Ok(State::existing(id.clone(), attrs.into_map()).with_identifier(blb_id))
}

pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    blb_id: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    if super::changed(&from.attributes, to, &["name", "description"]) {
        let args = UpdateBlbArgs {
            name: opt_str(to, "name"),
            description: opt_str(to, "description"),
        };
        client
            .blb()
            .update_blb(blb_id, &args)
            .await
            .map_err(fail("Failed to update blb", id))?;
        wait_available(client, blb_id, Duration::ZERO, BlbType.schema().timeouts.update)
            .await
            .map_err(fail("Failed waiting for blb to become available", id))?;
    }
    read(client, id, blb_id).await
}

pub async fn delete(client: &BaiduClient, id: &ResourceId, blb_id: &str) -> ProviderResult<()> {
    let timeout = BlbType.schema().timeouts.delete;
    match retry_bce(timeout, || client.blb().delete_blb(blb_id)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into_provider_error("Failed to delete blb", id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::testing::FakeTransport;
    use crate::resources::test_support::client;
    use reqwest::Method;
    use serde_json::json;

    fn list_body(status: &str) -> serde_json::Value {
        json!({ "blbList": [{
            "blbId": "lb-1",
            "name": "web",
            "status": status,
            "vpcId": "vpc-1",
            "subnetId": "sbn-1",
            "tags": [{ "tagKey": "env", "tagValue": "prod" }]
        }]})
    }

    fn detail_body() -> serde_json::Value {
        json!({
            "blbId": "lb-1",
            "status": "available",
            "address": "192.168.0.2",
            "desc": "front",
            "vpcName": "main",
            "listener": [{ "port": 80, "type": "HTTP" }]
        })
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_for_available() {
        let fake = FakeTransport::new();
        fake.on(Method::POST, "/v1/blb", 200, json!({ "blbId": "lb-1", "address": "192.168.0.2" }))
            .on(Method::GET, "/v1/blb", 200, list_body("creating"))
            .on(Method::GET, "/v1/blb", 200, list_body("available"))
            .on(Method::GET, "/v1/blb/lb-1", 200, detail_body());
        let baidu = client(&fake);

        let resource = Resource::new("blb", "web")
            .with_attribute("vpc_id", Value::from("vpc-1"))
            .with_attribute("subnet_id", Value::from("sbn-1"))
            .with_attribute(
                "tags",
                Value::Map([("env".to_string(), Value::from("prod"))].into()),
            );
        let state = create(&baidu, &resource).await.unwrap();

        assert_eq!(state.identifier.as_deref(), Some("lb-1"));
        assert_eq!(state.get("status"), Some(&Value::from("available")));
        assert_eq!(state.get("description"), Some(&Value::from("front")));
        assert_eq!(
            state.get("tags"),
            Some(&Value::Map([("env".to_string(), Value::from("prod"))].into()))
        );
        let body = fake.requests_to(Method::POST, "/v1/blb")[0].body_json().unwrap();
        assert_eq!(body["tags"], json!([{ "tagKey": "env", "tagValue": "prod" }]));
    }

    #[tokio::test(start_paused = true)]
    async fn create_fails_on_failed_status() {
        let fake = FakeTransport::new();
        fake.on(Method::POST, "/v1/blb", 200, json!({ "blbId": "lb-1" }))
            .on(Method::GET, "/v1/blb", 200, list_body("unavailable"));

        let resource = Resource::new("blb", "web")
            .with_attribute("vpc_id", Value::from("vpc-1"))
            .with_attribute("subnet_id", Value::from("sbn-1"));
        let err = create(&client(&fake), &resource).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let fake = FakeTransport::new();
        fake.on(Method::GET, "/v1/blb", 200, json!({ "blbList": [] }));

        let state = read(&client(&fake), &ResourceId::new("blb", "web"), "lb-1")
            .await
            .unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn update_skips_call_when_nothing_mutable_changed() {
        let fake = FakeTransport::new();
        fake.on(Method::GET, "/v1/blb", 200, list_body("available"))
            .on(Method::GET, "/v1/blb/lb-1", 200, detail_body());
        let baidu = client(&fake);
        let id = ResourceId::new("blb", "web");
        let from = read(&baidu, &id, "lb-1").await.unwrap();
        let to = Resource::new("blb", "web")
            .with_attribute("name", Value::from("web"))
            .with_attribute("description", Value::from("front"));

        update(&baidu, &id, "lb-1", &from, &to).await.unwrap();
        assert!(fake.requests_to(Method::PUT, "/v1/blb/lb-1").is_empty());
    }

    #[tokio::test]
    async fn update_renames() {
        let fake = FakeTransport::new();
        fake.on(Method::GET, "/v1/blb", 200, list_body("available"))
            .on(Method::GET, "/v1/blb/lb-1", 200, detail_body())
            .on(Method::PUT, "/v1/blb/lb-1", 200, serde_json::Value::Null);
        let baidu = client(&fake);
        let id = ResourceId::new("blb", "web");
        let from = read(&baidu, &id, "lb-1").await.unwrap();
        let to = Resource::new("blb", "web").with_attribute("name", Value::from("api"));

        update(&baidu, &id, "lb-1", &from, &to).await.unwrap();
        let put = &fake.requests_to(Method::PUT, "/v1/blb/lb-1")[0];
        assert_eq!(put.body_json(), Some(json!({ "name": "api" })));
    }

    #[tokio::test]
    async fn delete_ignores_missing() {
        let fake = FakeTransport::new();
        delete(&client(&fake), &ResourceId::new("blb", "web"), "lb-1")
            .await
            .unwrap();
    }
}
