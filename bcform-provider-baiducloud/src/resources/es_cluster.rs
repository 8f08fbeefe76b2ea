//! baiducloud.es_cluster - managed Elasticsearch cluster

use std::time::Duration;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};

use super::{Attrs, block_int, block_str, blocks, fail, invalid, opt_str, require_str};
use crate::api::bes::{Billing, ClusterModule, CreateClusterArgs, DiskSlotInfo};
use crate::connectivity::BaiduClient;
use crate::error::{BceError, BceResult};
use crate::retry::{StateConf, retry_bce};

const CREATE_PENDING: &[&str] = &["Creating", "Initializing", "Starting"];
// "Avaiable" is how the service spells it
const CREATE_TARGET: &[&str] = &["Running", "Avaiable"];
const DELETE_PENDING: &[&str] = &["Running", "Deleting", "Stopped", "Audit_stopping", "Audit_stopped"];
const DELETE_TARGET: &[&str] = &["Deleted", "OrderFailed"];
const FAILED: &[&str] = &["Failed"];

/// Time for networking resources to be released after the cluster is gone
const DELETE_SETTLE: Duration = Duration::from_secs(10);

pub struct EsClusterType;

impl ResourceType for EsClusterType {
    fn name(&self) -> &'static str {
        "es_cluster"
    }

    fn schema(&self) -> ResourceSchema {
        let module = types::blocks(vec![
            AttributeSchema::new("type", AttributeType::String).required(),
            AttributeSchema::new("instance_num", types::positive_int()).with_default(Value::Int(1)),
            AttributeSchema::new("slot_type", AttributeType::String)
                .required()
                .with_description("Node flavor, e.g. bes.g3.c2m8"),
            AttributeSchema::new("disk_type", AttributeType::String).with_default(Value::from("ssd")),
            AttributeSchema::new("disk_size", AttributeType::Int).with_default(Value::Int(0)),
        ]);
        let required_network = |name: &str| {
            AttributeSchema::new(name, AttributeType::String)
                .required()
                .force_new()
        };
        ResourceSchema::new("es_cluster")
            .with_description("Elasticsearch cluster")
            .with_timeouts(Timeouts::new(
                Duration::from_secs(60 * 60),
                Duration::from_secs(20 * 60),
                Duration::from_secs(30 * 60),
            ))
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("username", AttributeType::String).computed())
            .attribute(AttributeSchema::new("password", AttributeType::String).sensitive())
            .attribute(required_network("security_group_id"))
            .attribute(required_network("subnet_id"))
            .attribute(required_network("available_zone"))
            .attribute(required_network("vpc_id"))
            .attribute(
                AttributeSchema::new("version", AttributeType::String).with_default(Value::from("7.4.2")),
            )
            .attribute(
                AttributeSchema::new("payment_type", AttributeType::String)
                    .with_default(Value::from("postpay"))
                    .write_only()
                    .with_description("postpay (or Postpaid) for pay-as-you-go, anything else for prepay"),
            )
            .attribute(
                AttributeSchema::new("payment_time", AttributeType::Int)
                    .with_default(Value::Int(12))
                    .write_only()
                    .with_description("Prepaid duration in months"),
            )
            .attribute(
                AttributeSchema::new("auto_renew", AttributeType::Bool)
                    .write_only()
                    .with_description("Recorded in state only; the create API has no renewal option"),
            )
            .attribute(
                AttributeSchema::new("modules", module)
                    .with_max_items(5)
                    .write_only(),
            )
            .attribute(AttributeSchema::new("cluster_status", AttributeType::String).output())
            .attribute(AttributeSchema::new("kibana_url", AttributeType::String).output())
            .attribute(AttributeSchema::new("kibana_eip", AttributeType::String).output())
            .attribute(AttributeSchema::new("es_url", AttributeType::String).output())
            .attribute(AttributeSchema::new("es_eip", AttributeType::String).output())
    }
}

/// Billing mode accepted by BES for a user supplied payment type
pub(crate) fn payment_type(value: &str) -> &'static str {
    match value {
        "postpay" | "Postpaid" => "postpay",
        _ => "prepay",
    }
}

fn create_args(resource: &Resource) -> ProviderResult<CreateClusterArgs> {
    let id = &resource.id;
    let modules = blocks(resource.get("modules"))
        .into_iter()
        .map(|block| {
            Ok(ClusterModule {
                module_type: block_str(block, "type")
                    .ok_or_else(|| invalid(id, "modules.type is required"))?,
                instance_num: block_int(block, "instance_num").unwrap_or(1),
                slot_type: block_str(block, "slot_type")
                    .ok_or_else(|| invalid(id, "modules.slot_type is required"))?,
                disk_slot_info: DiskSlotInfo {
                    disk_type: block_str(block, "disk_type").unwrap_or_else(|| "ssd".to_string()),
                    size: block_int(block, "disk_size").unwrap_or(0),
                },
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(CreateClusterArgs {
        name: require_str(resource, "name")?,
        password: opt_str(resource, "password"),
        modules,
        version: opt_str(resource, "version").unwrap_or_else(|| "7.4.2".to_string()),
        available_zone: require_str(resource, "available_zone")?,
        security_group_id: require_str(resource, "security_group_id")?,
        subnet_uuid: require_str(resource, "subnet_id")?,
        vpc_id: require_str(resource, "vpc_id")?,
        billing: Billing {
            payment_type: payment_type(resource.get_str("payment_type").unwrap_or("postpay")).to_string(),
            time: resource.get_int("payment_time").unwrap_or(12),
        },
        is_old_package: false,
    })
}

/// Refresh for `wait_for_state`; `missing` is the status reported once the cluster is gone
async fn cluster_status(
    client: &BaiduClient,
    cluster_id: &str,
    missing: Option<&str>,
) -> BceResult<Option<((), String)>> {
    match client.bes().get_cluster(cluster_id).await {
        Ok(cluster) => Ok(Some(((), cluster.actual_status))),
        Err(e) if e.is_not_found() => Ok(missing.map(|status| ((), status.to_string()))),
        Err(e) => Err(e),
    }
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let args = create_args(resource)?;
    let timeout = EsClusterType.schema().timeouts.create;

    let created = client
        .bes()
        .create_cluster(&args)
        .await
        .map_err(fail("Failed to create es cluster", id))?;
    log::info!("Created es cluster {} ({})", created.cluster_id, id);

    StateConf::new(CREATE_PENDING, CREATE_TARGET, timeout)
        .with_fail(FAILED)
        .wait_for_state(|| cluster_status(client, &created.cluster_id, None))
        .await
        .map_err(BceError::from)
        .map_err(fail("Failed waiting for es cluster to run", id))?;

    read(client, id, &created.cluster_id).await
}

pub async fn read(client: &BaiduClient, id: &ResourceId, cluster_id: &str) -> ProviderResult<State> {
    let cluster = match client.bes().get_cluster(cluster_id).await {
        Ok(cluster) => cluster,
        Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
        Err(e) => return Err(e.into_provider_error("Failed to read es cluster", id)),
    };

    let mut attrs = Attrs::new();
    attrs
        .set_str("name", &cluster.cluster_name)
        .set_str("username", &cluster.admin_username)
        .set_str("cluster_status", &cluster.actual_status)
        .set_str("kibana_url", &cluster.kibana_url)
        .set_str("kibana_eip", &cluster.kibana_eip)
        .set_str("es_url", &cluster.es_url)
        .set_str("es_eip", &cluster.es_eip)
        .set_str("vpc_id", &cluster.vpc_id)
        .set_str("subnet_id", &cluster.subnet_id)
        .set_str("available_zone", &cluster.available_zone)
        .set_str("security_group_id", &cluster.security_group_id)
        .set_str("version", &cluster.es_version);
    Ok(State::existing(id.clone(), attrs.into_map()).with_identifier(cluster_id))
}

/// Nothing on a cluster can be changed in place
pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    cluster_id: &str,
    _from: &State,
    _to: &Resource,
) -> ProviderResult<State> {
    read(client, id, cluster_id).await
}

pub async fn delete(client: &BaiduClient, id: &ResourceId, cluster_id: &str) -> ProviderResult<()> {
    let timeout = EsClusterType.schema().timeouts.delete;
    match retry_bce(timeout, || client.bes().delete_cluster(cluster_id)).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into_provider_error("Failed to delete es cluster", id)),
    }

    StateConf::new(DELETE_PENDING, DELETE_TARGET, timeout)
        .with_fail(FAILED)
        .wait_for_state(|| cluster_status(client, cluster_id, Some("Deleted")))
        .await
        .map_err(BceError::from)
        .map_err(fail("Failed waiting for es cluster deletion", id))?;

    tokio::time::sleep(DELETE_SETTLE).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::testing::FakeTransport;
    use crate::resources::test_support::client;
    use reqwest::Method;
    use serde_json::json;
    use std::collections::HashMap;

    fn detail(status: &str) -> serde_json::Value {
        json!({
            "success": true,
            "status": 200,
            "result": {
                "clusterId": "es-1",
                "clusterName": "logs",
                "actualStatus": status,
                "adminUsername": "superuser",
                "esURL": "http://10.0.0.4:8200",
                "kibanaURL": "http://10.0.0.4:8601",
                "vpcId": "vpc-1"
            }
        })
    }

    fn resource() -> Resource {
        let module = Value::Map(HashMap::from([
            ("type".to_string(), Value::from("es_node")),
            ("slot_type".to_string(), Value::from("bes.g3.c2m8")),
            ("instance_num".to_string(), Value::Int(3)),
        ]));
        Resource::new("es_cluster", "logs")
            .with_attribute("name", Value::from("logs"))
            .with_attribute("security_group_id", Value::from("g-1"))
            .with_attribute("subnet_id", Value::from("sbn-1"))
            .with_attribute("available_zone", Value::from("zoneA"))
            .with_attribute("vpc_id", Value::from("vpc-1"))
            .with_attribute("payment_type", Value::from("Postpaid"))
            .with_attribute("modules", Value::List(vec![module]))
    }

    #[test]
    fn payment_type_mapping() {
        assert_eq!(payment_type("Postpaid"), "postpay");
        assert_eq!(payment_type("postpay"), "postpay");
        assert_eq!(payment_type("Prepaid"), "prepay");
    }

    #[test]
    fn module_defaults_fill_request() {
        let args = create_args(&resource()).unwrap();
        assert_eq!(args.modules[0].instance_num, 3);
        assert_eq!(args.modules[0].disk_slot_info.disk_type, "ssd");
        assert_eq!(args.modules[0].disk_slot_info.size, 0);
        assert_eq!(args.version, "7.4.2");
        assert_eq!(args.billing.payment_type, "postpay");
        assert_eq!(args.billing.time, 12);
        assert_eq!(args.subnet_uuid, "sbn-1");
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_for_running() {
        let fake = FakeTransport::new();
        fake.on(
            Method::POST,
            "/api/bes/cluster/create",
            200,
            json!({ "success": true, "result": { "clusterId": "es-1", "orderId": "o-1" } }),
        )
        .on(Method::POST, "/api/bes/cluster/detail", 200, detail("Creating"))
        .on(Method::POST, "/api/bes/cluster/detail", 200, detail("Running"));

        let state = create(&client(&fake), &resource()).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some("es-1"));
        assert_eq!(state.get("cluster_status"), Some(&Value::from("Running")));
        assert_eq!(state.get("username"), Some(&Value::from("superuser")));
        assert_eq!(state.get("es_url"), Some(&Value::from("http://10.0.0.4:8200")));
    }

    #[tokio::test]
    async fn create_failure_in_body_is_an_error() {
        let fake = FakeTransport::new();
        fake.on(
            Method::POST,
            "/api/bes/cluster/create",
            200,
            json!({
                "success": false,
                "error": { "code": "InvalidParameter", "message": "bad slot", "requestId": "r-1" }
            }),
        );
        let err = create(&client(&fake), &resource()).await.unwrap_err();
        assert!(err.to_string().contains("bad slot"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_until_gone() {
        let fake = FakeTransport::new();
        fake.on(Method::POST, "/api/bes/cluster/delete", 200, json!({ "success": true }))
            .on(Method::POST, "/api/bes/cluster/detail", 200, detail("Deleting"))
            .on(
                Method::POST,
                "/api/bes/cluster/detail",
                404,
                json!({ "code": "ClusterNotFound", "message": "gone", "requestId": "r" }),
            );

        delete(&client(&fake), &ResourceId::new("es_cluster", "logs"), "es-1")
            .await
            .unwrap();
        assert_eq!(fake.requests_to(Method::POST, "/api/bes/cluster/detail").len(), 2);
    }
}
