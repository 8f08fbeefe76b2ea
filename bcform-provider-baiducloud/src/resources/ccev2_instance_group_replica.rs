//! baiducloud.ccev2_instance_group_replica - relative scaling of a container cluster
//!
//! `replicas_change` is a delta applied on every create or update and then
//! persisted as 0. Clusters with a `cce-` id go through the v2 instance group
//! API; legacy `c-` clusters are scaled up through the v1 API with a JSON
//! template rendered from `tpl` and `vars`.
//!
//! The identifier is the cluster id, extended to `cluster_id:instance_group_id`
//! once a v2 scale has picked an instance group.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use regex::Regex;

use super::{Attrs, fail, invalid, require_str};
use crate::api::cce::{DeleteOption, InstanceGroup, UpdateReplicasArgs};
use crate::connectivity::BaiduClient;
use crate::error::BceError;
use crate::retry::{StateConf, retry_bce};

const V2_PREFIX: &str = "cce-";
const V1_PREFIX: &str = "c-";

const SCALING: &str = "Scaling";
const READY: &str = "Ready";
const NODE_RUNNING: &str = "RUNNING";
const NODE_CREATE_FAILED: &str = "CREATE_FAILED";

pub struct InstanceGroupReplicaType;

impl ResourceType for InstanceGroupReplicaType {
    fn name(&self) -> &'static str {
        "ccev2_instance_group_replica"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("ccev2_instance_group_replica")
            .with_description("Scale the worker nodes of a container cluster by a relative amount")
            .with_timeouts(Timeouts::new(
                Duration::from_secs(20 * 60),
                Duration::from_secs(20 * 60),
                Duration::from_secs(20 * 60),
            ))
            .with_validator(validate_replica)
            .attribute(
                AttributeSchema::new("cluster_id", AttributeType::String)
                    .required()
                    .force_new()
                    .with_description("cce- ids use the v2 API, c- ids the legacy v1 API"),
            )
            .attribute(
                AttributeSchema::new("replicas_change", AttributeType::Int)
                    .required()
                    .write_only()
                    .with_description("Nodes to add (positive) or remove (negative)"),
            )
            .attribute(
                AttributeSchema::new("tpl", AttributeType::String)
                    .write_only()
                    .with_description("v1 scaling-up request with [[ name ]] placeholders"),
            )
            .attribute(
                AttributeSchema::new("vars", AttributeType::Map(Box::new(AttributeType::String)))
                    .write_only(),
            )
            .attribute(
                AttributeSchema::new("auto_renew", AttributeType::Bool)
                    .with_default(Value::Bool(true))
                    .write_only()
                    .with_description("Turn new nodes to prepaid billing with monthly auto-renew"),
            )
            .attribute(AttributeSchema::new("total", AttributeType::Int).output())
            .attribute(AttributeSchema::new("instance_group_id", AttributeType::String).output())
            .attribute(AttributeSchema::new("replicas", AttributeType::Int).output())
            .attribute(AttributeSchema::new("ready_replicas", AttributeType::Int).output())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiVersion {
    V1,
    V2,
}

fn api_version(cluster_id: &str) -> Result<ApiVersion, String> {
    if cluster_id.starts_with(V2_PREFIX) {
        Ok(ApiVersion::V2)
    } else if cluster_id.starts_with(V1_PREFIX) {
        Ok(ApiVersion::V1)
    } else {
        Err(format!("invalid cluster_id: {}", cluster_id))
    }
}

fn validate_replica(attributes: &HashMap<String, Value>) -> Result<(), Vec<String>> {
    // References resolve at apply time
    let Some(Value::String(cluster_id)) = attributes.get("cluster_id") else {
        return Ok(());
    };
    let mut errors = Vec::new();
    match api_version(cluster_id) {
        Err(e) => errors.push(e),
        Ok(ApiVersion::V1) => {
            if let Some(Value::Int(change)) = attributes.get("replicas_change")
                && *change < 0
            {
                errors.push("replicas_change must not be negative for v1 clusters".to_string());
            }
            if !attributes.contains_key("tpl") || !attributes.contains_key("vars") {
                errors.push("tpl and vars are required for v1 clusters".to_string());
            }
        }
        Ok(ApiVersion::V2) => {}
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Parsed identifier: `cluster_id[:instance_group_id]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplicaKey {
    pub cluster_id: String,
    pub instance_group_id: Option<String>,
}

impl ReplicaKey {
    pub(crate) fn parse(identifier: &str) -> Self {
        match identifier.split_once(':') {
            Some((cluster_id, group)) if !group.is_empty() => Self {
                cluster_id: cluster_id.to_string(),
                instance_group_id: Some(group.to_string()),
            },
            _ => Self {
                cluster_id: identifier.trim_end_matches(':').to_string(),
                instance_group_id: None,
            },
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_group_id {
            Some(group) => write!(f, "{}:{}", self.cluster_id, group),
            None => write!(f, "{}", self.cluster_id),
        }
    }
}

/// Substitute `[[ name ]]` / `[[ .vars.name ]]` placeholders
pub(crate) fn render_template(tpl: &str, vars: &HashMap<String, Value>) -> Result<String, String> {
    let placeholder = Regex::new(r"\[\[\s*(?:\.vars\.)?(\w+)\s*\]\]").map_err(|e| e.to_string())?;
    let mut missing = Vec::new();
    let rendered = placeholder.replace_all(tpl, |caps: &regex::Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Int(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        return Err(format!("undefined template variables: {}", missing.join(", ")));
    }
    Ok(rendered.into_owned())
}

/// First worker group that can absorb `change` without going negative
pub(crate) fn pick_group(groups: &[InstanceGroup], change: i64) -> Option<&InstanceGroup> {
    groups
        .iter()
        .find(|g| g.is_worker() && g.spec.replicas + change >= 0)
}

async fn scale_v2(
    client: &BaiduClient,
    id: &ResourceId,
    cluster_id: &str,
    change: i64,
    auto_renew: bool,
    timeout: Duration,
) -> ProviderResult<String> {
    let cce = client.cce();
    let groups = cce
        .list_instance_groups(cluster_id, 0, 0)
        .await
        .map_err(fail("Failed to list instance groups", id))?
        .list;
    let group = pick_group(&groups, change).ok_or_else(|| {
        invalid(
            id,
            format!("no worker instance group of {} can apply a change of {}", cluster_id, change),
        )
    })?;
    let group_id = group.spec.cce_instance_group_id.clone();
    let args = UpdateReplicasArgs {
        replicas: group.spec.replicas + change,
        delete_instance: true,
        delete_option: DeleteOption {
            delete_resource: true,
            delete_cds_snapshot: true,
        },
    };
    log::info!(
        "Scaling instance group {} of {} from {} to {} replicas",
        group_id,
        cluster_id,
        group.spec.replicas,
        args.replicas
    );
    cce.update_instance_group_replicas(cluster_id, &group_id, &args)
        .await
        .map_err(fail("Failed to update instance group replicas", id))?;

    let group_ref = group_id.as_str();
    StateConf::new(&[SCALING], &[READY], timeout)
        .wait_for_state(|| async move {
            let group = cce.get_instance_group(cluster_id, group_ref).await?;
            let status = if group.status.ready_replicas == group.spec.replicas {
                READY
            } else {
                SCALING
            };
            Ok::<_, BceError>(Some(((), status.to_string())))
        })
        .await
        .map_err(BceError::from)
        .map_err(fail("Failed waiting for instance group to be ready", id))?;

    if auto_renew && change > 0 {
        let mut instances = cce
            .list_instance_group_instances(cluster_id, &group_id)
            .await
            .map_err(fail("Failed to list instance group instances", id))?;
        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let newest: Vec<String> = instances
            .into_iter()
            .take(change as usize)
            .map(|i| i.status.machine.instance_id)
            .collect();
        enable_prepaid(client, id, &newest, timeout).await?;
    }
    Ok(group_id)
}

async fn scale_v1(
    client: &BaiduClient,
    id: &ResourceId,
    resource: &Resource,
    cluster_id: &str,
    change: i64,
    auto_renew: bool,
    timeout: Duration,
) -> ProviderResult<()> {
    if change <= 0 {
        return Err(invalid(id, "replicas_change should be greater than 0 for v1 clusters"));
    }
    let tpl = require_str(resource, "tpl")?;
    let vars = resource
        .get("vars")
        .and_then(Value::as_map)
        .ok_or_else(|| invalid(id, "tpl and vars are required for v1 clusters"))?;
    let rendered = render_template(&tpl, vars).map_err(|e| invalid(id, e))?;
    let args: serde_json::Value = serde_json::from_str(&rendered)
        .map_err(|e| invalid(id, format!("scaling-up template is not valid JSON: {}", e)))?;
    log::debug!("Scaling-up request for {}: {}", cluster_id, rendered);

    let cce = client.cce();
    let before = cce
        .get_cluster_v1(cluster_id)
        .await
        .map_err(fail("Failed to read cluster", id))?
        .slave_vm_count;
    cce.scale_up_v1(&args)
        .await
        .map_err(fail("Failed to scale up cluster", id))?;
    let target = before + change;
    log::info!("Scaling {} from {} to {} nodes", cluster_id, before, target);

    let new_nodes = StateConf::new(&[SCALING], &[NODE_RUNNING], timeout)
        .with_fail(&[NODE_CREATE_FAILED])
        .wait_for_state(|| async move {
            let cluster = cce.get_cluster_v1(cluster_id).await?;
            if cluster.slave_vm_count != target {
                return Ok::<_, BceError>(Some((Vec::new(), SCALING.to_string())));
            }
            let nodes = cce.list_nodes_v1(cluster_id).await?;
            let newest: Vec<_> = nodes.into_iter().take(change as usize).collect();
            let failed: Vec<&str> = newest
                .iter()
                .filter(|n| n.status == NODE_CREATE_FAILED)
                .map(|n| n.instance_short_id.as_str())
                .collect();
            let status = if !failed.is_empty() {
                log::error!("Nodes of {} failed to create: {}", cluster_id, failed.join(", "));
                NODE_CREATE_FAILED
            } else if newest.iter().all(|n| n.status == NODE_RUNNING) {
                NODE_RUNNING
            } else {
                SCALING
            };
            let ids = newest.into_iter().map(|n| n.instance_short_id).collect::<Vec<_>>();
            Ok(Some((ids, status.to_string())))
        })
        .await
        .map_err(BceError::from)
        .map_err(fail("Failed waiting for new nodes", id))?;

    if auto_renew {
        enable_prepaid(client, id, &new_nodes, timeout).await?;
    }
    Ok(())
}

async fn enable_prepaid(
    client: &BaiduClient,
    id: &ResourceId,
    instance_ids: &[String],
    timeout: Duration,
) -> ProviderResult<()> {
    for instance_id in instance_ids {
        retry_bce(timeout, || client.bcc().enable_prepaid_and_auto_renew(instance_id))
            .await
            .map_err(fail("Failed to enable prepaid billing with auto-renew", id))?;
        log::info!("Enabled prepaid billing with auto-renew on {}", instance_id);
    }
    Ok(())
}

/// Apply `replicas_change`, returning the identifier to persist
async fn apply_change(
    client: &BaiduClient,
    resource: &Resource,
    key: ReplicaKey,
    timeout: Duration,
) -> ProviderResult<ReplicaKey> {
    let id = &resource.id;
    let change = resource.get_int("replicas_change").unwrap_or(0);
    let auto_renew = resource.get_bool("auto_renew").unwrap_or(true);
    if change == 0 {
        return Ok(key);
    }
    match api_version(&key.cluster_id).map_err(|e| invalid(id, e))? {
        ApiVersion::V2 => {
            let group = scale_v2(client, id, &key.cluster_id, change, auto_renew, timeout).await?;
            Ok(ReplicaKey {
                cluster_id: key.cluster_id,
                instance_group_id: Some(group),
            })
        }
        ApiVersion::V1 => {
            scale_v1(client, id, resource, &key.cluster_id, change, auto_renew, timeout).await?;
            Ok(key)
        }
    }
}

fn with_change_applied(mut state: State) -> State {
    if state.exists {
        state
            .attributes
            .insert("replicas_change".to_string(), Value::Int(0));
    }
    state
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let cluster_id = require_str(resource, "cluster_id")?;
    let timeout = InstanceGroupReplicaType.schema().timeouts.create;
    let key = ReplicaKey {
        cluster_id,
        instance_group_id: None,
    };
    let key = apply_change(client, resource, key, timeout).await?;
    read(client, &resource.id, &key.to_string())
        .await
        .map(with_change_applied)
}

pub async fn read(client: &BaiduClient, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let key = ReplicaKey::parse(identifier);
    let cce = client.cce();
    let mut attrs = Attrs::new();
    attrs.set("cluster_id", key.cluster_id.as_str());

    match api_version(&key.cluster_id).map_err(|e| invalid(id, e))? {
        ApiVersion::V2 => {
            let cluster = match cce.get_cluster_v2(&key.cluster_id).await {
                Ok(cluster) => cluster,
                Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
                Err(e) => return Err(e.into_provider_error("Failed to read cluster", id)),
            };
            attrs.set("total", cluster.status.node_num);
            if let Some(group_id) = &key.instance_group_id {
                let group = cce
                    .get_instance_group(&key.cluster_id, group_id)
                    .await
                    .map_err(fail("Failed to read instance group", id))?;
                attrs
                    .set("instance_group_id", group_id.as_str())
                    .set("replicas", group.spec.replicas)
                    .set("ready_replicas", group.status.ready_replicas);
            }
        }
        ApiVersion::V1 => {
            let cluster = match cce.get_cluster_v1(&key.cluster_id).await {
                Ok(cluster) => cluster,
                Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
                Err(e) => return Err(e.into_provider_error("Failed to read cluster", id)),
            };
            attrs
                .set("total", cluster.slave_vm_count)
                .set("replicas", cluster.slave_vm_count)
                .set("ready_replicas", cluster.slave_vm_count);
        }
    }
    Ok(State::existing(id.clone(), attrs.into_map()).with_identifier(key.to_string()))
}

pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    identifier: &str,
    _from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    let timeout = InstanceGroupReplicaType.schema().timeouts.update;
    let key = apply_change(client, to, ReplicaKey::parse(identifier), timeout).await?;
    read(client, id, &key.to_string()).await.map(with_change_applied)
}

/// Scaling is not undone on delete
pub async fn delete(_client: &BaiduClient, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
    log::info!("Forgetting {} ({}); nodes are left in place", id, identifier);
    Ok(())
}
