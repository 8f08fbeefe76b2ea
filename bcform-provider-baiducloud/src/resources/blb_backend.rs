//! baiducloud.blb_backend - backend servers attached to a load balancer

use std::collections::HashMap;
use std::time::Duration;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};

use super::blb::wait_available;
use super::{block_int, block_str, blocks, fail, invalid, require_str};
use crate::api::blb::BackendServer;
use crate::connectivity::BaiduClient;
use crate::connectivity::client::new_client_token;
use crate::retry::retry_bce;

pub struct BlbBackendType;

impl ResourceType for BlbBackendType {
    fn name(&self) -> &'static str {
        "blb_backend"
    }

    fn schema(&self) -> ResourceSchema {
        let server = || {
            types::blocks(vec![
                AttributeSchema::new("instance_id", AttributeType::String).required(),
                AttributeSchema::new("weight", AttributeType::IntRange { min: 0, max: 100 }).required(),
            ])
        };
        ResourceSchema::new("blb_backend")
            .with_description("Backend servers of a load balancer")
            .with_timeouts(Timeouts::new(
                Duration::from_secs(10 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(20 * 60),
            ))
            .attribute(
                AttributeSchema::new("blb_id", types::name())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("server", server())
                    .required()
                    .unordered()
                    .with_min_items(1)
                    .with_max_items(10),
            )
            .attribute(
                AttributeSchema::new("status", server())
                    .output()
                    .with_description("Backend servers as reported by the load balancer"),
            )
    }
}

fn servers(resource: &Resource) -> ProviderResult<Vec<BackendServer>> {
    blocks(resource.get("server"))
        .into_iter()
        .map(|block| {
            Ok(BackendServer {
                instance_id: block_str(block, "instance_id")
                    .ok_or_else(|| invalid(&resource.id, "server.instance_id is required"))?,
                weight: block_int(block, "weight")
                    .ok_or_else(|| invalid(&resource.id, "server.weight is required"))?,
            })
        })
        .collect()
}

fn server_list(servers: &[BackendServer]) -> Value {
    Value::List(
        servers
            .iter()
            .map(|s| {
                Value::Map(HashMap::from([
                    ("instance_id".to_string(), Value::String(s.instance_id.clone())),
                    ("weight".to_string(), Value::Int(s.weight)),
                ]))
            })
            .collect(),
    )
}

/// Servers to add, re-weight and remove to go from `current` to `desired`
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ServerDiff {
    pub add: Vec<BackendServer>,
    pub reweight: Vec<BackendServer>,
    pub remove: Vec<String>,
}

pub(crate) fn diff_servers(current: &[BackendServer], desired: &[BackendServer]) -> ServerDiff {
    let mut diff = ServerDiff::default();
    for server in desired {
        match current.iter().find(|c| c.instance_id == server.instance_id) {
            None => diff.add.push(server.clone()),
            Some(existing) if existing.weight != server.weight => diff.reweight.push(server.clone()),
            Some(_) => {}
        }
    }
    for server in current {
        if !desired.iter().any(|d| d.instance_id == server.instance_id) {
            diff.remove.push(server.instance_id.clone());
        }
    }
    diff
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let blb_id = require_str(resource, "blb_id")?;
    let servers = servers(resource)?;
    let timeout = BlbBackendType.schema().timeouts.create;

    wait_available(client, &blb_id, Duration::ZERO, timeout)
        .await
        .map_err(fail("Failed waiting for blb to become available", id))?;
    let token = new_client_token();
    retry_bce(timeout, || client.blb().add_backend_servers(&blb_id, &servers, &token))
        .await
        .map_err(fail("Failed to add backend servers", id))?;
    wait_available(client, &blb_id, Duration::ZERO, timeout)
        .await
        .map_err(fail("Failed waiting for blb to become available", id))?;

    read(client, id, &blb_id).await
}

pub async fn read(client: &BaiduClient, id: &ResourceId, blb_id: &str) -> ProviderResult<State> {
    let servers = match client.blb().list_backend_servers(blb_id).await {
        Ok(servers) => servers,
        Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
        Err(e) => return Err(e.into_provider_error("Failed to read backend servers", id)),
    };
    if servers.is_empty() {
        return Ok(State::not_found(id.clone()));
    }
    let attributes = HashMap::from([
        ("blb_id".to_string(), Value::String(blb_id.to_string())),
        ("server".to_string(), server_list(&servers)),
        ("status".to_string(), server_list(&servers)),
    ]);
    Ok(State::existing(id.clone(), attributes).with_identifier(blb_id))
}

pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    blb_id: &str,
    _from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    let timeout = BlbBackendType.schema().timeouts.update;
    let current = client
        .blb()
        .list_backend_servers(blb_id)
        .await
        .map_err(fail("Failed to read backend servers", id))?;
    let diff = diff_servers(&current, &servers(to)?);
    if diff == ServerDiff::default() {
        return read(client, id, blb_id).await;
    }
    log::info!(
        "Backend servers of {}: {} to add, {} to re-weight, {} to remove",
        blb_id,
        diff.add.len(),
        diff.reweight.len(),
        diff.remove.len()
    );

    wait_available(client, blb_id, Duration::ZERO, timeout)
        .await
        .map_err(fail("Failed waiting for blb to become available", id))?;
    if !diff.add.is_empty() {
        client
            .blb()
            .add_backend_servers(blb_id, &diff.add, &new_client_token())
            .await
            .map_err(fail("Failed to add backend servers", id))?;
    }
    if !diff.reweight.is_empty() {
        client
            .blb()
            .update_backend_servers(blb_id, &diff.reweight)
            .await
            .map_err(fail("Failed to update backend servers", id))?;
    }
    if !diff.remove.is_empty() {
        client
            .blb()
            .remove_backend_servers(blb_id, &diff.remove)
            .await
            .map_err(fail("Failed to remove backend servers", id))?;
    }
    wait_available(client, blb_id, Duration::ZERO, timeout)
        .await
        .map_err(fail("Failed waiting for blb to become available", id))?;

    read(client, id, blb_id).await
}

pub async fn delete(client: &BaiduClient, id: &ResourceId, blb_id: &str) -> ProviderResult<()> {
    let timeout = BlbBackendType.schema().timeouts.delete;
    let current = match client.blb().list_backend_servers(blb_id).await {
        Ok(servers) => servers,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into_provider_error("Failed to read backend servers", id)),
    };
    if current.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = current.into_iter().map(|s| s.instance_id).collect();
    match retry_bce(timeout, || client.blb().remove_backend_servers(blb_id, &ids)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into_provider_error("Failed to remove backend servers", id)),
    }
}
