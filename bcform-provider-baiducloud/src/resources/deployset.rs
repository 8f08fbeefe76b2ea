//! baiducloud.deployset - placement group spreading instances across hosts, racks or switches

use std::time::Duration;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, ResourceId, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};

use super::{Attrs, changed, fail, opt_str, require_str};
use crate::api::bcc::{CreateDeploySetArgs, ModifyDeploySetArgs};
use crate::connectivity::BaiduClient;
use crate::connectivity::client::new_client_token;
use crate::retry::retry_bce;

pub struct DeploySetType;

impl ResourceType for DeploySetType {
    fn name(&self) -> &'static str {
        "deployset"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("deployset")
            .with_description("Deployment set")
            .with_timeouts(Timeouts::new(
                Duration::from_secs(5 * 60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(5 * 60),
            ))
            .attribute(AttributeSchema::new("name", types::name()).computed())
            .attribute(AttributeSchema::new("desc", AttributeType::String))
            .attribute(
                AttributeSchema::new("strategy", types::one_of(&["HOST_HA", "RACK_HA", "TOR_HA"]))
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("concurrency", AttributeType::Int).force_new())
            .attribute(
                AttributeSchema::new("instance_count", AttributeType::Int)
                    .output()
                    .with_description("Instances currently placed in the set"),
            )
            .attribute(AttributeSchema::new("bcc_instance_cnt", AttributeType::Int).output())
            .attribute(AttributeSchema::new("bbc_instance_cnt", AttributeType::Int).output())
            .attribute(AttributeSchema::new("instance_total", AttributeType::Int).output())
    }
}

pub async fn create(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let args = CreateDeploySetArgs {
        name: opt_str(resource, "name"),
        desc: opt_str(resource, "desc"),
        strategy: require_str(resource, "strategy")?,
        concurrency: resource.get_int("concurrency"),
    };
    let timeout = DeploySetType.schema().timeouts.create;
    let token = new_client_token();
    let deploy_set_id = retry_bce(timeout, || client.bcc().create_deploy_set(&args, &token))
        .await
        .map_err(fail("Failed to create deploy set", id))?;
    log::info!("Created deploy set {} ({})", deploy_set_id, id);

    read(client, id, &deploy_set_id).await
}

pub async fn read(client: &BaiduClient, id: &ResourceId, deploy_set_id: &str) -> ProviderResult<State> {
    let set = match client.bcc().get_deploy_set(deploy_set_id).await {
        Ok(set) => set,
        Err(e) if e.is_not_found() => return Ok(State::not_found(id.clone())),
        Err(e) => return Err(e.into_provider_error("Failed to read deploy set", id)),
    };

    let mut attrs = Attrs::new();
    attrs
        .set_str("name", &set.name)
        .set_str("desc", &set.desc)
        .set_str("strategy", &set.strategy)
        .set("instance_count", set.instance_list.len() as i64)
        .set("bcc_instance_cnt", set.bcc_instance_cnt)
        .set("bbc_instance_cnt", set.bbc_instance_cnt)
        .set("instance_total", set.instance_total);
    if set.concurrency != 0 {
        attrs.set("concurrency", set.concurrency);
    }
    Ok(State::existing(id.clone(), attrs.into_map()).with_identifier(deploy_set_id))
}

pub async fn update(
    client: &BaiduClient,
    id: &ResourceId,
    deploy_set_id: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    if changed(&from.attributes, to, &["name", "desc"]) {
        let args = ModifyDeploySetArgs {
            name: opt_str(to, "name"),
            desc: opt_str(to, "desc"),
        };
        client
            .bcc()
            .modify_deploy_set(deploy_set_id, &args)
            .await
            .map_err(fail("Failed to modify deploy set", id))?;
    }
    read(client, id, deploy_set_id).await
}

pub async fn delete(client: &BaiduClient, id: &ResourceId, deploy_set_id: &str) -> ProviderResult<()> {
    let timeout = DeploySetType.schema().timeouts.delete;
    match retry_bce(timeout, || client.bcc().delete_deploy_set(deploy_set_id)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into_provider_error("Failed to delete deploy set", id)),
    }
}
